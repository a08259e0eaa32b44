//! Minimal HTTP/1.1 client for UPnP description and control traffic.
//!
//! Routers speak just enough HTTP for a blocking request/response
//! exchange terminated by connection close, so this deliberately stays
//! far below a real client: one request, read to EOF, no redirects, no
//! chunked encoding, http scheme only.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::HttpError;
use crate::net::{LocalAddr, Protocol, connect_remote, resolve_dns};

const IO_TIMEOUT: Duration = Duration::from_secs(3);
const BUF_SIZE: usize = 4096;

/// Decomposed `http://host[:port][/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Url {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Url {
    pub(crate) fn parse(url: &str) -> Result<Self, HttpError> {
        let bad = || HttpError::Url(url.to_string());

        let rest = url.strip_prefix("http://").ok_or_else(bad)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        // IPv6 literals are out of scope
        if authority.is_empty() || authority.contains('[') {
            return Err(bad());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| bad())?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(bad());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `http://host:port` origin used for resolving relative references.
    pub(crate) fn origin(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Resolve a possibly-relative URL against the origin of its document.
///
/// Only root-relative references occur in practice; anything else is
/// passed through untouched.
pub(crate) fn absolutize(raw: &str, base: &Url) -> String {
    if raw.starts_with('/') {
        format!("{}{}", base.origin(), raw)
    } else {
        raw.to_string()
    }
}

/// Send one request and read the raw response until the remote closes.
///
/// `source` pins the local endpoint when the caller's NAT mapping must be
/// exercised; `None` binds an ephemeral port.
pub(crate) async fn roundtrip(
    url: &Url,
    request: &[u8],
    source: Option<LocalAddr>,
) -> Result<Vec<u8>, HttpError> {
    let addr = resolve_dns((url.host.as_str(), url.port)).await?;
    let source = source.unwrap_or(LocalAddr::new(SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::UNSPECIFIED,
        0,
    ))));

    let socket = source.socket(Protocol::Tcp)?;
    let mut stream = timeout(IO_TIMEOUT, connect_remote(socket, addr))
        .await
        .map_err(|_| HttpError::Timeout)??;

    stream.write_all(request).await?;

    let mut response = Vec::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = timeout(IO_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| HttpError::Timeout)??;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
    }
    Ok(response)
}

/// Minimal GET returning the response body.
pub(crate) async fn get(url: &Url) -> Result<String, HttpError> {
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: curl/8.0.0 (pinhole)\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\
         \r\n",
        url.path, url.host
    );
    let response = roundtrip(url, request.as_bytes(), None).await?;

    if !response.starts_with(b"HTTP/") {
        return Err(HttpError::BadResponse);
    }
    let text = String::from_utf8_lossy(&response);
    match text.split_once("\r\n\r\n") {
        Some((_, body)) => Ok(body.to_string()),
        None => Err(HttpError::BadResponse),
    }
}
