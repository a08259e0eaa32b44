//! Socket and addressing primitives.
//!
//! Every outbound connection of a mapping session must originate from the
//! same local (IP, port) tuple, because the NAT keys its translation entry
//! on that tuple. [`LocalAddr`] is that reusable local endpoint: each call
//! to [`LocalAddr::socket`] yields a fresh reuse-enabled socket bound to
//! the tuple, so a later socket can rebind the port a closed one used.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpStream;

use crate::error::DnsError;

#[derive(Clone, Copy)]
pub(crate) enum Protocol {
    Tcp,
    Udp,
}

/// Reusable local endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddr {
    addr: SocketAddr,
}

impl LocalAddr {
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Create a non-blocking socket with address/port reuse enabled and
    /// bind it to the local endpoint.
    pub(crate) fn socket(&self, p: Protocol) -> Result<Socket, io::Error> {
        let socket = Socket::new(
            Domain::for_address(self.addr),
            match p {
                Protocol::Tcp => Type::STREAM.nonblocking(),
                Protocol::Udp => Type::DGRAM.nonblocking(),
            },
            None,
        )?;

        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        socket.bind(&self.addr.into())?;
        Ok(socket)
    }

    /// Reuse-enabled UDP socket bound to the local endpoint.
    pub(crate) fn udp_socket(&self) -> Result<tokio::net::UdpSocket, io::Error> {
        tokio::net::UdpSocket::from_std(self.socket(Protocol::Udp)?.into())
    }
}

/// A remote peer, either already resolved or still a DNS name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAddr {
    /// Bare socket address.
    SocketAddr(SocketAddr),
    /// Domain name, requires DNS.
    Host { domain: String, port: u16 },
}

impl RemoteAddr {
    #[must_use]
    pub const fn from_addr(addr: SocketAddr) -> Self {
        Self::SocketAddr(addr)
    }

    #[must_use]
    pub fn from_host(domain: impl Into<String>, port: u16) -> Self {
        Self::Host {
            domain: domain.into(),
            port,
        }
    }

    /// Resolve to a socket address, preferring nothing but IPv4.
    pub(crate) async fn socket_addr(&self) -> Result<SocketAddr, DnsError> {
        match self {
            Self::SocketAddr(addr) => Ok(*addr),
            Self::Host { domain, port } => resolve_dns((domain.as_str(), *port)).await,
        }
    }

    /// The host part as written, for HTTP `Host:` headers.
    #[must_use]
    pub fn host(&self) -> String {
        match self {
            Self::SocketAddr(addr) => addr.ip().to_string(),
            Self::Host { domain, .. } => domain.clone(),
        }
    }
}

impl std::fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SocketAddr(addr) => write!(f, "{addr}"),
            Self::Host { domain, port } => write!(f, "{domain}:{port}"),
        }
    }
}

/// Resolve a host to its first IPv4 address.
pub(crate) async fn resolve_dns<T: tokio::net::ToSocketAddrs>(
    host: T,
) -> Result<SocketAddr, DnsError> {
    let mut addrs = tokio::net::lookup_host(host).await?;
    addrs.find(SocketAddr::is_ipv4).ok_or(DnsError::NotFound)
}

/// Drive a non-blocking connect to completion and hand back a tokio stream.
pub(crate) async fn connect_remote(
    socket: Socket,
    remote_addr: SocketAddr,
) -> Result<TcpStream, io::Error> {
    match socket.connect(&remote_addr.into()) {
        Ok(()) => {}
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
        #[cfg(unix)]
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(e),
    };

    let stream = TcpStream::from_std(socket.into())?;
    stream.writable().await?;

    if let Some(e) = stream.take_error()? {
        return Err(e);
    }

    Ok(stream)
}
