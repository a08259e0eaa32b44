//! Keep-alive probing.
//!
//! The NAT translation entry created during STUN discovery survives only
//! while traffic flows through it. A probe opens a connection from the
//! session's source endpoint to a stable HTTP host and watches for bytes:
//! a read deadline passing with data already received means the path is
//! alive; a peer close or a silent deadline means the mapping is gone.
//! Response content is ignored, the remote is purely a dead-peer detector.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::ProbeError;
use crate::net::{LocalAddr, Protocol, RemoteAddr, connect_remote};

const IO_TIMEOUT: Duration = Duration::from_secs(3);
const BUF_SIZE: usize = 4096;

/// Probe `remote` once from the session's source endpoint.
///
/// `Ok(())` means at least one response byte arrived before the read
/// deadline. Every other outcome reports why the path looks dead.
pub async fn probe(remote: &RemoteAddr, source: LocalAddr) -> Result<(), ProbeError> {
    probe_within(remote, source, IO_TIMEOUT).await
}

async fn probe_within(
    remote: &RemoteAddr,
    source: LocalAddr,
    deadline: Duration,
) -> Result<(), ProbeError> {
    let addr = remote.socket_addr().await?;
    let socket = source.socket(Protocol::Tcp)?;
    let mut stream = timeout(deadline, connect_remote(socket, addr))
        .await
        .map_err(|_| ProbeError::Timeout)??;
    debug!(remote = %remote, "connected to keep-alive host");

    let request = format!(
        "HEAD /pinhole-keep-alive HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: curl/8.0.0 (pinhole)\r\n\
         Accept: */*\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        remote.host()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = [0u8; BUF_SIZE];
    let mut received = 0usize;
    loop {
        match timeout(deadline, stream.read(&mut buf)).await {
            // deadline with data already seen is the success path
            Err(_) if received > 0 => {
                debug!("keep-alive ok");
                return Ok(());
            }
            Err(_) => return Err(ProbeError::Silent),
            Ok(Ok(0)) => return Err(ProbeError::Closed),
            Ok(Ok(n)) => received += n,
            Ok(Err(e)) => return Err(ProbeError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use tokio::net::TcpListener;

    const SHORT: Duration = Duration::from_millis(200);

    fn ephemeral() -> LocalAddr {
        LocalAddr::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }

    async fn listener() -> (TcpListener, RemoteAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = RemoteAddr::from_addr(listener.local_addr().unwrap());
        (listener, remote)
    }

    #[tokio::test]
    async fn bytes_then_quiet_is_alive() {
        let (listener, remote) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
            // hold the connection open past the client's read deadline
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        assert!(probe_within(&remote, ephemeral(), SHORT).await.is_ok());
    }

    #[tokio::test]
    async fn close_before_any_byte_is_dead() {
        let (listener, remote) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            // close without answering
        });

        let err = probe_within(&remote, ephemeral(), SHORT).await.unwrap_err();
        assert!(matches!(err, ProbeError::Closed));
    }

    #[tokio::test]
    async fn bytes_then_close_is_dead() {
        let (listener, remote) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            // drop closes the connection before the client's deadline
        });

        let err = probe_within(&remote, ephemeral(), SHORT).await.unwrap_err();
        assert!(matches!(err, ProbeError::Closed));
    }

    #[tokio::test]
    async fn silence_is_dead() {
        let (listener, remote) = listener().await;
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // say nothing, keep the socket open
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let err = probe_within(&remote, ephemeral(), SHORT).await.unwrap_err();
        assert!(matches!(err, ProbeError::Silent));
    }

    #[tokio::test]
    async fn probe_reuses_the_source_port() {
        let (listener, remote) = listener().await;
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(b"HTTP/1.1 200 OK\r\n").await;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                });
            }
        });

        // pin a concrete source port the way a mapping session would
        let pin = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let source = pin.local_addr().unwrap();
        drop(pin);

        let source = LocalAddr::new(source);
        assert!(probe_within(&remote, source, SHORT).await.is_ok());
        // a second probe binds the very same tuple again
        assert!(probe_within(&remote, source, SHORT).await.is_ok());
    }
}
