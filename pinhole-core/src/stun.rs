//! STUN mapping discovery.
//!
//! A [`StunClient`] owns an ordered ring of candidate servers and the
//! sticky local source endpoint. One binding transaction is attempted
//! against the ring head; any failure rotates the ring and tries the
//! next server, sleeping only after a full fruitless cycle. The local
//! port chosen by the OS on the first successful transaction is reused
//! for every later socket of the session, because the NAT mapping is
//! keyed on it.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use smallvec::SmallVec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::{Error, StunError};
use crate::net::{LocalAddr, Protocol, RemoteAddr, connect_remote};

mod wire;

const IO_TIMEOUT: Duration = Duration::from_secs(3);
const ROTATION_BACKOFF: Duration = Duration::from_secs(10);
const RESPONSE_LIMIT: usize = 1500;

/// Discovered NAT mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Local (source IP, source port) the OS bound for the transaction.
    pub inner: SocketAddr,
    /// Publicly visible endpoint reported by the STUN server.
    pub outer: SocketAddr,
}

/// Ordered, non-empty ring of STUN servers.
#[derive(Debug)]
struct ServerRing {
    list: SmallVec<[RemoteAddr; 8]>,
}

impl ServerRing {
    fn new(servers: Vec<RemoteAddr>) -> Option<Self> {
        if servers.is_empty() {
            return None;
        }
        Some(Self {
            list: SmallVec::from_vec(servers),
        })
    }

    fn head(&self) -> &RemoteAddr {
        &self.list[0]
    }

    /// Move the current head to the tail.
    fn rotate(&mut self) {
        let head = self.list.remove(0);
        self.list.push(head);
    }
}

/// STUN binding client with server rotation.
pub struct StunClient {
    servers: ServerRing,
    source: LocalAddr,
    backoff: Duration,
}

impl StunClient {
    /// Client binding from an ephemeral local port.
    pub fn new(servers: Vec<RemoteAddr>) -> Result<Self, Error> {
        Self::bound(
            servers,
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
        )
    }

    /// Client binding from a caller-chosen local endpoint.
    pub fn bound(servers: Vec<RemoteAddr>, bind: SocketAddr) -> Result<Self, Error> {
        let servers = ServerRing::new(servers).ok_or(Error::NoStunServers)?;
        Ok(Self {
            servers,
            source: LocalAddr::new(bind),
            backoff: ROTATION_BACKOFF,
        })
    }

    /// Sleep inserted after a full rotation with zero successes.
    /// Defaults to 10 s.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The server currently at the head of the rotation.
    #[must_use]
    pub fn current_server(&self) -> &RemoteAddr {
        self.servers.head()
    }

    /// Local endpoint every socket of this mapping session must bind.
    ///
    /// Starts as port 0 and sticks to the OS-chosen port after the first
    /// successful transaction.
    #[must_use]
    pub fn source(&self) -> LocalAddr {
        self.source
    }

    /// Discover the public mapping, retrying indefinitely.
    ///
    /// Never fails: an unavailable server rotates the ring, and a full
    /// cycle with zero successes inserts a backoff sleep before the next
    /// round.
    pub async fn acquire_mapping(&mut self) -> Mapping {
        let first = self.servers.head().clone();
        loop {
            match self.attempt().await {
                Ok(mapping) => {
                    debug!(
                        server = %self.servers.head(),
                        inner = %mapping.inner,
                        outer = %mapping.outer,
                        "got mapping"
                    );
                    return mapping;
                }
                Err(e) => {
                    warn!(server = %self.servers.head(), error = %e, "STUN server is unavailable");
                    self.servers.rotate();
                    if *self.servers.head() == first {
                        error!("no STUN server is available right now");
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
    }

    /// One binding transaction against the ring head.
    async fn attempt(&mut self) -> Result<Mapping, StunError> {
        let remote = self.servers.head().socket_addr().await?;
        let socket = self.source.socket(Protocol::Tcp)?;
        let mut stream = timeout(IO_TIMEOUT, connect_remote(socket, remote))
            .await
            .map_err(|_| StunError::Timeout)??;

        let inner = stream.local_addr()?;
        // the OS-chosen port is the session's source port from here on
        self.source = LocalAddr::new(inner);

        stream.write_all(&wire::encode_binding_request()).await?;

        let mut buf = [0u8; RESPONSE_LIMIT];
        let n = timeout(IO_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| StunError::Timeout)??;
        let outer = wire::decode_binding_response(&buf[..n])?;

        Ok(Mapping {
            inner,
            outer: SocketAddr::V4(outer),
        })
    }
}
