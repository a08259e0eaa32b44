//! Mapping session orchestration.
//!
//! One session runs the cyclic state machine: acquire a mapping via
//! STUN, best-effort forward it at the router, keep it alive, tear the
//! forward down when the mapping dies, start over. There is no terminal
//! state short of caller-initiated shutdown, and shutdown always runs
//! the teardown release so no stale forward is left at the router.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Error;
use crate::keepalive;
use crate::net::RemoteAddr;
use crate::stun::{Mapping, StunClient};
use crate::upnp::{self, Forwarding};

const PROBE_INTERVAL: Duration = Duration::from_secs(15);
const SETTLE_DELAY: Duration = Duration::from_secs(60);
/// Consecutive probe failures before the mapping counts as lost. Debounces
/// single transient drops.
const PROBE_FAILURE_LIMIT: u32 = 3;

/// Snapshot of an established mapping, handed to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingInfo {
    /// Local endpoint all session sockets bind.
    pub local_addr: SocketAddr,
    /// Publicly visible endpoint.
    pub public_addr: SocketAddr,
    /// Whether a router-level forward backs the mapping.
    pub forwarded: bool,
}

/// Called when a cycle establishes a changed public mapping.
///
/// Automatically implemented for `FnMut(MappingInfo)` closures.
pub trait MappingHandler: Send {
    fn on_change(&mut self, info: MappingInfo);
}

impl<F: FnMut(MappingInfo) + Send> MappingHandler for F {
    fn on_change(&mut self, info: MappingInfo) {
        self(info)
    }
}

/// Builder for [`Session`].
#[derive(Debug)]
pub struct SessionBuilder {
    stun_servers: Vec<RemoteAddr>,
    keepalive: RemoteAddr,
    bind: SocketAddr,
    upnp: bool,
    probe_interval: Duration,
    settle_delay: Duration,
    stun_backoff: Option<Duration>,
}

impl SessionBuilder {
    /// Create a builder from the ordered STUN server list and the
    /// keep-alive probe target.
    #[must_use]
    pub fn new(stun_servers: Vec<RemoteAddr>, keepalive: RemoteAddr) -> Self {
        Self {
            stun_servers,
            keepalive,
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            upnp: false,
            probe_interval: PROBE_INTERVAL,
            settle_delay: SETTLE_DELAY,
            stun_backoff: None,
        }
    }

    /// Initial local bind address. Defaults to an ephemeral port.
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    /// Attempt router-level port forwarding each cycle. Off by default.
    #[must_use]
    pub const fn upnp(mut self, enabled: bool) -> Self {
        self.upnp = enabled;
        self
    }

    /// Keep-alive probe interval. Defaults to 15 s.
    #[must_use]
    pub const fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Delay between establishing a mapping and the first probe.
    /// Defaults to 60 s.
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Backoff after a full fruitless STUN rotation. Defaults to 10 s.
    #[must_use]
    pub const fn stun_backoff(mut self, backoff: Duration) -> Self {
        self.stun_backoff = Some(backoff);
        self
    }

    /// Build the session. Fails when the STUN server list is empty.
    pub fn build(self) -> Result<Session, Error> {
        let mut stun = StunClient::bound(self.stun_servers, self.bind)?;
        if let Some(backoff) = self.stun_backoff {
            stun = stun.with_backoff(backoff);
        }
        Ok(Session {
            stun,
            keepalive: self.keepalive,
            upnp: self.upnp,
            probe_interval: self.probe_interval,
            settle_delay: self.settle_delay,
            forwarding: None,
            current: None,
        })
    }
}

/// A NAT mapping session.
pub struct Session {
    stun: StunClient,
    keepalive: RemoteAddr,
    upnp: bool,
    probe_interval: Duration,
    settle_delay: Duration,
    forwarding: Option<Forwarding>,
    current: Option<MappingInfo>,
}

impl Session {
    /// Run cycles until `shutdown` completes, then release any active
    /// forward before returning.
    ///
    /// Shutdown is cooperative: it takes effect at the next suspension
    /// point of the running cycle, and the teardown release always runs.
    pub async fn run_until<H, F>(&mut self, handler: &mut H, shutdown: F) -> Result<(), Error>
    where
        H: MappingHandler,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = self.cycle(handler) => {}
            }
        }
        self.teardown().await;
        Ok(())
    }

    /// Run cycles indefinitely.
    pub async fn run<H: MappingHandler>(&mut self, handler: &mut H) -> Result<(), Error> {
        self.run_until(handler, std::future::pending()).await
    }

    /// One pass of the acquire → forward → keep-alive → teardown cycle.
    async fn cycle<H: MappingHandler>(&mut self, handler: &mut H) {
        let mapping = self.stun.acquire_mapping().await;
        info!(inner = %mapping.inner, outer = %mapping.outer, "mapping acquired");

        if self.upnp {
            self.forward(&mapping).await;
        }

        let info = MappingInfo {
            local_addr: mapping.inner,
            public_addr: mapping.outer,
            forwarded: self.forwarding.is_some(),
        };
        if self.current != Some(info) {
            self.current = Some(info);
            handler.on_change(info);
        }

        sleep(self.settle_delay).await;

        let mut failures = 0u32;
        loop {
            match keepalive::probe(&self.keepalive, self.stun.source()).await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "keep-alive probe failed");
                    if failures >= PROBE_FAILURE_LIMIT {
                        break;
                    }
                }
            }
            sleep(self.probe_interval).await;
        }
        warn!("NAT mapping lost, tearing down and re-acquiring");

        self.teardown().await;
    }

    /// Best-effort router forwarding; any failure just skips forwarding
    /// for this cycle.
    async fn forward(&mut self, mapping: &Mapping) {
        match upnp::discover_router().await {
            Ok(Some(device)) => {
                let established = Forwarding::establish(
                    &device,
                    self.stun.source(),
                    mapping.inner.port(),
                    mapping.inner,
                )
                .await;
                match established {
                    Ok(forwarding) => {
                        info!(
                            router = %device.addr(),
                            external_port = forwarding.external_port(),
                            "router port mapping established"
                        );
                        self.forwarding = Some(forwarding);
                    }
                    Err(e) => warn!(router = %device.addr(), error = %e, "failed to forward port"),
                }
            }
            Ok(None) => info!("no UPnP router found"),
            Err(e) => warn!(error = %e, "UPnP discovery failed"),
        }
    }

    async fn teardown(&mut self) {
        if let Some(forwarding) = self.forwarding.take() {
            match forwarding.release().await {
                Ok(()) => info!("released router port mapping"),
                Err(e) => warn!(error = %e, "failed to release router port mapping"),
            }
        }
    }
}
