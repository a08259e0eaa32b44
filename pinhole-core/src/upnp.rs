//! UPnP router discovery and port forwarding.
//!
//! SSDP multicast finds candidate devices, their description documents
//! yield service lists, and the first device carrying a WAN connection
//! service becomes the router. Forwarding then goes through that
//! service's control URL via [`Forwarding`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::net::LocalAddr;

mod http;
mod soap;
mod xml;

pub use soap::Forwarding;

const SSDP_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(
    Ipv4Addr::new(239, 255, 255, 250),
    1900,
));
const SSDP_WINDOW: Duration = Duration::from_secs(1);
const SSDP_SEARCH_TARGETS: [&str; 2] = ["ssdp:all", "upnp:rootdevice"];

const FORWARD_SERVICE_TYPES: [&str; 3] = [
    "urn:schemas-upnp-org:service:WANIPConnection:1",
    "urn:schemas-upnp-org:service:WANIPConnection:2",
    "urn:schemas-upnp-org:service:WANPPPConnection:1",
];

/// One `<service>` entry from a device description.
///
/// Fields hold empty strings where the description omitted the tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpnpService {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub scpd_url: String,
    pub event_sub_url: String,
}

impl UpnpService {
    /// A service is usable once it can be identified and controlled.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.service_type.is_empty()
            && !self.service_id.is_empty()
            && !self.control_url.is_empty()
    }

    /// Whether the service can manage WAN port mappings.
    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.is_valid() && FORWARD_SERVICE_TYPES.contains(&self.service_type.as_str())
    }

    fn from_block(block: &str, base: &http::Url) -> Self {
        let text = |tag| xml::element_text(block, tag).unwrap_or_default();
        let url = |tag| {
            xml::element_text(block, tag)
                .map(|raw| http::absolutize(raw, base))
                .unwrap_or_default()
        };
        Self {
            service_type: text("serviceType").to_string(),
            service_id: text("serviceId").to_string(),
            control_url: url("controlURL"),
            scpd_url: url("SCPDURL"),
            event_sub_url: url("eventSubURL"),
        }
    }
}

/// A responding device and the services parsed from its descriptions.
#[derive(Debug, Clone)]
pub struct UpnpDevice {
    addr: IpAddr,
    services: Vec<UpnpService>,
}

impl UpnpDevice {
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    #[must_use]
    pub fn services(&self) -> &[UpnpService] {
        &self.services
    }

    /// First forwarding-capable service, if the device has one.
    #[must_use]
    pub fn forward_service(&self) -> Option<&UpnpService> {
        self.services.iter().find(|s| s.is_forward())
    }

    /// Fetch and parse every description URL of one candidate device.
    ///
    /// Unreachable or unparsable documents only cost their own services.
    async fn load(addr: IpAddr, urls: &[String]) -> Self {
        let mut services: Vec<UpnpService> = Vec::new();
        for raw in urls {
            let url = match http::Url::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %raw, error = %e, "skipping device description");
                    continue;
                }
            };
            let body = match http::get(&url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %raw, error = %e, "failed to load device description");
                    continue;
                }
            };
            for block in xml::elements(&body, "service") {
                let service = UpnpService::from_block(block, &url);
                if !service.is_valid() {
                    continue;
                }
                // services are keyed by id; a later description wins
                match services
                    .iter_mut()
                    .find(|s| s.service_id == service.service_id)
                {
                    Some(existing) => *existing = service,
                    None => services.push(service),
                }
            }
        }
        Self { addr, services }
    }
}

/// Search the LAN for a forwarding-capable router.
///
/// Best-effort: `Ok(None)` when nothing usable answered within the
/// collection window.
pub async fn discover_router() -> Result<Option<UpnpDevice>, DiscoveryError> {
    discover_router_at(SSDP_ADDR, SSDP_WINDOW).await
}

async fn discover_router_at(
    ssdp: SocketAddr,
    window: Duration,
) -> Result<Option<UpnpDevice>, DiscoveryError> {
    let local = LocalAddr::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)));
    let socket = local.udp_socket().map_err(DiscoveryError::Socket)?;

    for st in SSDP_SEARCH_TARGETS {
        let msearch = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             ST: {st}\r\n\
             MX: 2\r\n\
             MAN: \"ssdp:discover\"\r\n\
             HOST: {ssdp}\r\n\
             \r\n"
        );
        socket
            .send_to(msearch.as_bytes(), ssdp)
            .await
            .map_err(DiscoveryError::Io)?;
    }

    // candidates keyed by responder IP, in first-response order
    let mut candidates: Vec<(IpAddr, Vec<String>)> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match timeout(window, socket.recv_from(&mut buf)).await {
            Err(_) => break, // collection window closed
            Ok(Ok((n, from))) => {
                let response = String::from_utf8_lossy(&buf[..n]);
                let Some(location) = extract_location(&response) else {
                    continue;
                };
                debug!(%location, from = %from, "got SSDP location");
                let ip = from.ip();
                match candidates.iter_mut().find(|(addr, _)| *addr == ip) {
                    Some((_, urls)) => {
                        if !urls.contains(&location) {
                            urls.push(location);
                        }
                    }
                    None => candidates.push((ip, vec![location])),
                }
            }
            Ok(Err(e)) => return Err(DiscoveryError::Io(e)),
        }
    }

    let mut selected: Option<UpnpDevice> = None;
    for (ip, urls) in &candidates {
        let device = UpnpDevice::load(*ip, urls).await;
        if device.forward_service().is_none() {
            continue;
        }
        if selected.is_none() {
            info!(router = %ip, services = device.services.len(), "found UPnP router");
            selected = Some(device);
        } else {
            warn!(router = %ip, "ignoring additional UPnP router");
        }
    }
    Ok(selected)
}

/// Pull the LOCATION header out of an SSDP response.
fn extract_location(response: &str) -> Option<String> {
    for line in response.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("location") {
            let value = value.trim();
            if value.starts_with("http://") && !value.contains('[') {
                return Some(value.to_string());
            }
        }
    }
    None
}
