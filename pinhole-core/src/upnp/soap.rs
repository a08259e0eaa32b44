//! AddPortMapping control calls.

use std::net::SocketAddr;

use tracing::error;

use crate::error::ForwardError;
use crate::net::LocalAddr;
use crate::upnp::{UpnpDevice, UpnpService, http, xml};

const LEASE_PERMANENT: u32 = 0;
/// Releasing re-issues the mapping with a one-second lease and lets the
/// router expire it, instead of calling DeletePortMapping.
const RELEASE_LEASE_SECS: u32 = 1;

const MAPPING_DESCRIPTION: &str = "pinhole";

/// An active router-level port forward.
///
/// Holds everything needed to release the mapping again; dropping it
/// without calling [`release`](Self::release) leaks the forward at the
/// router.
#[derive(Debug, Clone)]
pub struct Forwarding {
    service: UpnpService,
    external_port: u16,
    internal: SocketAddr,
    source: LocalAddr,
}

impl Forwarding {
    /// Forward `external_port` on `device` to `internal`.
    pub async fn establish(
        device: &UpnpDevice,
        source: LocalAddr,
        external_port: u16,
        internal: SocketAddr,
    ) -> Result<Self, ForwardError> {
        let service = device
            .forward_service()
            .cloned()
            .ok_or(ForwardError::Unsupported)?;
        add_port_mapping(&service, source, external_port, internal, LEASE_PERMANENT).await?;
        Ok(Self {
            service,
            external_port,
            internal,
            source,
        })
    }

    #[must_use]
    pub fn external_port(&self) -> u16 {
        self.external_port
    }

    #[must_use]
    pub fn internal(&self) -> SocketAddr {
        self.internal
    }

    /// Release the mapping.
    pub async fn release(self) -> Result<(), ForwardError> {
        add_port_mapping(
            &self.service,
            self.source,
            self.external_port,
            self.internal,
            RELEASE_LEASE_SECS,
        )
        .await
    }
}

/// Issue one AddPortMapping call against `service`.
///
/// Success is the absence of SOAP error fields in the response body.
pub(crate) async fn add_port_mapping(
    service: &UpnpService,
    source: LocalAddr,
    external_port: u16,
    internal: SocketAddr,
    lease_secs: u32,
) -> Result<(), ForwardError> {
    if !service.is_forward() {
        return Err(ForwardError::Unsupported);
    }
    let control = http::Url::parse(&service.control_url).map_err(ForwardError::Http)?;

    let envelope = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"\r\n\
         \x20 s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\r\n\
         \x20 <s:Body>\r\n\
         \x20   <m:AddPortMapping xmlns:m=\"{service_type}\">\r\n\
         \x20     <NewRemoteHost></NewRemoteHost>\r\n\
         \x20     <NewExternalPort>{external_port}</NewExternalPort>\r\n\
         \x20     <NewProtocol>TCP</NewProtocol>\r\n\
         \x20     <NewInternalPort>{internal_port}</NewInternalPort>\r\n\
         \x20     <NewInternalClient>{internal_host}</NewInternalClient>\r\n\
         \x20     <NewEnabled>1</NewEnabled>\r\n\
         \x20     <NewPortMappingDescription>{MAPPING_DESCRIPTION}</NewPortMappingDescription>\r\n\
         \x20     <NewLeaseDuration>{lease_secs}</NewLeaseDuration>\r\n\
         \x20   </m:AddPortMapping>\r\n\
         \x20 </s:Body>\r\n\
         </s:Envelope>\r\n",
        service_type = service.service_type,
        internal_port = internal.port(),
        internal_host = internal.ip(),
    );

    let request = format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         User-Agent: curl/8.0.0 (pinhole)\r\n\
         Accept: */*\r\n\
         SOAPAction: \"{service_type}#AddPortMapping\"\r\n\
         Content-Type: text/xml\r\n\
         Content-Length: {length}\r\n\
         Connection: close\r\n\
         \r\n\
         {envelope}",
        path = control.path,
        host = control.host,
        port = control.port,
        service_type = service.service_type,
        length = envelope.len(),
    );

    let response = http::roundtrip(&control, request.as_bytes(), Some(source)).await?;
    let text = String::from_utf8_lossy(&response);

    let code = xml::element_text(&text, "errorCode").unwrap_or_default();
    let description = xml::element_text(&text, "errorDescription").unwrap_or_default();
    if !code.is_empty() || !description.is_empty() {
        error!(
            code,
            description,
            service = %service.service_type,
            "router rejected port mapping"
        );
        return Err(ForwardError::Rejected {
            code: code.to_string(),
            description: description.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAN_IP_V1: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

    fn ephemeral() -> LocalAddr {
        LocalAddr::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }

    fn service(control_url: String) -> UpnpService {
        UpnpService {
            service_type: WAN_IP_V1.to_string(),
            service_id: "urn:upnp-org:serviceId:WANIPConn1".to_string(),
            control_url,
            scpd_url: String::new(),
            event_sub_url: String::new(),
        }
    }

    /// Control endpoint that captures the request and answers `body`.
    async fn spawn_control(body: &'static str) -> (SocketAddr, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(String::new()));
        let sink = captured.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let sink = sink.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        match timeout(Duration::from_millis(150), stream.read(&mut buf)).await {
                            Ok(Ok(n)) if n > 0 => request.extend_from_slice(&buf[..n]),
                            _ => break,
                        }
                    }
                    *sink.lock().unwrap() = String::from_utf8_lossy(&request).into_owned();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        (addr, captured)
    }

    const CLEAN_RESPONSE: &str = "<?xml version=\"1.0\"?>\
        <s:Envelope><s:Body><u:AddPortMappingResponse/></s:Body></s:Envelope>";

    const ERROR_RESPONSE: &str = "<?xml version=\"1.0\"?>\
        <s:Envelope><s:Body><s:Fault><detail><UPnPError>\
        <errorCode>718</errorCode>\
        <errorDescription>ConflictInMappingEntry</errorDescription>\
        </UPnPError></detail></s:Fault></s:Body></s:Envelope>";

    #[tokio::test]
    async fn clean_response_is_success() {
        let (addr, captured) = spawn_control(CLEAN_RESPONSE).await;
        let service = service(format!("http://{addr}/ctl/IPConn"));
        let internal: SocketAddr = "192.168.1.10:55000".parse().unwrap();

        add_port_mapping(&service, ephemeral(), 55000, internal, 0)
            .await
            .unwrap();

        let request = captured.lock().unwrap().clone();
        assert!(request.starts_with("POST /ctl/IPConn HTTP/1.1\r\n"));
        assert!(request.contains(&format!("SOAPAction: \"{WAN_IP_V1}#AddPortMapping\"")));
        assert!(request.contains("<NewExternalPort>55000</NewExternalPort>"));
        assert!(request.contains("<NewInternalPort>55000</NewInternalPort>"));
        assert!(request.contains("<NewInternalClient>192.168.1.10</NewInternalClient>"));
        assert!(request.contains("<NewProtocol>TCP</NewProtocol>"));
        assert!(request.contains("<NewLeaseDuration>0</NewLeaseDuration>"));

        // the advertised Content-Length must match the body exactly
        let (head, body) = request.split_once("\r\n\r\n").unwrap();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(length, body.len());
    }

    #[tokio::test]
    async fn soap_error_fields_are_failure() {
        let (addr, _captured) = spawn_control(ERROR_RESPONSE).await;
        let service = service(format!("http://{addr}/ctl/IPConn"));
        let internal: SocketAddr = "192.168.1.10:55000".parse().unwrap();

        let err = add_port_mapping(&service, ephemeral(), 55000, internal, 0)
            .await
            .unwrap_err();
        match err {
            ForwardError::Rejected { code, description } => {
                assert_eq!(code, "718");
                assert_eq!(description, "ConflictInMappingEntry");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_uses_one_second_lease() {
        let (addr, captured) = spawn_control(CLEAN_RESPONSE).await;
        let internal: SocketAddr = "192.168.1.10:55000".parse().unwrap();
        let forwarding = Forwarding {
            service: service(format!("http://{addr}/ctl/IPConn")),
            external_port: 55000,
            internal,
            source: ephemeral(),
        };

        forwarding.release().await.unwrap();

        let request = captured.lock().unwrap().clone();
        assert!(request.contains("<NewLeaseDuration>1</NewLeaseDuration>"));
    }

    #[tokio::test]
    async fn non_forwardable_service_is_rejected_locally() {
        let mut srv = service("http://127.0.0.1:1/ctl".to_string());
        srv.service_type = "urn:schemas-upnp-org:service:Layer3Forwarding:1".to_string();
        let internal: SocketAddr = "192.168.1.10:55000".parse().unwrap();

        let err = add_port_mapping(&srv, ephemeral(), 55000, internal, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Unsupported));
    }
}
