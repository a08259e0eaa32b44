//! Error types for pinhole-core.

/// Top-level error returned by session-level operations.
///
/// Each variant represents a semantically distinct failure that callers
/// can match on to decide whether to retry or abort.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The STUN server list was empty.
    #[error("no STUN servers configured")]
    NoStunServers,

    /// The host network stack cannot carry NAT traversal (fatal at startup).
    #[error("unsupported network environment: {0}")]
    UnsupportedNetwork(String),

    /// DNS resolution failed.
    #[error("DNS resolution failed")]
    Dns(
        #[source]
        #[from]
        DnsError,
    ),

    /// SSDP discovery failed.
    #[error("UPnP discovery failed")]
    Discovery(
        #[source]
        #[from]
        DiscoveryError,
    ),

    /// The router rejected or never answered a port-mapping call.
    #[error("UPnP port mapping failed")]
    Forward(
        #[source]
        #[from]
        ForwardError,
    ),

    /// A keep-alive probe found the mapping dead.
    #[error("keep-alive probe failed")]
    Probe(
        #[source]
        #[from]
        ProbeError,
    ),
}

/// DNS resolution error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DnsError {
    /// The system DNS resolver returned an error.
    #[error("DNS lookup failed")]
    Resolve(#[from] std::io::Error),
    /// DNS succeeded but returned no IPv4 address.
    #[error("no IPv4 address found")]
    NotFound,
}

/// Structural violation in a STUN binding response.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum WireError {
    /// Buffer shorter than the 20-byte STUN header.
    #[error("response shorter than STUN header")]
    Truncated,
    /// An attribute length field is inconsistent with the buffer size.
    #[error("attribute length inconsistent with buffer")]
    BadAttribute,
    /// Neither MAPPED-ADDRESS nor XOR-MAPPED-ADDRESS was present.
    #[error("no address attribute in response")]
    MissingAddress,
}

/// One STUN server failed to produce a mapping.
///
/// All variants are treated identically by the client: the server is
/// abandoned for this cycle and the list rotates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StunError {
    #[error("DNS resolution failed")]
    Dns(
        #[source]
        #[from]
        DnsError,
    ),

    #[error("STUN network I/O error")]
    Io(
        #[source]
        #[from]
        std::io::Error,
    ),

    #[error("STUN transaction timed out")]
    Timeout,

    #[error("malformed STUN response")]
    Wire(
        #[source]
        #[from]
        WireError,
    ),
}

/// Outcome of a failed keep-alive probe.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProbeError {
    #[error("DNS resolution failed")]
    Dns(
        #[source]
        #[from]
        DnsError,
    ),

    #[error("probe I/O error")]
    Io(
        #[source]
        #[from]
        std::io::Error,
    ),

    /// Connect did not complete within the deadline.
    #[error("probe connect timed out")]
    Timeout,

    /// The remote closed the connection.
    #[error("keep-alive server closed connection")]
    Closed,

    /// The read deadline passed with zero bytes received.
    #[error("no data received before deadline")]
    Silent,
}

/// Minimal HTTP client error (UPnP description fetch and control calls).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HttpError {
    #[error("unsupported URL: {0}")]
    Url(String),

    #[error("DNS resolution failed")]
    Dns(
        #[source]
        #[from]
        DnsError,
    ),

    #[error("HTTP I/O error")]
    Io(
        #[source]
        #[from]
        std::io::Error,
    ),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("invalid response from HTTP server")]
    BadResponse,
}

/// SSDP discovery failure.
///
/// Only transport-level problems surface here; unreachable or unparsable
/// candidate devices are logged and skipped instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// Socket creation or bind failed.
    #[error("SSDP socket creation/bind failed")]
    Socket(#[source] std::io::Error),

    /// Multicast send or receive failed.
    #[error("SSDP I/O error")]
    Io(#[source] std::io::Error),
}

/// AddPortMapping failure.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ForwardError {
    /// The selected service is not a WAN connection service.
    #[error("service type does not support port forwarding")]
    Unsupported,

    /// Transport error during the control call.
    #[error("control call failed")]
    Http(
        #[source]
        #[from]
        HttpError,
    ),

    /// The router answered with a SOAP error.
    #[error("router rejected mapping: [{code}] {description}")]
    Rejected { code: String, description: String },
}
