//! NAT traversal library.
//!
//! Discovers the publicly visible address of a local endpoint via STUN,
//! keeps the NAT mapping alive against table eviction, and optionally
//! pins a more durable router-level port forward via UPnP.
//!
//! # Quick start
//!
//! ```no_run
//! use pinhole_core::net::RemoteAddr;
//! use pinhole_core::session::{MappingInfo, SessionBuilder};
//!
//! # async fn example() -> Result<(), pinhole_core::Error> {
//! let stun = vec![
//!     RemoteAddr::from_host("stun.example.org", 3478),
//!     RemoteAddr::from_host("stun.example.net", 3478),
//! ];
//! let keepalive = RemoteAddr::from_host("www.example.com", 80);
//!
//! let mut session = SessionBuilder::new(stun, keepalive).upnp(true).build()?;
//! session
//!     .run(&mut |info: MappingInfo| {
//!         println!("public address: {}", info.public_addr);
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod keepalive;
pub mod net;
pub mod precheck;
pub mod session;
pub mod stun;
pub mod upnp;

pub use error::{
    DiscoveryError, DnsError, Error, ForwardError, HttpError, ProbeError, StunError, WireError,
};
