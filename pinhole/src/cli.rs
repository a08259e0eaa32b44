use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use pinhole_core::net::RemoteAddr;

pub(crate) const STUN_PORT: u16 = 3478;
pub(crate) const KEEPALIVE_PORT: u16 = 80;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// STUN server (host[:port], default port: 3478); repeat for fallbacks
    #[arg(short, long = "stun", value_name = "ADDR")]
    pub stun: Vec<String>,

    /// Attempt UPnP router port forwarding
    #[arg(short, long)]
    pub upnp: bool,

    /// Keep-alive HTTP host (host[:port], default port: 80)
    #[arg(short, long, value_name = "ADDR")]
    pub keepalive: Option<String>,

    /// Local bind address ([addr:]port, default: 0)
    #[arg(short, long, value_name = "BIND")]
    pub bind: Option<String>,

    /// Keep-alive probe interval in seconds (default: 15)
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Settle delay before the first probe in seconds (default: 60)
    #[arg(long, value_name = "SECS")]
    pub settle: Option<u64>,

    /// Command run whenever the public mapping changes
    #[arg(short, long, value_name = "CMD")]
    pub exec: Option<String>,

    /// TOML config file; flags override file values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub(crate) fn invalid(msg: &str) -> clap::Error {
    Cli::command().error(clap::error::ErrorKind::InvalidValue, msg)
}

/// `PORT` or `ADDR:PORT`.
pub(crate) fn parse_bind(s: &str) -> Result<SocketAddr, clap::Error> {
    if let Ok(port) = s.parse::<u16>() {
        Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    } else {
        s.parse::<SocketAddr>()
            .map_err(|_| invalid("invalid bind address: expected PORT or ADDR:PORT"))
    }
}

/// `HOST[:PORT]` with a default port applied when omitted.
pub(crate) fn parse_with_default_port(
    s: &str,
    default_port: u16,
) -> Result<RemoteAddr, clap::Error> {
    // ip:port
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(RemoteAddr::from_addr(addr));
    }

    // host:port
    if let Some((host, port_str)) = s.rsplit_once(':') {
        let port: u16 = port_str
            .parse()
            .map_err(|_| invalid("invalid address: expected HOST[:PORT]"))?;
        return Ok(RemoteAddr::from_host(host, port));
    }

    // bare ip → from_addr; bare domain → from_host
    if let Ok(addr) = format!("{s}:{default_port}").parse::<SocketAddr>() {
        Ok(RemoteAddr::from_addr(addr))
    } else {
        Ok(RemoteAddr::from_host(s, default_port))
    }
}
