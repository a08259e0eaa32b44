use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pinhole_core::net::RemoteAddr;
use pinhole_core::session::{Session, SessionBuilder};
use serde::Deserialize;

use crate::cli::{self, Cli};

/// Built-in STUN fallback list, tried in order.
const DEFAULT_STUN_SERVERS: &[&str] = &[
    "fwa.lifesizecloud.com",
    "global.turn.twilio.com",
    "turn.cloudflare.com",
    "stun.isp.net.au",
    "stun.nextcloud.com",
    "stun.freeswitch.org",
    "stun.voip.blackberry.com",
    "stunserver.stunprotocol.org",
    "stun.sipnet.com",
    "stun.radiojar.com",
    "stun.sonetel.com",
    "stun.telnyx.com",
];

/// Default keep-alive probe host; any stable public HTTP endpoint works.
const DEFAULT_KEEPALIVE: &str = "www.baidu.com";

/// Optional TOML mirror of the CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    stun: Option<Vec<String>>,
    upnp: Option<bool>,
    keepalive: Option<String>,
    bind: Option<String>,
    interval: Option<u64>,
    settle: Option<u64>,
    exec: Option<String>,
}

/// Fully resolved run configuration.
#[derive(Debug)]
pub(crate) struct RunConfig {
    pub stun: Vec<RemoteAddr>,
    pub keepalive: RemoteAddr,
    pub bind: SocketAddr,
    pub upnp: bool,
    pub interval: Option<Duration>,
    pub settle: Option<Duration>,
    pub exec: Option<String>,
}

impl RunConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();
        let file = load_file(cli.config.as_deref())?;
        Ok(Self::merge(cli, file).unwrap_or_else(|e| e.exit()))
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self, clap::Error> {
        let stun_inputs = if cli.stun.is_empty() {
            file.stun.unwrap_or_else(|| {
                DEFAULT_STUN_SERVERS.iter().map(ToString::to_string).collect()
            })
        } else {
            cli.stun
        };
        if stun_inputs.is_empty() {
            return Err(cli::invalid("at least one STUN server is required"));
        }
        let stun = stun_inputs
            .iter()
            .map(|s| cli::parse_with_default_port(s, cli::STUN_PORT))
            .collect::<Result<Vec<_>, _>>()?;

        let keepalive = cli
            .keepalive
            .or(file.keepalive)
            .unwrap_or_else(|| DEFAULT_KEEPALIVE.to_string());
        let keepalive = cli::parse_with_default_port(&keepalive, cli::KEEPALIVE_PORT)?;

        let bind = match cli.bind.or(file.bind) {
            Some(bind) => cli::parse_bind(&bind)?,
            None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };

        Ok(Self {
            stun,
            keepalive,
            bind,
            upnp: cli.upnp || file.upnp.unwrap_or(false),
            interval: cli.interval.or(file.interval).map(Duration::from_secs),
            settle: cli.settle.or(file.settle).map(Duration::from_secs),
            exec: cli.exec.or(file.exec),
        })
    }

    pub fn session(&self) -> Result<Session, pinhole_core::Error> {
        let mut builder = SessionBuilder::new(self.stun.clone(), self.keepalive.clone())
            .bind(self.bind)
            .upnp(self.upnp);
        if let Some(interval) = self.interval {
            builder = builder.probe_interval(interval);
        }
        if let Some(settle) = self.settle {
            builder = builder.settle_delay(settle);
        }
        builder.build()
    }
}

fn load_file(path: Option<&Path>) -> anyhow::Result<FileConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}
