//! Startup environment check.
//!
//! NAT traversal cannot work behind Docker's user-mode networking: the
//! mapping discovered through the embedded NAT belongs to the container
//! bridge, not the real gateway, so the session would loop forever on a
//! dead mapping. Detect the known-broken setups before any socket work
//! and refuse to start.

#[cfg(target_os = "linux")]
use std::net::IpAddr;

use crate::error::Error;

/// Verify the host network can carry NAT traversal.
///
/// Fatal on a positive detection; anything indeterminate passes.
#[cfg(target_os = "linux")]
pub fn check_host_network() -> Result<(), Error> {
    use std::net::ToSocketAddrs;

    if !std::path::Path::new("/.dockerenv").exists() {
        return Ok(());
    }
    let Ok(mac) = std::fs::read_to_string("/sys/class/net/eth0/address") else {
        return Ok(());
    };
    let mac = mac.trim();

    let Ok(hostname) = hostname() else {
        return Ok(());
    };

    let resolved = (hostname.as_str(), 0u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.find(std::net::SocketAddr::is_ipv4));
    match resolved {
        Some(addr) => {
            if let IpAddr::V4(ip) = addr.ip()
                && mac == bridge_mac(ip)
            {
                return Err(Error::UnsupportedNetwork(
                    "Docker's `--net=host` option is required".to_string(),
                ));
            }
        }
        None => {
            tracing::warn!(%hostname, "cannot resolve own hostname, skipping network check");
            return Ok(());
        }
    }

    if let Ok(osrelease) = std::fs::read_to_string("/proc/sys/kernel/osrelease")
        && is_desktop_kernel(&osrelease, &hostname)
    {
        return Err(Error::UnsupportedNetwork(
            "network from Docker Desktop is not supported".to_string(),
        ));
    }

    Ok(())
}

/// Verify the host network can carry NAT traversal.
#[cfg(not(target_os = "linux"))]
pub fn check_host_network() -> Result<(), Error> {
    Ok(())
}

/// MAC address Docker derives for a bridge-networked container:
/// `02:42:` followed by the container IP.
#[cfg(target_os = "linux")]
fn bridge_mac(ip: std::net::Ipv4Addr) -> String {
    let o = ip.octets();
    format!("02:42:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3])
}

/// Docker Desktop / WSL2 kernels paired with the `docker-desktop` host.
#[cfg(target_os = "linux")]
fn is_desktop_kernel(osrelease: &str, hostname: &str) -> bool {
    let suffix = osrelease.trim().rsplit('-').next().unwrap_or("");
    matches!(suffix.to_ascii_lowercase().as_str(), "linuxkit" | "wsl2")
        && hostname.eq_ignore_ascii_case("docker-desktop")
}

#[cfg(target_os = "linux")]
fn hostname() -> std::io::Result<String> {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}
