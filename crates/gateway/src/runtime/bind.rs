//! Listen address resolution for `gateway.bind`.
//!
//! - `loopback` -> 127.0.0.1
//! - `all` -> 0.0.0.0
//! - `tailnet` -> first IPv4 of an interface named like `tailscale*`,
//!   falling back to 0.0.0.0

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::Command;

use sb_domain::config::BindMode;

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("could not list network interfaces: {0}")]
    InterfaceQuery(String),

    #[error("no interface named like 'tailscale' has an IPv4 address")]
    TailscaleNotFound,
}

pub fn resolve_bind_addr(mode: BindMode, port: u16) -> SocketAddr {
    let ip = match mode {
        BindMode::Loopback => IpAddr::V4(Ipv4Addr::LOCALHOST),
        BindMode::All => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        BindMode::Tailnet => match detect_tailscale_ip() {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(error = %e, "tailnet bind unavailable, listening on all interfaces");
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        },
    };
    SocketAddr::new(ip, port)
}

fn detect_tailscale_ip() -> Result<IpAddr, BindError> {
    let output = Command::new("ip")
        .args(["-o", "-4", "addr", "show"])
        .output()
        .map_err(|e| BindError::InterfaceQuery(e.to_string()))?;
    if !output.status.success() {
        return Err(BindError::InterfaceQuery(format!(
            "ip exited with {}",
            output.status
        )));
    }
    parse_tailscale_ip(&String::from_utf8_lossy(&output.stdout)).ok_or(BindError::TailscaleNotFound)
}

/// Parse `ip -o -4 addr show` output, e.g.
/// `5: tailscale0    inet 100.101.102.103/32 scope global tailscale0`.
fn parse_tailscale_ip(output: &str) -> Option<IpAddr> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let _index = parts.next()?;
        let iface = parts.next()?;
        if !iface.contains("tailscale") {
            return None;
        }
        let mut rest = parts.skip_while(|p| *p != "inet");
        rest.next()?;
        let cidr = rest.next()?;
        let addr = cidr.split('/').next()?;
        addr.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
    })
}

/// Whether `ip` is a loopback address. Used to fence `/api/internal/*`.
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_modes() {
        assert_eq!(
            resolve_bind_addr(BindMode::Loopback, 7420),
            "127.0.0.1:7420".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_bind_addr(BindMode::All, 80),
            "0.0.0.0:80".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn parses_tailscale_interface() {
        let out = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever
2: eth0    inet 192.168.1.20/24 brd 192.168.1.255 scope global eth0
5: tailscale0    inet 100.101.102.103/32 scope global tailscale0
";
        assert_eq!(
            parse_tailscale_ip(out),
            Some("100.101.102.103".parse().unwrap())
        );
        assert_eq!(parse_tailscale_ip("2: eth0    inet 10.0.0.2/24"), None);
    }

    #[test]
    fn local_addresses() {
        assert!(is_local("127.0.0.1".parse().unwrap()));
        assert!(is_local("::1".parse().unwrap()));
        assert!(is_local("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_local("10.0.0.5".parse().unwrap()));
    }
}
