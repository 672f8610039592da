use std::io::{Error, ErrorKind, Result};
use std::net::IpAddr;

use anyhow::Context;
use nix::ifaddrs::getifaddrs;

/// First IPv4 address of interface `name`, else its first IPv6 address
pub fn get_interface_ip(name: &str) -> Result<IpAddr> {
    let mut ipv6 = None;
    for ifa in getifaddrs()? {
        if ifa.interface_name != name {
            continue;
        }
        let Some(addr) = ifa.address else { continue };
        if let Some(sin) = addr.as_sockaddr_in() {
            return Ok(IpAddr::V4(sin.ip()));
        }
        if ipv6.is_none()
            && let Some(sin6) = addr.as_sockaddr_in6()
        {
            ipv6 = Some(IpAddr::V6(sin6.ip()));
        }
    }
    ipv6.ok_or_else(|| Error::from(ErrorKind::NotFound))
}

/// Resolve `--interface`: an IP address, or the name of a local interface
pub fn resolve_interface(value: &str) -> anyhow::Result<IpAddr> {
    if let Ok(ip) = value.parse() {
        return Ok(ip);
    }
    get_interface_ip(value).with_context(|| format!("Network interface '{}' not found or has no IP address", value))
}
