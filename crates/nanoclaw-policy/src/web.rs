//! SSRF-safe URL validation for outbound web fetches.
//!
//! Validation parses the URL, checks the scheme and hostname against the
//! denylist, then resolves DNS and rejects any address in a private or
//! reserved range. IP-literal hosts are checked directly without resolution.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use url::Url;

/// Hostname suffixes that never leave the machine or the local network.
const BLOCKED_HOST_SUFFIXES: &[&str] = &[".local", ".internal"];

/// Exact hostnames that are always denied.
const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal"];

/// Check if an address is in a private/reserved range that must be blocked.
pub fn is_private_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => is_private_ipv4(ip),
        IpAddr::V6(ip) => is_private_ipv6(ip),
    }
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    // 127.0.0.0/8 (loopback)
    if octets[0] == 127 {
        return true;
    }
    // 10.0.0.0/8 (private)
    if octets[0] == 10 {
        return true;
    }
    // 172.16.0.0/12 (private)
    if octets[0] == 172 && (16..=31).contains(&octets[1]) {
        return true;
    }
    // 192.168.0.0/16 (private)
    if octets[0] == 192 && octets[1] == 168 {
        return true;
    }
    // 169.254.0.0/16 (link-local, includes cloud metadata 169.254.169.254)
    if octets[0] == 169 && octets[1] == 254 {
        return true;
    }
    // 0.0.0.0/8 (current network)
    if octets[0] == 0 {
        return true;
    }
    false
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let segments = ip.segments();
    // fc00::/7 (unique local)
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    // fe80::/10 (link-local)
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    // IPv4-mapped: ::ffff:a.b.c.d
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&v4);
    }
    false
}

/// Check a hostname against the static denylist.
fn is_blocked_hostname(host: &str) -> bool {
    let host = host.to_lowercase();
    if BLOCKED_HOSTS.contains(&host.as_str()) {
        return true;
    }
    BLOCKED_HOST_SUFFIXES.iter().any(|s| host.ends_with(s))
}

/// Validate a URL for outbound fetching.
///
/// Returns the parsed URL, or a human-readable cause. The caller surfaces
/// rejections as blocked results: "URL blocked by web fetch safety policy".
pub fn validate_fetch_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme: {other}")),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL has no host".to_string())?;

    if is_blocked_hostname(host) {
        return Err(format!("blocked hostname: {host}"));
    }

    // IP-literal hosts are checked directly.
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(format!("private address: {ip}"));
        }
        return Ok(parsed);
    }

    // Resolve and check every returned address.
    let port = parsed.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = format!("{host}:{port}")
        .to_socket_addrs()
        .map_err(|e| format!("DNS resolution failed for {host}: {e}"))?
        .collect();

    if addrs.is_empty() {
        return Err(format!("DNS returned no addresses for {host}"));
    }

    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            return Err(format!(
                "host {host} resolves to private address {}",
                addr.ip()
            ));
        }
    }

    Ok(parsed)
}
