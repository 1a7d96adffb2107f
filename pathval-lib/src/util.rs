//! Small helpers shared across the crate: host name matching, IP address
//! handling and time.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Match a certificate DNS name (possibly a wildcard) against a host name.
///
/// Comparison is ASCII case-insensitive. A wildcard is only honored as the
/// entire left-most label (`*.example.com`), it matches exactly one label,
/// and it is never accepted when the remaining suffix is a single label.
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.strip_suffix('.').unwrap_or(pattern);
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    if pattern.is_empty() || hostname.is_empty() {
        return false;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        if suffix.is_empty() || !suffix.contains('.') || suffix.contains('*') {
            return false;
        }
        return match hostname.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        };
    }

    if pattern.contains('*') {
        return false;
    }
    pattern.eq_ignore_ascii_case(hostname)
}

/// Heuristic deciding whether a common name is meant as a DNS name.
///
/// Used both by host name checking and by the name constraints common name
/// fallback, so the two can never disagree.
pub fn looks_like_dns_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    let name = name.strip_prefix("*.").unwrap_or(name);
    if name.is_empty() {
        return false;
    }

    let bytes = name.as_bytes();
    let mut label_start = true;
    for (i, &c) in bytes.iter().enumerate() {
        if c.is_ascii_alphanumeric() || c == b'_' || c == b':' {
            label_start = false;
            continue;
        }
        if c == b'-' && !label_start {
            continue;
        }
        if c == b'.' && !label_start && i + 1 < bytes.len() {
            label_start = true;
            continue;
        }
        return false;
    }
    true
}

/// Network byte representation of an address (4 or 16 bytes).
pub fn ip_to_bytes(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Format 4 or 16 raw bytes as an IP address, anything else as hex.
pub fn format_ip_bytes(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(bytes);
            IpAddr::from(octets).to_string()
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            IpAddr::from(octets).to_string()
        }
        _ => hex(bytes),
    }
}

/// Lowercase hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Strip redundant leading zero bytes from a big-endian integer.
pub fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_exact_and_case() {
        assert!(hostname_matches("www.example.com", "WWW.Example.COM"));
        assert!(hostname_matches("www.example.com.", "www.example.com"));
        assert!(!hostname_matches("www.example.com", "example.com"));
    }

    #[test]
    fn test_hostname_wildcard() {
        assert!(hostname_matches("*.example.com", "foo.example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("*.com", "example.com"));
        assert!(!hostname_matches("f*.example.com", "foo.example.com"));
    }

    #[test]
    fn test_looks_like_dns_name() {
        assert!(looks_like_dns_name("example.com"));
        assert!(looks_like_dns_name("*.example.com"));
        assert!(looks_like_dns_name("example.com."));
        assert!(looks_like_dns_name("under_score.example"));
        assert!(looks_like_dns_name("localhost"));
        assert!(!looks_like_dns_name("Example Corp"));
        assert!(!looks_like_dns_name(""));
        assert!(!looks_like_dns_name("-leading.example"));
        assert!(!looks_like_dns_name("a..b"));
        assert!(!looks_like_dns_name("trailing.."));
    }

    #[test]
    fn test_ip_bytes_and_formats() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(ip_to_bytes(&v4), [192, 0, 2, 1]);
        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(ip_to_bytes(&v6).len(), 16);
        assert_eq!(format_ip_bytes(&[10, 0, 0, 1]), "10.0.0.1");
        assert_eq!(format_ip_bytes(&[1, 2, 3]), "010203");
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert_eq!(strip_leading_zeros(&[0, 0]), &[] as &[u8]);
    }
}
