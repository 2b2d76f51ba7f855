//! Caller identity resolution.
//!
//! Precedence: user header > API key header > forwarded IP > peer IP.

use serde::{Deserialize, Serialize};

/// Default header names consumed by the HTTP surface.
pub const USER_HEADER: &str = "X-User-Id";
pub const API_KEY_HEADER: &str = "X-API-Key";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    User,
    ApiKey,
    Ip,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::User => "user",
            ClientKind::ApiKey => "api_key",
            ClientKind::Ip => "ip",
        }
    }
}

/// Normalized client identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey {
    pub kind: ClientKind,
    pub id: String,
    /// `kind + ":" + id`, the canonical form used in dimension values.
    pub key: String,
}

impl ClientKey {
    fn new(kind: ClientKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            key: format!("{}:{}", kind.as_str(), id),
        }
    }
}

/// Resolve the caller from raw header/peer values.
pub fn resolve_client(
    user: Option<&str>,
    api_key: Option<&str>,
    forwarded_for: Option<&str>,
    peer_addr: Option<&str>,
) -> Option<ClientKey> {
    if let Some(user) = user.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(ClientKey::new(ClientKind::User, user));
    }
    if let Some(key) = api_key.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(ClientKey::new(ClientKind::ApiKey, key));
    }
    if let Some(ip) = forwarded_for.and_then(first_forwarded_ip) {
        return Some(ClientKey::new(ClientKind::Ip, &ip));
    }
    if let Some(ip) = peer_addr.map(strip_port).filter(|s| !s.is_empty()) {
        return Some(ClientKey::new(ClientKind::Ip, &ip));
    }
    None
}

/// First entry of a comma-separated `X-Forwarded-For` value.
pub fn first_forwarded_ip(value: &str) -> Option<String> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Drop a `:port` suffix from a socket address, keeping bare hosts intact.
pub fn strip_port(addr: &str) -> String {
    if let Some((host, port)) = addr.rsplit_once(':') {
        if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
            // Bracketed IPv6 with port.
            if host.starts_with('[') && host.ends_with(']') {
                return host[1..host.len() - 1].to_string();
            }
            // IPv4/hostname with port; a bare IPv6 literal keeps its colons.
            if !host.is_empty() && !host.contains(':') {
                return host.to_string();
            }
        }
    }
    addr.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_user_first() {
        let key = resolve_client(Some("u1"), Some("k1"), Some("9.9.9.9"), Some("1.1.1.1:80"));
        let key = key.unwrap();
        assert_eq!(key.kind, ClientKind::User);
        assert_eq!(key.key, "user:u1");
    }

    #[test]
    fn test_api_key_before_ip() {
        let key = resolve_client(None, Some("k1"), Some("9.9.9.9"), None).unwrap();
        assert_eq!(key.kind, ClientKind::ApiKey);
        assert_eq!(key.key, "api_key:k1");
    }

    #[test]
    fn test_forwarded_ip_takes_first_entry() {
        let key = resolve_client(None, None, Some(" 9.9.9.9 , 8.8.8.8"), None).unwrap();
        assert_eq!(key.kind, ClientKind::Ip);
        assert_eq!(key.id, "9.9.9.9");
    }

    #[test]
    fn test_peer_addr_fallback_strips_port() {
        let key = resolve_client(None, None, None, Some("10.0.0.2:51234")).unwrap();
        assert_eq!(key.id, "10.0.0.2");
    }

    #[test]
    fn test_blank_headers_are_skipped() {
        assert!(resolve_client(Some("  "), None, Some(""), None).is_none());
    }

    #[test]
    fn test_strip_port_handles_ipv6() {
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
        assert_eq!(strip_port("10.0.0.2"), "10.0.0.2");
    }
}
