//! Rate limit key derivation.
//!
//! Each key scopes one independent bucket. Callers derive it from whatever
//! identifies the client: its IP, an API credential, or an authenticated
//! user id.

use std::fmt;
use std::net::IpAddr;

/// The identity a bucket is kept for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Key by client address.
    pub fn ip(addr: IpAddr) -> Self {
        Self(addr.to_string())
    }

    /// Key by API credential, falling back to the client address when the
    /// credential is missing or empty.
    pub fn api_key(token: Option<&str>, fallback: IpAddr) -> Self {
        match token {
            Some(token) if !token.is_empty() => Self(format!("apikey:{}", token)),
            _ => Self::ip(fallback),
        }
    }

    /// Key by user id, falling back to the client address when no user is known.
    pub fn user(user_id: Option<&str>, fallback: IpAddr) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => Self(format!("user:{}", id)),
            _ => Self::ip(fallback),
        }
    }

    /// The key as passed to the limiter.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for RateLimitKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for RateLimitKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

    #[test]
    fn test_ip_key() {
        assert_eq!(RateLimitKey::ip(ADDR).as_str(), "192.168.1.10");
    }

    #[test]
    fn test_api_key() {
        assert_eq!(
            RateLimitKey::api_key(Some("abc123"), ADDR).as_str(),
            "apikey:abc123"
        );
        assert_eq!(RateLimitKey::api_key(Some(""), ADDR), RateLimitKey::ip(ADDR));
        assert_eq!(RateLimitKey::api_key(None, ADDR), RateLimitKey::ip(ADDR));
    }

    #[test]
    fn test_user_key() {
        assert_eq!(RateLimitKey::user(Some("42"), ADDR).to_string(), "user:42");
        assert_eq!(RateLimitKey::user(None, ADDR).as_str(), "192.168.1.10");
    }

    #[test]
    fn test_credentials_used_verbatim() {
        assert_eq!(
            RateLimitKey::api_key(Some(" abc "), ADDR).as_str(),
            "apikey: abc "
        );
        assert_eq!(RateLimitKey::user(Some(" 42"), ADDR).as_str(), "user: 42");
    }
}
