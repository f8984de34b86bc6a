//! Caller identities the gateway can meter by.
//!
//! Each extractor reads one attribute of the request through a small view
//! trait (`HasIpAddr`, `HasHeaders`, ...), so the same extractor works on
//! [`RequestParts`](crate::key::RequestParts) and on any framework request
//! that implements the views. An extractor returns `None` when the request
//! does not carry the attribute; the gateway denies such requests with
//! `KeyUnavailable`.

use std::net::IpAddr;

use crate::key::Key;

/// Request view: the peer address of the connection.
pub trait HasIpAddr {
    /// Address of the connected peer, if known.
    fn client_ip(&self) -> Option<IpAddr>;
}

/// Request view: the request path.
pub trait HasPath {
    /// Path, without the query string.
    fn path(&self) -> &str;
}

/// Request view: the request method.
pub trait HasMethod {
    /// Method name as sent by the client.
    fn method(&self) -> &str;
}

/// Request view: header lookup.
pub trait HasHeaders {
    /// First value of header `name`, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
}

/// Meter callers by client address: `ip:{addr}`.
///
/// By default the peer address is used. Behind a proxy, configure the
/// header the proxy writes; its first comma-separated entry wins and the
/// peer address is the fallback when the header is missing or empty.
#[derive(Debug, Clone, Default)]
pub struct IpKey {
    forwarded_header: Option<&'static str>,
}

impl IpKey {
    /// Key by peer address only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the client listed first in `X-Forwarded-For`.
    pub fn with_forwarded_for() -> Self {
        Self::with_header("x-forwarded-for")
    }

    /// Prefer the client address carried in `header`.
    pub fn with_header(header: &'static str) -> Self {
        Self {
            forwarded_header: Some(header),
        }
    }
}

impl<R> Key<R> for IpKey
where
    R: HasIpAddr + HasHeaders,
{
    fn extract(&self, request: &R) -> Option<String> {
        let forwarded = self
            .forwarded_header
            .and_then(|header| request.header(header))
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        match forwarded {
            Some(ip) => Some(format!("ip:{}", ip)),
            None => request.client_ip().map(|ip| format!("ip:{}", ip)),
        }
    }

    fn name(&self) -> &'static str {
        "ip"
    }
}

/// Meter callers by a credential header: `header:{name}:{value}`.
///
/// A missing or empty header yields no key.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: &'static str,
}

impl HeaderKey {
    /// Key by the value of header `name`.
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// `X-API-Key`.
    pub fn api_key() -> Self {
        Self::new("x-api-key")
    }

    /// `Authorization`.
    pub fn authorization() -> Self {
        Self::new("authorization")
    }
}

impl<R: HasHeaders> Key<R> for HeaderKey {
    fn extract(&self, request: &R) -> Option<String> {
        let value = request.header(self.name).filter(|v| !v.is_empty())?;
        Some(format!("header:{}:{}", self.name, value))
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

/// Meter by method: `method:{METHOD}`. Usually combined with another key.
#[derive(Debug, Clone, Default)]
pub struct MethodKey;

impl MethodKey {
    /// Create a method key.
    pub fn new() -> Self {
        Self
    }
}

impl<R: HasMethod> Key<R> for MethodKey {
    fn extract(&self, request: &R) -> Option<String> {
        Some(format!("method:{}", request.method()))
    }

    fn name(&self) -> &'static str {
        "method"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RequestParts;

    #[test]
    fn test_ip_key() {
        let key = IpKey::new();
        let req = RequestParts::new("GET", "/").with_client_ip("192.168.1.1".parse().unwrap());

        assert_eq!(key.extract(&req), Some("ip:192.168.1.1".to_string()));
        assert_eq!(key.extract(&RequestParts::new("GET", "/")), None);
    }

    #[test]
    fn test_ip_key_with_forwarded_for() {
        let key = IpKey::with_forwarded_for();
        let req = RequestParts::new("GET", "/")
            .with_client_ip("10.0.0.1".parse().unwrap())
            .with_header("X-Forwarded-For", "203.0.113.50, 70.41.3.18");

        assert_eq!(key.extract(&req), Some("ip:203.0.113.50".to_string()));
    }

    #[test]
    fn test_ip_key_ignores_empty_forwarded_for() {
        let key = IpKey::with_forwarded_for();
        let req = RequestParts::new("GET", "/")
            .with_client_ip("10.0.0.1".parse().unwrap())
            .with_header("x-forwarded-for", " ");

        assert_eq!(key.extract(&req), Some("ip:10.0.0.1".to_string()));
    }

    #[test]
    fn test_header_key() {
        let key = HeaderKey::api_key();
        let req = RequestParts::new("GET", "/").with_header("x-api-key", "secret-key");

        assert_eq!(key.extract(&req), Some("header:x-api-key:secret-key".to_string()));

        let empty = RequestParts::new("GET", "/").with_header("x-api-key", "");
        assert_eq!(key.extract(&empty), None);
        assert_eq!(key.extract(&RequestParts::new("GET", "/")), None);
    }

    #[test]
    fn test_method_key() {
        let key = MethodKey::new();
        let req = RequestParts::new("POST", "/");

        assert_eq!(key.extract(&req), Some("method:POST".to_string()));
    }
}
