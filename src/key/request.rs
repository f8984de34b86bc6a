//! Owned request metadata.

use std::net::IpAddr;

use crate::key::{HasHeaders, HasIpAddr, HasMethod, HasPath};

/// The parts of a request key extractors look at.
///
/// Framework integrations copy these out of their request type so the
/// gateway never holds on to the request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParts {
    method: String,
    path: String,
    client_ip: Option<IpAddr>,
    headers: Vec<(String, String)>,
}

impl RequestParts {
    /// Create request parts for `method` and `path`.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the peer address.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Add a header. Names are stored lowercase.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }
}

impl HasIpAddr for RequestParts {
    fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }
}

impl HasPath for RequestParts {
    fn path(&self) -> &str {
        &self.path
    }
}

impl HasMethod for RequestParts {
    fn method(&self) -> &str {
        &self.method
    }
}

impl HasHeaders for RequestParts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
