//! Request View
//!
//! The subset of an inbound HTTP request the gate looks at, plus client IP
//! extraction from proxy headers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound request as seen by the gate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateRequest {
    /// Client IP (already resolved through trusted proxies)
    pub ip: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl GateRequest {
    /// Create a request with no headers
    pub fn new(ip: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            session_id: None,
        }
    }

    /// Add a header value (names are stored lowercase)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Attach a session identifier
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// User-Agent, empty when absent
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }
}

/// First value of a header, matched case-insensitively
pub fn header_value<'a>(headers: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    if let Some(values) = headers.get(name) {
        return values.first().map(|s| s.as_str());
    }
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|s| s.as_str())
}

/// Resolve the client IP.
///
/// With `trust_forwarded` set, proxy headers are consulted in order:
/// `cf-connecting-ip`, the first `x-forwarded-for` hop, `x-real-ip`. Falls back
/// to the socket address, then to `"unknown"`.
pub fn client_ip(
    headers: &HashMap<String, Vec<String>>,
    remote_addr: Option<&str>,
    trust_forwarded: bool,
) -> String {
    if trust_forwarded {
        if let Some(ip) = header_value(headers, "cf-connecting-ip").map(str::trim) {
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
        if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return first.to_string();
            }
        }
        if let Some(ip) = header_value(headers, "x-real-ip").map(str::trim) {
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    remote_addr
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_from_vec(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in pairs {
            headers
                .entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
        headers
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = GateRequest {
            ip: "1.2.3.4".to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: headers_from_vec(&[("User-Agent", "Mozilla/5.0")]),
            session_id: None,
        };
        assert_eq!(req.header("user-agent"), Some("Mozilla/5.0"));
        assert_eq!(req.user_agent(), "Mozilla/5.0");
        assert!(!req.has_header("accept"));
    }

    #[test]
    fn test_builder_lowercases_names() {
        let req = GateRequest::new("1.2.3.4", "GET", "/").with_header("Accept", "text/html");
        assert!(req.headers.contains_key("accept"));
        assert_eq!(req.header("ACCEPT"), Some("text/html"));
    }

    #[test]
    fn test_client_ip_precedence() {
        let headers = headers_from_vec(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&headers, Some("10.0.0.9"), true), "203.0.113.7");

        let headers = headers_from_vec(&[
            ("cf-connecting-ip", "192.0.2.1"),
            ("x-forwarded-for", "203.0.113.7"),
        ]);
        assert_eq!(client_ip(&headers, None, true), "192.0.2.1");

        let headers = headers_from_vec(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&headers, None, true), "198.51.100.2");
    }

    #[test]
    fn test_client_ip_untrusted_proxy_headers() {
        let headers = headers_from_vec(&[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(client_ip(&headers, Some("10.0.0.9"), false), "10.0.0.9");
        assert_eq!(client_ip(&HashMap::new(), None, false), "unknown");
    }

    #[test]
    fn test_deserialize_defaults() {
        let req: GateRequest = serde_json::from_str(r#"{"ip": "1.2.3.4", "path": "/"}"#).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_empty());
        assert!(req.session_id.is_none());
    }
}
