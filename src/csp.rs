//! Content Security Policy Support
//!
//! Pages that embed trap fragments or challenge widgets are served with a
//! nonce-based CSP:
//! - Nonce issuance and validation with a fixed lifetime
//! - Header construction for strict, moderate and development policies
//! - SHA-256 hash sources for static inline scripts
//! - Auditing an existing policy for unsafe directives

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::clock::SharedClock;

/// Policy preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CspPolicy {
    Strict,
    Moderate,
    Development,
}

impl CspPolicy {
    /// Header value with the nonce as a script and style source
    pub fn header_value(&self, nonce: &str) -> String {
        match self {
            CspPolicy::Strict => format!(
                "default-src 'self'; script-src 'self' 'nonce-{n}'; style-src 'self' 'nonce-{n}'; \
                 img-src 'self' data:; font-src 'self'; connect-src 'self'; frame-ancestors 'none'; \
                 base-uri 'self'; form-action 'self';",
                n = nonce
            ),
            CspPolicy::Moderate => format!(
                "default-src 'self'; script-src 'self' 'nonce-{n}'; style-src 'self' 'nonce-{n}'; \
                 img-src 'self' data: https:; font-src 'self' https:; connect-src 'self' https:; \
                 frame-ancestors 'none';",
                n = nonce
            ),
            CspPolicy::Development => format!(
                "default-src 'self' 'unsafe-inline' 'unsafe-eval'; \
                 script-src 'self' 'unsafe-inline' 'unsafe-eval' 'nonce-{n}' https:; \
                 style-src 'self' 'unsafe-inline' 'nonce-{n}' https:;",
                n = nonce
            ),
        }
    }
}

/// Problem found in a policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CspIssue {
    pub directive: String,
    pub issue: String,
    pub severity: CspSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CspSeverity {
    Medium,
    High,
    Critical,
}

/// Issued nonces and their issue time
pub struct NonceRegistry {
    ttl_ms: u64,
    nonces: RwLock<HashMap<String, u64>>,
    clock: SharedClock,
}

impl NonceRegistry {
    /// Create a new registry
    pub fn new(ttl_ms: u64, clock: SharedClock) -> Self {
        Self {
            ttl_ms,
            nonces: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Issue a fresh nonce (16 random bytes, base64)
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = STANDARD.encode(bytes);

        let now = self.clock.now_ms();
        let mut nonces = self.nonces.write();
        nonces.retain(|_, issued| now.saturating_sub(*issued) <= self.ttl_ms);
        nonces.insert(nonce.clone(), now);
        nonce
    }

    /// True while the nonce is known and within its lifetime
    pub fn validate(&self, nonce: &str) -> bool {
        let now = self.clock.now_ms();
        let issued = match self.nonces.read().get(nonce) {
            Some(issued) => *issued,
            None => return false,
        };
        if now.saturating_sub(issued) > self.ttl_ms {
            self.nonces.write().remove(nonce);
            return false;
        }
        true
    }

    /// Fresh nonce plus the header value that allows it
    pub fn header(&self, policy: CspPolicy) -> (String, String) {
        let nonce = self.generate();
        let value = policy.header_value(&nonce);
        (nonce, value)
    }

    /// Drop expired nonces; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut nonces = self.nonces.write();
        let before = nonces.len();
        nonces.retain(|_, issued| now.saturating_sub(*issued) <= self.ttl_ms);
        before - nonces.len()
    }

    pub fn len(&self) -> usize {
        self.nonces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// CSP hash source for an inline script, e.g. `'sha256-...'`
pub fn script_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("'sha256-{}'", STANDARD.encode(hasher.finalize()))
}

/// Flag unsafe or missing directives in a policy
pub fn audit(policy: &str) -> Vec<CspIssue> {
    let mut issues = Vec::new();
    let mut push = |directive: &str, issue: &str, severity| {
        issues.push(CspIssue {
            directive: directive.to_string(),
            issue: issue.to_string(),
            severity,
        })
    };

    if policy.contains("'unsafe-inline'") {
        push(
            "script-src",
            "Contains 'unsafe-inline' which allows inline scripts",
            CspSeverity::Medium,
        );
    }
    if policy.contains("'unsafe-eval'") {
        push("script-src", "Contains 'unsafe-eval' which allows eval()", CspSeverity::High);
    }
    if policy.contains("script-src *") || policy.contains("script-src 'self' *") {
        push("script-src", "Allows scripts from any source", CspSeverity::Critical);
    }
    if policy.contains("default-src *") {
        push("default-src", "Allows resources from any source", CspSeverity::High);
    }
    if !policy.contains("script-src") && !policy.contains("default-src") {
        push("script-src", "Missing script-src directive", CspSeverity::Medium);
    }
    if !policy.contains("frame-ancestors") {
        push(
            "frame-ancestors",
            "Missing frame-ancestors, page can be framed",
            CspSeverity::Medium,
        );
    }

    issues
}
