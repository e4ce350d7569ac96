//! Gate Decisions
//!
//! What `evaluate` returns to the web layer, and the bodies the web layer
//! sends for each outcome.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

use crate::challenge::ChallengePayload;

pub const STATUS_OK: u16 = 200;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Why a challenge was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeReason {
    LowReputation,
    SuspiciousActivity,
    ProtectedPath,
    NewIpVerification,
    SuspiciousBehavior,
}

impl ChallengeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeReason::LowReputation => "low_reputation",
            ChallengeReason::SuspiciousActivity => "suspicious_activity",
            ChallengeReason::ProtectedPath => "protected_path",
            ChallengeReason::NewIpVerification => "new_ip_verification",
            ChallengeReason::SuspiciousBehavior => "suspicious_behavior",
        }
    }
}

impl fmt::Display for ChallengeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a trap response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum TrapBody {
    /// Plain not-found
    Empty,
    Json(Value),
    Html(String),
}

/// Outcome of evaluating one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    Challenge {
        http_status: u16,
        reason: ChallengeReason,
        payload: ChallengePayload,
    },
    Blocked {
        http_status: u16,
        blocked_at: u64,
        reason: String,
        permanent: bool,
        contact: String,
    },
    TrapResponse {
        http_status: u16,
        /// Delay the web layer applies before responding
        delay_ms: u64,
        body: TrapBody,
    },
}

/// Serialized response for the web layer
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    pub content_type: &'static str,
    pub body: String,
}

impl GateDecision {
    /// HTTP status the web layer should use; `None` for allow
    pub fn http_status(&self) -> Option<u16> {
        match self {
            GateDecision::Allow => None,
            GateDecision::Challenge { http_status, .. }
            | GateDecision::Blocked { http_status, .. }
            | GateDecision::TrapResponse { http_status, .. } => Some(*http_status),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    pub fn is_challenge(&self) -> bool {
        matches!(self, GateDecision::Challenge { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, GateDecision::Blocked { .. })
    }

    pub fn is_trap_response(&self) -> bool {
        matches!(self, GateDecision::TrapResponse { .. })
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Allow => "allow",
            GateDecision::Challenge { .. } => "challenge",
            GateDecision::Blocked { .. } => "blocked",
            GateDecision::TrapResponse { .. } => "trap_response",
        }
    }

    /// Body the web layer sends; `None` for allow.
    ///
    /// Block reasons and scores stay server-side.
    pub fn response_body(&self) -> Option<ResponseBody> {
        let json_body = |value: Value| ResponseBody {
            content_type: "application/json",
            body: value.to_string(),
        };

        match self {
            GateDecision::Allow => None,
            GateDecision::Challenge { payload, .. } => Some(json_body(json!({
                "error": "Challenge required",
                "message": "Please complete the challenge to continue",
                "challenge": payload,
            }))),
            GateDecision::Blocked {
                blocked_at,
                permanent,
                contact,
                ..
            } => Some(json_body(json!({
                "error": "Access Denied",
                "message": "Your IP address has been blocked due to suspicious activity",
                "blocked_at": blocked_at,
                "permanent": permanent,
                "contact": contact,
            }))),
            GateDecision::TrapResponse { body, .. } => Some(match body {
                TrapBody::Empty => ResponseBody {
                    content_type: "text/plain; charset=utf-8",
                    body: String::new(),
                },
                TrapBody::Json(value) => json_body(value.clone()),
                TrapBody::Html(html) => ResponseBody {
                    content_type: "text/html; charset=utf-8",
                    body: html.clone(),
                },
            }),
        }
    }
}

/// Result of a challenge submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl ChallengeVerification {
    pub fn success() -> Self {
        Self {
            valid: true,
            error: None,
            attempts_remaining: None,
        }
    }

    pub fn failure(error: &str, attempts_remaining: Option<u32>) -> Self {
        Self {
            valid: false,
            error: Some(error.to_string()),
            attempts_remaining,
        }
    }
}
