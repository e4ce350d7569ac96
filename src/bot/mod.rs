//! Request Behavior Heuristics
//!
//! Cheap per-request signals that a client is automated:
//! - Missing or implausibly short User-Agent
//! - Self-identified bot, crawler or scanner User-Agent
//! - Missing headers every browser sends (Accept, Accept-Language)
//!
//! These feed the gate's behavior check and the scraper pattern tags.

pub mod signatures;

pub use signatures::{UserAgentClass, UserAgentSignatures};

use serde::Serialize;

use crate::request::GateRequest;

const SHORT_USER_AGENT: usize = 10;
const WEIGHT_WEAK_USER_AGENT: f64 = 0.3;
const WEIGHT_BOT_USER_AGENT: f64 = 0.5;
const WEIGHT_MISSING_HEADERS: f64 = 0.2;

/// Individual finding from the heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorSignal {
    MissingUserAgent,
    ShortUserAgent,
    BotUserAgent,
    MissingBrowserHeaders,
}

/// Heuristic score for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorAssessment {
    /// Sum of signal weights, capped at 1.0
    pub score: f64,
    pub signals: Vec<BehaviorSignal>,
    #[serde(skip)]
    pub user_agent: UserAgentClass,
}

/// Scores requests on header and User-Agent heuristics
#[derive(Default)]
pub struct BehaviorAnalyzer {
    signatures: UserAgentSignatures,
}

impl BehaviorAnalyzer {
    /// Create a new analyzer
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a User-Agent string
    pub fn classify_user_agent(&self, user_agent: &str) -> UserAgentClass {
        self.signatures.classify(user_agent)
    }

    /// Score a request
    pub fn assess(&self, request: &GateRequest) -> BehaviorAssessment {
        let mut score = 0.0;
        let mut signals = Vec::new();

        let user_agent = request.user_agent().trim();
        if user_agent.is_empty() {
            score += WEIGHT_WEAK_USER_AGENT;
            signals.push(BehaviorSignal::MissingUserAgent);
        } else if user_agent.len() < SHORT_USER_AGENT {
            score += WEIGHT_WEAK_USER_AGENT;
            signals.push(BehaviorSignal::ShortUserAgent);
        }

        let class = self.signatures.classify(user_agent);
        if class.is_bot_like() {
            score += WEIGHT_BOT_USER_AGENT;
            signals.push(BehaviorSignal::BotUserAgent);
        }

        if missing_browser_headers(request) {
            score += WEIGHT_MISSING_HEADERS;
            signals.push(BehaviorSignal::MissingBrowserHeaders);
        }

        BehaviorAssessment {
            score: f64::min(score, 1.0),
            signals,
            user_agent: class,
        }
    }
}

/// True when Accept or Accept-Language is absent
pub fn missing_browser_headers(request: &GateRequest) -> bool {
    !request.has_header("accept") || !request.has_header("accept-language")
}
