//! Security Events
//!
//! Structured security-log events and alerts. Routine events describe state
//! changes (blocks, challenges, trap hits); alerts are reserved for conditions
//! an operator may want paged on, such as permanent blocks.
//!
//! Sinks:
//! - [`TracingSink`]: emits under the `security` tracing target (default)
//! - [`MemorySink`]: keeps everything in memory for audits and tests

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ChallengeType;
use crate::traps::TrapKind;

/// Routine security event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    IpBlocked {
        ip: String,
        reason: String,
        permanent: bool,
        expires_at: Option<u64>,
        violations: u32,
        timestamp: u64,
    },
    IpUnblocked {
        ip: String,
        timestamp: u64,
    },
    ChallengeIssued {
        ip: String,
        challenge_id: String,
        challenge_type: ChallengeType,
        reason: String,
        timestamp: u64,
    },
    ChallengeSolved {
        ip: Option<String>,
        challenge_id: String,
        timestamp: u64,
    },
    ChallengeFailed {
        ip: Option<String>,
        challenge_id: String,
        error: String,
        timestamp: u64,
    },
    HoneypotTriggered {
        ip: String,
        trap_id: String,
        trap_kind: TrapKind,
        path: String,
        user_agent: String,
        timestamp: u64,
    },
    TrapsRotated {
        rotated: usize,
        timestamp: u64,
    },
}

impl SecurityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::IpBlocked { .. } => "ip_blocked",
            SecurityEvent::IpUnblocked { .. } => "ip_unblocked",
            SecurityEvent::ChallengeIssued { .. } => "challenge_issued",
            SecurityEvent::ChallengeSolved { .. } => "challenge_solved",
            SecurityEvent::ChallengeFailed { .. } => "challenge_failed",
            SecurityEvent::HoneypotTriggered { .. } => "honeypot_triggered",
            SecurityEvent::TrapsRotated { .. } => "traps_rotated",
        }
    }
}

/// Operator alert, distinct from routine logging
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum SecurityAlert {
    PermanentIpBlock {
        ip: String,
        reason: String,
        violations: u32,
        timestamp: u64,
    },
    CriticalScraper {
        ip: String,
        trap_triggers: u32,
        behavior_score: f64,
        timestamp: u64,
    },
}

/// Destination for security events and alerts
pub trait SecuritySink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
    fn alert(&self, alert: &SecurityAlert);
}

pub type SharedSink = Arc<dyn SecuritySink>;

/// Logs events through `tracing` under the `security` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SecuritySink for TracingSink {
    fn record(&self, event: &SecurityEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(target: "security", event = event.name(), payload = %payload, "Security event");
    }

    fn alert(&self, alert: &SecurityAlert) {
        let payload = serde_json::to_string(alert).unwrap_or_default();
        warn!(target: "security", payload = %payload, "Security alert");
    }
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SecurityEvent>>,
    alerts: Mutex<Vec<SecurityAlert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.lock().clone()
    }

    /// Count recorded events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl SecuritySink for MemorySink {
    fn record(&self, event: &SecurityEvent) {
        self.events.lock().push(event.clone());
    }

    fn alert(&self, alert: &SecurityAlert) {
        self.alerts.lock().push(alert.clone());
    }
}
