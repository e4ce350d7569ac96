//! Scraper Profiles
//!
//! Per-IP history of trap hits, the automation patterns seen across them and
//! the resulting suspicion level. Optionally keeps a bounded evidence trail
//! of every hit for later review.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::bot::{missing_browser_headers, BehaviorAnalyzer};
use crate::config::EvidenceConfig;
use crate::request::GateRequest;
use crate::traps::{TrapKind, TriggerEvent};

const TRIGGER_WEIGHT: f64 = 0.3;
const RAPID_TRIGGER_COUNT: u32 = 3;
const SYSTEMATIC_PATH_COUNT: usize = 5;
const MANY_USER_AGENTS: usize = 3;
const USER_AGENT_ROTATION_WEIGHT: f64 = 0.3;

/// Headers never copied into evidence
const REDACTED_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// Automation pattern observed across trap hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorPattern {
    RapidTrapTriggering,
    SystematicScanning,
    BotUserAgent,
    MissingBrowserHeaders,
    AutomationTool,
}

impl BehaviorPattern {
    pub fn weight(&self) -> f64 {
        match self {
            BehaviorPattern::RapidTrapTriggering => 0.4,
            BehaviorPattern::SystematicScanning => 0.3,
            BehaviorPattern::BotUserAgent => 0.2,
            BehaviorPattern::MissingBrowserHeaders => 0.2,
            BehaviorPattern::AutomationTool => 0.5,
        }
    }
}

/// Coarse bucket driving the trap response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SuspicionLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            SuspicionLevel::Critical
        } else if score >= 0.6 {
            SuspicionLevel::High
        } else if score >= 0.4 {
            SuspicionLevel::Medium
        } else {
            SuspicionLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionLevel::Low => "low",
            SuspicionLevel::Medium => "medium",
            SuspicionLevel::High => "high",
            SuspicionLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for SuspicionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about an IP that hit a trap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScraperProfile {
    pub ip: String,
    pub first_seen: u64,
    pub last_seen: u64,
    pub trap_triggers: u32,
    pub behavior_score: f64,
    pub patterns: BTreeSet<BehaviorPattern>,
    pub user_agents: BTreeSet<String>,
    pub paths: BTreeSet<String>,
    pub suspicion_level: SuspicionLevel,
}

impl ScraperProfile {
    fn new(ip: &str, now_ms: u64) -> Self {
        Self {
            ip: ip.to_string(),
            first_seen: now_ms,
            last_seen: now_ms,
            trap_triggers: 0,
            behavior_score: 0.0,
            patterns: BTreeSet::new(),
            user_agents: BTreeSet::new(),
            paths: BTreeSet::new(),
            suspicion_level: SuspicionLevel::Low,
        }
    }

    fn rescore(&mut self) {
        let mut score = f64::min(self.trap_triggers as f64 * TRIGGER_WEIGHT, 1.0);
        score += self.patterns.iter().map(|p| p.weight()).sum::<f64>();
        if self.user_agents.len() > MANY_USER_AGENTS {
            score += USER_AGENT_ROTATION_WEIGHT;
        }
        self.behavior_score = score.min(1.0);
        self.suspicion_level = SuspicionLevel::from_score(self.behavior_score);
    }
}

/// Result of folding one trap hit into a profile
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerUpdate {
    pub profile: ScraperProfile,
    /// Level before this hit, read under the same lock as the update
    pub previous_level: SuspicionLevel,
}

impl TriggerUpdate {
    /// True only for the hit that moved the profile into `Critical`
    pub fn became_critical(&self) -> bool {
        self.previous_level != SuspicionLevel::Critical
            && self.profile.suspicion_level == SuspicionLevel::Critical
    }
}

/// One recorded trap hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub id: String,
    pub ip: String,
    pub trap_id: String,
    pub trap_path: String,
    pub trap_kind: TrapKind,
    pub timestamp: u64,
    pub method: String,
    pub user_agent: String,
    pub session_id: Option<String>,
    pub headers: HashMap<String, Vec<String>>,
    pub trap_triggers: u32,
    pub suspicion_level: SuspicionLevel,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileStats {
    pub profiles: usize,
    pub by_level: HashMap<String, usize>,
    pub evidence_records: usize,
}

/// Maintains scraper profiles and the evidence trail
pub struct ProfileTracker {
    config: EvidenceConfig,
    profiles: RwLock<HashMap<String, ScraperProfile>>,
    evidence: Mutex<VecDeque<Evidence>>,
    evidence_seq: AtomicU64,
    analyzer: BehaviorAnalyzer,
}

impl ProfileTracker {
    /// Create a new tracker
    pub fn new(config: EvidenceConfig) -> Self {
        Self {
            config,
            profiles: RwLock::new(HashMap::new()),
            evidence: Mutex::new(VecDeque::new()),
            evidence_seq: AtomicU64::new(0),
            analyzer: BehaviorAnalyzer::new(),
        }
    }

    /// Fold a trap hit into the IP's profile and return the updated profile
    /// together with the level it held before
    pub fn record_trigger(&self, event: &TriggerEvent, request: &GateRequest) -> TriggerUpdate {
        let user_agent = self.analyzer.classify_user_agent(&event.user_agent);
        let missing_headers = missing_browser_headers(request);

        let (profile, previous_level) = {
            let mut profiles = self.profiles.write();
            let profile = profiles
                .entry(event.ip.clone())
                .or_insert_with(|| ScraperProfile::new(&event.ip, event.timestamp));
            let previous_level = profile.suspicion_level;

            profile.trap_triggers = profile.trap_triggers.saturating_add(1);
            profile.last_seen = profile.last_seen.max(event.timestamp);
            profile.paths.insert(event.path.clone());
            if !event.user_agent.is_empty() {
                profile.user_agents.insert(event.user_agent.clone());
            }

            if profile.trap_triggers >= RAPID_TRIGGER_COUNT {
                profile.patterns.insert(BehaviorPattern::RapidTrapTriggering);
            }
            if profile.paths.len() >= SYSTEMATIC_PATH_COUNT {
                profile.patterns.insert(BehaviorPattern::SystematicScanning);
            }
            if user_agent.is_bot_like() {
                profile.patterns.insert(BehaviorPattern::BotUserAgent);
            }
            if missing_headers {
                profile.patterns.insert(BehaviorPattern::MissingBrowserHeaders);
            }
            if user_agent.is_automation_tool() {
                profile.patterns.insert(BehaviorPattern::AutomationTool);
            }

            profile.rescore();
            (profile.clone(), previous_level)
        };

        debug!(
            ip = %profile.ip,
            trap_triggers = profile.trap_triggers,
            behavior_score = profile.behavior_score,
            suspicion_level = %profile.suspicion_level,
            "Scraper profile updated"
        );

        if self.config.enabled {
            self.store_evidence(event, request, &profile);
        }

        TriggerUpdate {
            profile,
            previous_level,
        }
    }

    fn store_evidence(
        &self,
        event: &TriggerEvent,
        request: &GateRequest,
        profile: &ScraperProfile,
    ) {
        let seq = self.evidence_seq.fetch_add(1, Ordering::Relaxed);
        let headers = request
            .headers
            .iter()
            .filter(|(name, _)| {
                !REDACTED_HEADERS
                    .iter()
                    .any(|redacted| name.eq_ignore_ascii_case(redacted))
            })
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();

        let record = Evidence {
            id: format!("EVD-{}-{:06}", event.timestamp, seq),
            ip: event.ip.clone(),
            trap_id: event.trap_id.clone(),
            trap_path: event.path.clone(),
            trap_kind: event.trap_kind,
            timestamp: event.timestamp,
            method: event.method.clone(),
            user_agent: event.user_agent.clone(),
            session_id: request.session_id.clone(),
            headers,
            trap_triggers: profile.trap_triggers,
            suspicion_level: profile.suspicion_level,
        };

        let mut evidence = self.evidence.lock();
        evidence.push_back(record);
        while evidence.len() > self.config.max_records {
            evidence.pop_front();
        }
    }

    pub fn get(&self, ip: &str) -> Option<ScraperProfile> {
        self.profiles.read().get(ip).cloned()
    }

    /// Evidence for one IP, oldest first
    pub fn evidence_for(&self, ip: &str) -> Vec<Evidence> {
        self.evidence
            .lock()
            .iter()
            .filter(|e| e.ip == ip)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ProfileStats {
        let profiles = self.profiles.read();
        let mut by_level = HashMap::new();
        for profile in profiles.values() {
            *by_level
                .entry(profile.suspicion_level.to_string())
                .or_insert(0) += 1;
        }
        ProfileStats {
            profiles: profiles.len(),
            by_level,
            evidence_records: self.evidence.lock().len(),
        }
    }
}
