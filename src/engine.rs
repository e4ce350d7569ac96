//! Gate Engine
//!
//! The decision engine invoked once per inbound request. It owns the
//! reputation store, challenge manager, trap registry and scraper profiles,
//! and walks each request through trap, block, reputation, challenge-policy
//! and behavior checks in that order.
//!
//! Internal errors never reject a request: `evaluate` logs them, counts them
//! and allows the request.

use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bot::BehaviorAnalyzer;
use crate::challenge::{BehaviorData, ChallengeManager, ChallengeStats};
use crate::clock::{system_clock, SharedClock};
use crate::config::{ChallengeType, Difficulty, GateConfig};
use crate::csp::NonceRegistry;
use crate::decision::{
    ChallengeReason, ChallengeVerification, GateDecision, TrapBody, STATUS_FORBIDDEN,
    STATUS_NOT_FOUND, STATUS_OK, STATUS_TOO_MANY_REQUESTS,
};
use crate::error::{ChallengeError, GateError};
use crate::events::{SecurityAlert, SecurityEvent, SharedSink, TracingSink};
use crate::metrics::{DecisionOutcome, GateMetrics, MetricsSummary};
use crate::profile::{Evidence, ProfileStats, ProfileTracker, ScraperProfile, SuspicionLevel};
use crate::reputation::{
    BlockInfo, IpReputationStore, ReputationSnapshot, ReputationSource, ReputationStats,
    ReputationSweep,
};
use crate::request::GateRequest;
use crate::traps::{decoys, DecoyBody, RotationReport, Trap, TrapRegistry};

/// Client IP used when the request carries none
pub const UNKNOWN_IP: &str = "unknown";

const SUSPICION_CHALLENGE_THRESHOLD: f64 = 0.5;
const TRAP_SUSPICION: f64 = 0.25;
const INCORRECT_ANSWER_SUSPICION: f64 = 0.05;
const TOO_MANY_ATTEMPTS_SUSPICION: f64 = 0.2;
const SOLVED_SUSPICION_FACTOR: f64 = 0.5;

/// Prior challenges after which difficulty rises one level
const ADAPTIVE_STEP_AFTER: u32 = 2;
/// Prior challenges beyond which difficulty is hard and text is preferred
const HEAVILY_CHALLENGED: u32 = 3;

/// Fallback order when the preferred challenge type is disabled
const FALLBACK_ORDER: [ChallengeType; 4] = [
    ChallengeType::Math,
    ChallengeType::Text,
    ChallengeType::Image,
    ChallengeType::Behavioral,
];

/// Challenges issued to one IP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChallengeHistory {
    pub challenges: u32,
    pub last_challenge: u64,
}

/// Strength of a verified pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStrength {
    /// Behavioral challenge: skips only the header heuristics and the new-IP roll
    Weak,
    /// Math, text or image challenge: skips every challenge check
    Strong,
}

impl PassStrength {
    fn for_challenge(kind: ChallengeType) -> Self {
        match kind {
            ChallengeType::Behavioral => PassStrength::Weak,
            ChallengeType::Math | ChallengeType::Text | ChallengeType::Image => {
                PassStrength::Strong
            }
        }
    }
}

/// Temporary challenge exemption after a solved challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifiedPass {
    pub strength: PassStrength,
    pub granted_at: u64,
    pub expires_at: u64,
}

/// What a sweep removed or replaced
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub challenges: usize,
    pub reputation: ReputationSweep,
    pub traps: RotationReport,
    pub nonces: usize,
    pub verified_passes: usize,
}

/// Gate statistics
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    pub reputation: ReputationStats,
    pub challenges: ChallengeStats,
    pub traps: usize,
    pub profiles: ProfileStats,
    pub verified_passes: usize,
    pub metrics: MetricsSummary,
}

/// Builder for [`GateOrchestrator`]
pub struct GateBuilder {
    config: GateConfig,
    clock: Option<SharedClock>,
    sources: Vec<Arc<dyn ReputationSource>>,
    sink: Option<SharedSink>,
}

impl GateBuilder {
    /// Use a specific clock (defaults to the system clock)
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Add an external reputation source
    pub fn reputation_source(mut self, source: Arc<dyn ReputationSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Send security events somewhere other than the `security` log target
    pub fn event_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and assemble the gate
    pub fn build(self) -> Result<GateOrchestrator, GateError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let config = self.config;
        let source_count = self.sources.len();

        let reputation = IpReputationStore::new(
            config.reputation.clone(),
            self.sources,
            clock.clone(),
            sink.clone(),
        );
        let challenges = ChallengeManager::new(config.challenges.clone(), clock.clone());
        let traps = TrapRegistry::new(config.traps.clone(), clock.clone())?;
        let profiles = ProfileTracker::new(config.evidence.clone());
        let csp = NonceRegistry::new(config.csp_nonce_ttl_ms, clock.clone());

        info!(
            reputation_threshold = config.reputation_threshold,
            auto_block_threshold = config.auto_block_threshold,
            challenge_types = ?config.challenges.enabled_types,
            traps = traps.len(),
            reputation_sources = source_count,
            "Abuse gate initialized"
        );

        Ok(GateOrchestrator {
            config,
            clock,
            sink,
            reputation,
            challenges,
            traps,
            profiles,
            behavior: BehaviorAnalyzer::new(),
            csp,
            metrics: GateMetrics::default(),
            history: RwLock::new(HashMap::new()),
            passes: RwLock::new(HashMap::new()),
        })
    }
}

/// Abuse mitigation gate
pub struct GateOrchestrator {
    config: GateConfig,
    clock: SharedClock,
    sink: SharedSink,
    reputation: IpReputationStore,
    challenges: ChallengeManager,
    traps: TrapRegistry,
    profiles: ProfileTracker,
    behavior: BehaviorAnalyzer,
    csp: NonceRegistry,
    metrics: GateMetrics,
    history: RwLock<HashMap<String, ChallengeHistory>>,
    passes: RwLock<HashMap<String, VerifiedPass>>,
}

impl GateOrchestrator {
    /// Start building a gate from a configuration
    pub fn builder(config: GateConfig) -> GateBuilder {
        GateBuilder {
            config,
            clock: None,
            sources: Vec::new(),
            sink: None,
        }
    }

    /// Build a gate with the system clock, no external sources and the
    /// tracing sink
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        Self::builder(config).build()
    }

    /// Decide what to do with a request
    pub async fn evaluate(&self, request: &GateRequest) -> GateDecision {
        let start = Instant::now();

        let request = if request.ip.trim().is_empty() {
            let mut owned = request.clone();
            owned.ip = UNKNOWN_IP.to_string();
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(request)
        };

        let decision = match self.try_evaluate(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    ip = %request.ip,
                    path = %request.path,
                    error = %e,
                    "Gate evaluation failed, allowing request"
                );
                self.metrics.record_error(error_kind(&e));
                GateDecision::Allow
            }
        };

        self.metrics.record_decision(outcome(&decision));
        self.metrics.record_latency(start.elapsed());

        debug!(
            ip = %request.ip,
            path = %request.path,
            decision = decision.label(),
            "Request evaluated"
        );

        decision
    }

    async fn try_evaluate(&self, request: &GateRequest) -> Result<GateDecision, GateError> {
        let ip = request.ip.as_str();

        if let Some(trap) = self.traps.match_path(&request.path) {
            return Ok(self.handle_trap(&trap, request));
        }

        if let Some(block) = self.reputation.block_info(ip) {
            return Ok(self.blocked(block));
        }

        let pass = self.active_pass(ip);
        if pass == Some(PassStrength::Strong) {
            return Ok(GateDecision::Allow);
        }

        let snapshot = self.reputation.get_reputation(ip).await;
        if snapshot.score < self.config.reputation_threshold {
            return self.issue_challenge(ip, ChallengeReason::LowReputation);
        }

        if self.reputation.suspicion(ip) > SUSPICION_CHALLENGE_THRESHOLD {
            return self.issue_challenge(ip, ChallengeReason::SuspiciousActivity);
        }

        if self.is_protected(&request.path) {
            return self.issue_challenge(ip, ChallengeReason::ProtectedPath);
        }

        if pass.is_none() {
            if self.challenge_history(ip).is_none() && self.roll_new_ip() {
                return self.issue_challenge(ip, ChallengeReason::NewIpVerification);
            }

            let assessment = self.behavior.assess(request);
            if assessment.score > self.config.behavior_threshold {
                debug!(
                    ip = %ip,
                    score = assessment.score,
                    signals = ?assessment.signals,
                    "Suspicious request behavior"
                );
                return self.issue_challenge(ip, ChallengeReason::SuspiciousBehavior);
            }
        }

        Ok(GateDecision::Allow)
    }

    fn handle_trap(&self, trap: &Trap, request: &GateRequest) -> GateDecision {
        let ip = request.ip.as_str();
        let event = self.traps.record_trigger(trap, request);
        self.metrics.record_trap_hit(trap.kind.as_str());

        warn!(
            ip = %ip,
            trap_id = %trap.id,
            trap_kind = trap.kind.as_str(),
            path = %request.path,
            user_agent = %event.user_agent,
            "Honeypot triggered"
        );
        self.sink.record(&SecurityEvent::HoneypotTriggered {
            ip: ip.to_string(),
            trap_id: trap.id.clone(),
            trap_kind: trap.kind,
            path: request.path.clone(),
            user_agent: event.user_agent.clone(),
            timestamp: event.timestamp,
        });

        let update = self.profiles.record_trigger(&event, request);
        self.reputation.adjust_suspicion(ip, TRAP_SUSPICION);
        let profile = &update.profile;

        if update.became_critical() {
            self.sink.alert(&SecurityAlert::CriticalScraper {
                ip: ip.to_string(),
                trap_triggers: profile.trap_triggers,
                behavior_score: profile.behavior_score,
                timestamp: event.timestamp,
            });
        }

        let auto_block = profile.trap_triggers >= self.config.auto_block_threshold;
        if profile.suspicion_level == SuspicionLevel::Critical || auto_block {
            let reason = if auto_block {
                format!("Honeypot auto-block after {} trap triggers", profile.trap_triggers)
            } else {
                "Critical scraper behavior".to_string()
            };
            let info = self.block_ip(ip, &reason);
            return self.blocked(info);
        }

        let delay_ms = self.config.trap_delay_ms;
        match profile.suspicion_level {
            SuspicionLevel::High => GateDecision::TrapResponse {
                http_status: STATUS_NOT_FOUND,
                delay_ms: delay_ms.saturating_mul(2),
                body: TrapBody::Empty,
            },
            SuspicionLevel::Medium => GateDecision::TrapResponse {
                http_status: STATUS_OK,
                delay_ms: 0,
                body: self.decoy_body(trap),
            },
            SuspicionLevel::Low | SuspicionLevel::Critical => GateDecision::TrapResponse {
                http_status: STATUS_NOT_FOUND,
                delay_ms,
                body: TrapBody::Empty,
            },
        }
    }

    fn decoy_body(&self, trap: &Trap) -> TrapBody {
        match &trap.decoy {
            Some(DecoyBody::Json(value)) => TrapBody::Json(value.clone()),
            Some(DecoyBody::Html(html)) => TrapBody::Html(html.clone()),
            None => TrapBody::Json(decoys::large_fake_dataset(
                self.clock.now_ms(),
                &mut rand::thread_rng(),
            )),
        }
    }

    /// Gate-issued block unless one is already in force; permanent once the
    /// violation count reaches the configured threshold
    fn block_ip(&self, ip: &str, reason: &str) -> BlockInfo {
        let (info, created) = self.reputation.block_unless_blocked(
            ip,
            reason,
            Duration::from_millis(self.config.block_duration_ms),
            self.config.permanent_block_threshold,
        );
        if created {
            self.passes.write().remove(ip);
            self.metrics.record_block();
        }
        info
    }

    fn blocked(&self, block: BlockInfo) -> GateDecision {
        GateDecision::Blocked {
            http_status: STATUS_FORBIDDEN,
            blocked_at: block.blocked_at,
            reason: block.reason,
            permanent: block.permanent,
            contact: self.config.contact.clone(),
        }
    }

    fn issue_challenge(
        &self,
        ip: &str,
        reason: ChallengeReason,
    ) -> Result<GateDecision, GateError> {
        let prior = self.challenge_history(ip).map(|h| h.challenges).unwrap_or(0);
        let kind = self.select_challenge_type(reason, prior);
        let difficulty = self.select_difficulty(prior);

        let payload = self.challenges.generate(kind, difficulty, Some(ip))?;

        let now = self.clock.now_ms();
        {
            let mut history = self.history.write();
            let entry = history.entry(ip.to_string()).or_default();
            entry.challenges = entry.challenges.saturating_add(1);
            entry.last_challenge = now;
        }

        info!(
            ip = %ip,
            reason = %reason,
            challenge_type = %kind,
            difficulty = %difficulty,
            "Challenge issued"
        );
        self.sink.record(&SecurityEvent::ChallengeIssued {
            ip: ip.to_string(),
            challenge_id: payload.id.clone(),
            challenge_type: kind,
            reason: reason.to_string(),
            timestamp: now,
        });
        self.metrics.record_challenge_issued(reason.as_str());

        Ok(GateDecision::Challenge {
            http_status: STATUS_TOO_MANY_REQUESTS,
            reason,
            payload,
        })
    }

    fn select_challenge_type(&self, reason: ChallengeReason, prior: u32) -> ChallengeType {
        let preferred = match reason {
            ChallengeReason::SuspiciousBehavior | ChallengeReason::SuspiciousActivity => {
                ChallengeType::Behavioral
            }
            ChallengeReason::LowReputation => ChallengeType::Image,
            _ if prior > HEAVILY_CHALLENGED => ChallengeType::Text,
            _ => ChallengeType::Math,
        };

        let enabled = &self.config.challenges.enabled_types;
        if enabled.contains(&preferred) {
            return preferred;
        }
        FALLBACK_ORDER
            .iter()
            .copied()
            .find(|kind| enabled.contains(kind))
            .unwrap_or(preferred)
    }

    fn select_difficulty(&self, prior: u32) -> Difficulty {
        let base = self.config.challenges.difficulty;
        if !self.config.challenges.adaptive_difficulty {
            return base;
        }
        if prior > HEAVILY_CHALLENGED {
            Difficulty::Hard
        } else if prior >= ADAPTIVE_STEP_AFTER {
            base.harder()
        } else {
            base
        }
    }

    fn roll_new_ip(&self) -> bool {
        let probability = self
            .config
            .detection_sensitivity
            .new_ip_challenge_probability();
        probability > 0.0 && rand::thread_rng().gen_bool(probability.min(1.0))
    }

    fn is_protected(&self, path: &str) -> bool {
        self.config
            .protected_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn active_pass(&self, ip: &str) -> Option<PassStrength> {
        let now = self.clock.now_ms();
        self.passes
            .read()
            .get(ip)
            .filter(|pass| now <= pass.expires_at)
            .map(|pass| pass.strength)
    }

    /// Validate a challenge answer and feed the outcome back into the IP's
    /// reputation
    pub fn submit_challenge(
        &self,
        challenge_id: &str,
        answer: &str,
        behavior: Option<&BehaviorData>,
    ) -> ChallengeVerification {
        let subject = self.challenges.subject(challenge_id);
        let now = self.clock.now_ms();

        match self.challenges.validate(challenge_id, answer, behavior) {
            Ok(kind) => {
                if let Some(ip) = &subject {
                    self.reputation.scale_suspicion(ip, SOLVED_SUSPICION_FACTOR);
                    self.grant_pass(ip, PassStrength::for_challenge(kind), now);
                }
                info!(
                    challenge_id = %challenge_id,
                    ip = subject.as_deref().unwrap_or(UNKNOWN_IP),
                    challenge_type = %kind,
                    "Challenge solved"
                );
                self.metrics.record_challenge_result(true);
                self.sink.record(&SecurityEvent::ChallengeSolved {
                    ip: subject,
                    challenge_id: challenge_id.to_string(),
                    timestamp: now,
                });
                ChallengeVerification::success()
            }
            Err(e) => {
                if let Some(ip) = &subject {
                    match e {
                        ChallengeError::Incorrect { .. } => {
                            self.reputation.adjust_suspicion(ip, INCORRECT_ANSWER_SUSPICION);
                        }
                        ChallengeError::TooManyAttempts => {
                            self.reputation.adjust_suspicion(ip, TOO_MANY_ATTEMPTS_SUSPICION);
                        }
                        ChallengeError::NotFound | ChallengeError::Expired => {}
                    }
                }
                debug!(challenge_id = %challenge_id, error = %e, "Challenge failed");
                self.metrics.record_challenge_result(false);
                self.sink.record(&SecurityEvent::ChallengeFailed {
                    ip: subject,
                    challenge_id: challenge_id.to_string(),
                    error: e.to_string(),
                    timestamp: now,
                });
                ChallengeVerification::failure(e.public_message(), e.attempts_remaining())
            }
        }
    }

    fn grant_pass(&self, ip: &str, strength: PassStrength, now: u64) {
        let pass = VerifiedPass {
            strength,
            granted_at: now,
            expires_at: now.saturating_add(self.config.verified_pass_ttl_ms),
        };
        let mut passes = self.passes.write();
        // A weak pass never downgrades a live strong one
        let keep_existing = passes
            .get(ip)
            .is_some_and(|p| p.strength == PassStrength::Strong && now <= p.expires_at)
            && strength == PassStrength::Weak;
        if !keep_existing {
            passes.insert(ip.to_string(), pass);
        }
    }

    /// Verified pass currently held by an IP
    pub fn verified_pass(&self, ip: &str) -> Option<VerifiedPass> {
        let now = self.clock.now_ms();
        self.passes
            .read()
            .get(ip)
            .filter(|pass| now <= pass.expires_at)
            .copied()
    }

    /// Manually block an IP. `None` duration means permanent.
    pub fn block(&self, ip: &str, reason: &str, duration: Option<Duration>) -> BlockInfo {
        self.passes.write().remove(ip);
        self.reputation.block(ip, reason, duration)
    }

    pub fn unblock(&self, ip: &str) -> bool {
        self.reputation.unblock(ip)
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.reputation.is_blocked(ip)
    }

    /// Combined reputation for an IP
    pub async fn reputation(&self, ip: &str) -> ReputationSnapshot {
        self.reputation.get_reputation(ip).await
    }

    pub fn profile(&self, ip: &str) -> Option<ScraperProfile> {
        self.profiles.get(ip)
    }

    pub fn evidence_for(&self, ip: &str) -> Vec<Evidence> {
        self.profiles.evidence_for(ip)
    }

    pub fn challenge_history(&self, ip: &str) -> Option<ChallengeHistory> {
        self.history.read().get(ip).copied()
    }

    /// Hidden trap links and forms to embed in served pages
    pub fn injectable_html(&self) -> String {
        self.traps.injectable_html().join("\n")
    }

    /// Category behind an image tile of a pending challenge
    pub fn image_asset(&self, challenge_id: &str, index: usize) -> Option<&'static str> {
        self.challenges.image_asset(challenge_id, index)
    }

    /// Expire challenges, blocks, cache entries, nonces and passes, and
    /// rotate stale dynamic traps
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();

        let verified_passes = {
            let mut passes = self.passes.write();
            let before = passes.len();
            passes.retain(|_, pass| now <= pass.expires_at);
            before - passes.len()
        };

        let report = SweepReport {
            challenges: self.challenges.sweep(),
            reputation: self.reputation.sweep(),
            traps: self.traps.rotate(),
            nonces: self.csp.sweep(),
            verified_passes,
        };

        if report.traps.retired > 0 {
            self.sink.record(&SecurityEvent::TrapsRotated {
                rotated: report.traps.retired,
                timestamp: now,
            });
        }

        debug!(
            challenges = report.challenges,
            expired_blocks = report.reputation.expired_blocks,
            rotated_traps = report.traps.retired,
            nonces = report.nonces,
            verified_passes = report.verified_passes,
            "Sweep complete"
        );
        report
    }

    /// Run `sweep` every `sweep_interval_ms` on the tokio runtime
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        let period = Duration::from_millis(self.config.sweep_interval_ms);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                gate.sweep();
            }
        })
    }

    pub fn stats(&self) -> GateStats {
        let now = self.clock.now_ms();
        GateStats {
            reputation: self.reputation.stats(),
            challenges: self.challenges.stats(),
            traps: self.traps.len(),
            profiles: self.profiles.stats(),
            verified_passes: self
                .passes
                .read()
                .values()
                .filter(|p| now <= p.expires_at)
                .count(),
            metrics: self.metrics.summary(),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }

    pub fn csp(&self) -> &NonceRegistry {
        &self.csp
    }

    pub fn reputation_store(&self) -> &IpReputationStore {
        &self.reputation
    }

    pub fn challenge_manager(&self) -> &ChallengeManager {
        &self.challenges
    }

    pub fn trap_registry(&self) -> &TrapRegistry {
        &self.traps
    }

    pub fn profiles(&self) -> &ProfileTracker {
        &self.profiles
    }
}

fn outcome(decision: &GateDecision) -> DecisionOutcome {
    match decision {
        GateDecision::Allow => DecisionOutcome::Allowed,
        GateDecision::Challenge { .. } => DecisionOutcome::Challenged,
        GateDecision::Blocked { .. } => DecisionOutcome::Blocked,
        GateDecision::TrapResponse { .. } => DecisionOutcome::TrapResponse,
    }
}

fn error_kind(error: &GateError) -> &'static str {
    match error {
        GateError::InvalidConfiguration(_) => "invalid_configuration",
        GateError::ChallengeTypeDisabled(_) => "challenge_type_disabled",
        GateError::Io(_) => "io",
        GateError::Parse(_) => "parse",
    }
}
