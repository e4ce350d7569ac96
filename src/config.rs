//! Gate Configuration Types
//!
//! Runtime configuration for the abuse gate and its components, plus the
//! JSON representation loaded at startup. All values are fixed once the gate
//! is constructed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::GateError;

/// Challenge variants the gate can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    Math,
    Image,
    Text,
    Behavioral,
}

impl ChallengeType {
    pub const ALL: [ChallengeType; 4] = [
        ChallengeType::Math,
        ChallengeType::Image,
        ChallengeType::Text,
        ChallengeType::Behavioral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Math => "math",
            ChallengeType::Image => "image",
            ChallengeType::Text => "text",
            ChallengeType::Behavioral => "behavioral",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "math" => Ok(ChallengeType::Math),
            "image" => Ok(ChallengeType::Image),
            "text" => Ok(ChallengeType::Text),
            "behavioral" | "behavioural" => Ok(ChallengeType::Behavioral),
            other => Err(GateError::InvalidConfiguration(format!(
                "unknown challenge type '{}'",
                other
            ))),
        }
    }
}

/// Challenge difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// One step harder, saturating at hard
    pub fn harder(self) -> Self {
        match self {
            Difficulty::Easy => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Hard => Difficulty::Hard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(GateError::InvalidConfiguration(format!(
                "unknown difficulty '{}'",
                other
            ))),
        }
    }
}

/// How eagerly never-seen IPs are asked to verify themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSensitivity {
    /// Never challenge new IPs at random
    Low,
    Medium,
    High,
}

impl DetectionSensitivity {
    /// Probability that a never-challenged IP gets a verification challenge
    pub fn new_ip_challenge_probability(&self) -> f64 {
        match self {
            DetectionSensitivity::Low => 0.0,
            DetectionSensitivity::Medium => 0.1,
            DetectionSensitivity::High => 0.2,
        }
    }
}

impl FromStr for DetectionSensitivity {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(DetectionSensitivity::Low),
            "medium" => Ok(DetectionSensitivity::Medium),
            "high" => Ok(DetectionSensitivity::High),
            other => Err(GateError::InvalidConfiguration(format!(
                "unknown detection sensitivity '{}'",
                other
            ))),
        }
    }
}

/// IP reputation store settings
#[derive(Debug, Clone)]
pub struct ReputationConfig {
    /// Suspicion half-life (ms)
    pub suspicion_half_life_ms: u64,
    /// How long a computed snapshot is trusted (ms)
    pub cache_ttl_ms: u64,
    /// Per-source lookup timeout (ms)
    pub source_timeout_ms: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            suspicion_half_life_ms: default_hour_ms(),
            cache_ttl_ms: default_hour_ms(),
            source_timeout_ms: default_source_timeout(),
        }
    }
}

/// Challenge manager settings
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// Challenge lifetime (ms)
    pub timeout_ms: u64,
    /// Attempts allowed before the challenge is discarded
    pub max_attempts: u32,
    /// Types the gate may issue
    pub enabled_types: Vec<ChallengeType>,
    /// Base difficulty
    pub difficulty: Difficulty,
    /// Raise difficulty for repeatedly challenged IPs
    pub adaptive_difficulty: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_captcha_timeout(),
            max_attempts: default_max_attempts(),
            enabled_types: ChallengeType::ALL.to_vec(),
            difficulty: Difficulty::Medium,
            adaptive_difficulty: true,
        }
    }
}

/// Honeypot trap settings
#[derive(Debug, Clone)]
pub struct TrapConfig {
    /// Fixed trap paths registered at startup
    pub static_paths: Vec<String>,
    /// Deploy rotating invisible links, hidden forms, fake APIs and decoy pages
    pub dynamic_traps: bool,
    /// Age after which a dynamic trap is replaced (ms)
    pub rotation_ms: u64,
    /// Legitimate application routes no trap may claim
    pub reserved_routes: Vec<String>,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            static_paths: default_honeypot_paths(),
            dynamic_traps: true,
            rotation_ms: default_hour_ms(),
            reserved_routes: Vec::new(),
        }
    }
}

/// Scraper evidence retention
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    pub enabled: bool,
    /// Oldest records are dropped past this bound
    pub max_records: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records: default_max_evidence(),
        }
    }
}

/// Gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Reputation score below which a challenge is issued
    pub reputation_threshold: f64,
    /// Trap triggers that force a block
    pub auto_block_threshold: u32,
    /// Duration of gate-issued blocks (ms)
    pub block_duration_ms: u64,
    /// Violations after which gate-issued blocks become permanent
    pub permanent_block_threshold: u32,
    /// Random verification rate for new IPs
    pub detection_sensitivity: DetectionSensitivity,
    /// Header heuristic score above which a behavioral challenge is issued
    pub behavior_threshold: f64,
    /// Path prefixes that always require a challenge
    pub protected_paths: Vec<String>,
    /// Base delay for trap 404 responses (ms)
    pub trap_delay_ms: u64,
    /// Challenge exemption after a solved challenge (ms)
    pub verified_pass_ttl_ms: u64,
    /// Interval of the background sweeper (ms)
    pub sweep_interval_ms: u64,
    /// CSP nonce lifetime (ms)
    pub csp_nonce_ttl_ms: u64,
    /// Contact address shown to blocked clients
    pub contact: String,
    /// Honor proxy headers when extracting the client IP
    pub trust_forwarded_headers: bool,
    pub reputation: ReputationConfig,
    pub challenges: ChallengeConfig,
    pub traps: TrapConfig,
    pub evidence: EvidenceConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            reputation_threshold: default_reputation_threshold(),
            auto_block_threshold: default_auto_block_threshold(),
            block_duration_ms: default_hour_ms(),
            permanent_block_threshold: default_permanent_block_threshold(),
            detection_sensitivity: DetectionSensitivity::High,
            behavior_threshold: default_behavior_threshold(),
            protected_paths: default_protected_paths(),
            trap_delay_ms: default_trap_delay(),
            verified_pass_ttl_ms: default_verified_pass_ttl(),
            sweep_interval_ms: default_sweep_interval(),
            csp_nonce_ttl_ms: default_nonce_ttl(),
            contact: default_contact(),
            trust_forwarded_headers: true,
            reputation: ReputationConfig::default(),
            challenges: ChallengeConfig::default(),
            traps: TrapConfig::default(),
            evidence: EvidenceConfig::default(),
        }
    }
}

impl GateConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(content: &str) -> Result<Self, GateError> {
        let json: GateConfigJson = serde_json::from_str(content)?;
        GateConfig::try_from(json)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), GateError> {
        let invalid = |msg: String| Err(GateError::InvalidConfiguration(msg));

        if !(0.0..=1.0).contains(&self.reputation_threshold) {
            return invalid(format!(
                "reputation-threshold must be within [0, 1], got {}",
                self.reputation_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.behavior_threshold) {
            return invalid(format!(
                "behavior-threshold must be within [0, 1], got {}",
                self.behavior_threshold
            ));
        }
        if self.auto_block_threshold == 0 {
            return invalid("auto-block-threshold must be at least 1".to_string());
        }
        if self.permanent_block_threshold == 0 {
            return invalid("permanent-block-threshold must be at least 1".to_string());
        }
        if self.block_duration_ms == 0 {
            return invalid("block-duration-ms must be positive".to_string());
        }
        if self.challenges.max_attempts == 0 {
            return invalid("max-captcha-attempts must be at least 1".to_string());
        }
        if self.challenges.timeout_ms == 0 {
            return invalid("captcha-timeout-ms must be positive".to_string());
        }
        if self.challenges.enabled_types.is_empty() {
            return invalid("challenge-types must enable at least one type".to_string());
        }
        if self.traps.rotation_ms == 0 {
            return invalid("trap-rotation-ms must be positive".to_string());
        }
        if self.reputation.suspicion_half_life_ms == 0 {
            return invalid("suspicion-half-life-ms must be positive".to_string());
        }
        if self.sweep_interval_ms == 0 {
            return invalid("sweep-interval-ms must be positive".to_string());
        }

        let mut seen = HashSet::new();
        for path in &self.traps.static_paths {
            if !path.starts_with('/') {
                return invalid(format!("honeypot path '{}' must start with '/'", path));
            }
            if !seen.insert(path.as_str()) {
                return invalid(format!("honeypot path '{}' is registered twice", path));
            }
            if let Some(route) = self
                .traps
                .reserved_routes
                .iter()
                .find(|route| routes_collide(path, route))
            {
                return invalid(format!(
                    "honeypot path '{}' collides with application route '{}'",
                    path, route
                ));
            }
        }

        Ok(())
    }
}

/// Two routes collide when they name the same resource, ignoring a trailing slash
pub(crate) fn routes_collide(a: &str, b: &str) -> bool {
    let trim = |s: &str| s.trim_end_matches('/').to_string();
    trim(a) == trim(b)
}

/// JSON configuration format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateConfigJson {
    #[serde(default = "default_reputation_threshold")]
    pub reputation_threshold: f64,
    #[serde(default = "default_auto_block_threshold")]
    pub auto_block_threshold: u32,
    #[serde(default = "default_hour_ms")]
    pub block_duration_ms: u64,
    #[serde(default = "default_permanent_block_threshold")]
    pub permanent_block_threshold: u32,
    #[serde(default = "default_captcha_timeout")]
    pub captcha_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_captcha_attempts: u32,
    #[serde(default = "default_challenge_types")]
    pub challenge_types: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub captcha_difficulty: String,
    #[serde(default = "default_true")]
    pub adaptive_difficulty: bool,
    #[serde(default = "default_sensitivity")]
    pub detection_sensitivity: String,
    #[serde(default = "default_behavior_threshold")]
    pub behavior_threshold: f64,
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
    #[serde(default = "default_honeypot_paths")]
    pub honeypot_paths: Vec<String>,
    #[serde(default)]
    pub reserved_routes: Vec<String>,
    #[serde(default = "default_true")]
    pub dynamic_traps: bool,
    #[serde(default = "default_hour_ms")]
    pub trap_rotation_ms: u64,
    #[serde(default = "default_trap_delay")]
    pub trap_delay_ms: u64,
    #[serde(default = "default_hour_ms")]
    pub suspicion_half_life_ms: u64,
    #[serde(default = "default_hour_ms")]
    pub reputation_cache_ttl_ms: u64,
    #[serde(default = "default_source_timeout")]
    pub reputation_source_timeout_ms: u64,
    #[serde(default = "default_verified_pass_ttl")]
    pub verified_pass_ttl_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_true")]
    pub evidence_collection: bool,
    #[serde(default = "default_max_evidence")]
    pub max_evidence_records: usize,
    #[serde(default = "default_nonce_ttl")]
    pub csp_nonce_ttl_ms: u64,
    #[serde(default = "default_contact")]
    pub contact: String,
    #[serde(default = "default_true")]
    pub trust_forwarded_headers: bool,
}

impl TryFrom<GateConfigJson> for GateConfig {
    type Error = GateError;

    fn try_from(json: GateConfigJson) -> Result<Self, Self::Error> {
        let enabled_types = json
            .challenge_types
            .iter()
            .map(|s| s.parse::<ChallengeType>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut deduped = Vec::with_capacity(enabled_types.len());
        for kind in enabled_types {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }

        let config = GateConfig {
            reputation_threshold: json.reputation_threshold,
            auto_block_threshold: json.auto_block_threshold,
            block_duration_ms: json.block_duration_ms,
            permanent_block_threshold: json.permanent_block_threshold,
            detection_sensitivity: json.detection_sensitivity.parse()?,
            behavior_threshold: json.behavior_threshold,
            protected_paths: json.protected_paths,
            trap_delay_ms: json.trap_delay_ms,
            verified_pass_ttl_ms: json.verified_pass_ttl_ms,
            sweep_interval_ms: json.sweep_interval_ms,
            csp_nonce_ttl_ms: json.csp_nonce_ttl_ms,
            contact: json.contact,
            trust_forwarded_headers: json.trust_forwarded_headers,
            reputation: ReputationConfig {
                suspicion_half_life_ms: json.suspicion_half_life_ms,
                cache_ttl_ms: json.reputation_cache_ttl_ms,
                source_timeout_ms: json.reputation_source_timeout_ms,
            },
            challenges: ChallengeConfig {
                timeout_ms: json.captcha_timeout_ms,
                max_attempts: json.max_captcha_attempts,
                enabled_types: deduped,
                difficulty: json.captcha_difficulty.parse()?,
                adaptive_difficulty: json.adaptive_difficulty,
            },
            traps: TrapConfig {
                static_paths: json.honeypot_paths,
                dynamic_traps: json.dynamic_traps,
                rotation_ms: json.trap_rotation_ms,
                reserved_routes: json.reserved_routes,
            },
            evidence: EvidenceConfig {
                enabled: json.evidence_collection,
                max_records: json.max_evidence_records,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn default_true() -> bool {
    true
}

fn default_hour_ms() -> u64 {
    3_600_000
}

fn default_reputation_threshold() -> f64 {
    0.3
}

fn default_auto_block_threshold() -> u32 {
    3
}

fn default_permanent_block_threshold() -> u32 {
    10
}

fn default_captcha_timeout() -> u64 {
    300_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_challenge_types() -> Vec<String> {
    ChallengeType::ALL.iter().map(|t| t.to_string()).collect()
}

fn default_difficulty() -> String {
    "medium".to_string()
}

fn default_sensitivity() -> String {
    "high".to_string()
}

fn default_behavior_threshold() -> f64 {
    0.7
}

fn default_protected_paths() -> Vec<String> {
    vec![
        "/admin".to_string(),
        "/api".to_string(),
        "/login".to_string(),
        "/register".to_string(),
    ]
}

fn default_honeypot_paths() -> Vec<String> {
    [
        "/admin-secret/",
        "/api-internal/",
        "/backup-files/",
        "/hidden-admin/",
        "/secret-api/",
        "/private-data/",
        "/internal-docs/",
        "/system-config/",
        "/database-backup/",
        "/admin-panel-hidden/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_trap_delay() -> u64 {
    5_000
}

fn default_source_timeout() -> u64 {
    2_000
}

fn default_verified_pass_ttl() -> u64 {
    1_800_000
}

fn default_sweep_interval() -> u64 {
    300_000
}

fn default_max_evidence() -> usize {
    10_000
}

fn default_nonce_ttl() -> u64 {
    300_000
}

fn default_contact() -> String {
    "security@example.org".to_string()
}
