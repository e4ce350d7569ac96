//! Reputation Sources
//!
//! External opinions about an IP address. Each source returns a score in
//! `[0, 1]` (higher = more trustworthy) plus optional threat tags. Real
//! services plug in behind [`ReputationSource`]; the implementations here are
//! a static table and a randomized stand-in feed.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ReputationSourceError;

/// One source's opinion about an IP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub score: f64,
    #[serde(default)]
    pub threats: Vec<String>,
}

impl SourceReport {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            threats: Vec::new(),
        }
    }

    pub fn with_threat(mut self, threat: impl Into<String>) -> Self {
        self.threats.push(threat.into());
        self
    }

    /// Score used when a source cannot answer
    pub fn neutral() -> Self {
        Self::new(0.5)
    }
}

/// A reputation lookup capability
#[async_trait]
pub trait ReputationSource: Send + Sync {
    /// Source name used in snapshots and logs
    fn name(&self) -> &str;

    /// Look up an IP
    async fn query(&self, ip: &str) -> Result<SourceReport, ReputationSourceError>;
}

/// Fixed table of reports with a fallback for unlisted IPs
#[derive(Debug, Clone)]
pub struct StaticReputationSource {
    name: String,
    reports: HashMap<String, SourceReport>,
    fallback: SourceReport,
}

impl StaticReputationSource {
    /// Create a source that answers `fallback` for every IP
    pub fn new(name: impl Into<String>, fallback: SourceReport) -> Self {
        Self {
            name: name.into(),
            reports: HashMap::new(),
            fallback,
        }
    }

    /// Add a specific answer for one IP
    pub fn with_report(mut self, ip: impl Into<String>, report: SourceReport) -> Self {
        self.reports.insert(ip.into(), report);
        self
    }
}

#[async_trait]
impl ReputationSource for StaticReputationSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, ip: &str) -> Result<SourceReport, ReputationSourceError> {
        Ok(self
            .reports
            .get(ip)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Randomized stand-in for a third-party feed
#[derive(Debug, Clone)]
pub struct SimulatedFeed {
    name: String,
    /// Probability an IP is reported clean
    clean_probability: f64,
    clean_score: f64,
    dirty_score: f64,
    /// Probability a threat tag is attached
    threat_probability: f64,
    threats: Vec<String>,
    latency: Duration,
}

impl SimulatedFeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clean_probability: 0.9,
            clean_score: 0.8,
            dirty_score: 0.2,
            threat_probability: 0.1,
            threats: Vec::new(),
            latency: Duration::ZERO,
        }
    }

    /// Abuse-report style feed
    pub fn abuse_feed() -> Self {
        Self {
            threats: vec!["malware".to_string(), "spam".to_string()],
            latency: Duration::from_millis(100),
            ..Self::new("abuse_feed")
        }
    }

    /// Malware/botnet style feed
    pub fn malware_feed() -> Self {
        Self {
            clean_probability: 0.95,
            clean_score: 0.9,
            dirty_score: 0.1,
            threat_probability: 0.05,
            threats: vec!["botnet".to_string()],
            latency: Duration::from_millis(150),
            ..Self::new("malware_feed")
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ReputationSource for SimulatedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, _ip: &str) -> Result<SourceReport, ReputationSourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        // ThreadRng is not Send; keep it out of scope across the await above
        let mut rng = rand::thread_rng();
        let score = if rng.gen_bool(self.clean_probability) {
            self.clean_score
        } else {
            self.dirty_score
        };
        let mut report = SourceReport::new(score);
        if !self.threats.is_empty() && rng.gen_bool(self.threat_probability) {
            report.threats = self.threats.clone();
        }
        Ok(report)
    }
}
