//! IP Reputation Store
//!
//! Single source of truth for per-IP block state and trustworthiness:
//! - Time-bounded and permanent blocks, expired lazily on read
//! - Monotonic violation counts
//! - Suspicion scores with half-life decay
//! - Reputation snapshots combining the internal view with injected sources
//!
//! External sources are awaited without holding any lock; the combine and
//! cache step happens afterwards under the store's own locks.

pub mod sources;

pub use sources::{ReputationSource, SimulatedFeed, SourceReport, StaticReputationSource};

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::ReputationConfig;
use crate::error::ReputationSourceError;
use crate::events::{SecurityAlert, SecurityEvent, SharedSink};

/// Name of the internal source in snapshots
pub const INTERNAL_SOURCE: &str = "internal";

/// Suspicion below this is treated as zero when pruning records
const SUSPICION_EPSILON: f64 = 0.01;

/// Active or historical block on an IP
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockInfo {
    pub reason: String,
    pub blocked_at: u64,
    /// `None` for permanent blocks
    pub expires_at: Option<u64>,
    pub permanent: bool,
}

impl BlockInfo {
    /// A block is in force until strictly after its expiry instant
    pub fn is_active(&self, now_ms: u64) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => now_ms <= expires_at,
        }
    }
}

/// Per-IP state
#[derive(Debug, Clone)]
pub struct IpRecord {
    pub ip: String,
    pub first_seen: u64,
    pub violation_count: u32,
    suspicion: f64,
    suspicion_updated_at: u64,
    pub block: Option<BlockInfo>,
}

impl IpRecord {
    fn new(ip: &str, now_ms: u64) -> Self {
        Self {
            ip: ip.to_string(),
            first_seen: now_ms,
            violation_count: 0,
            suspicion: 0.0,
            suspicion_updated_at: now_ms,
            block: None,
        }
    }

    /// Suspicion after half-life decay up to `now_ms`
    pub fn suspicion_at(&self, now_ms: u64, half_life_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.suspicion_updated_at) as f64;
        let half_lives = elapsed / half_life_ms.max(1) as f64;
        (self.suspicion * 0.5f64.powf(half_lives)).clamp(0.0, 1.0)
    }

    /// Fold decay into the stored value so later updates start from it
    fn settle(&mut self, now_ms: u64, half_life_ms: u64) {
        self.suspicion = self.suspicion_at(now_ms, half_life_ms);
        self.suspicion_updated_at = now_ms;
    }

    fn active_block(&self, now_ms: u64) -> Option<&BlockInfo> {
        self.block.as_ref().filter(|b| b.is_active(now_ms))
    }
}

/// Per-source contribution to a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceScore {
    pub name: String,
    pub score: f64,
    /// False when the source failed and the neutral score was substituted
    pub available: bool,
}

/// Combined reputation for one IP
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReputationSnapshot {
    pub ip: String,
    /// Arithmetic mean of all source scores, 0 when the IP is blocked
    pub score: f64,
    pub threats: BTreeSet<String>,
    pub sources: Vec<SourceScore>,
    pub computed_at: u64,
}

/// Counts of what a sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReputationSweep {
    pub expired_blocks: usize,
    pub stale_cache_entries: usize,
    pub idle_records: usize,
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReputationStats {
    pub tracked_ips: usize,
    pub blocked_ips: usize,
    pub permanent_blocks: usize,
    pub suspicious_ips: usize,
    pub cached_snapshots: usize,
    pub sources: usize,
}

/// IP reputation store
pub struct IpReputationStore {
    config: ReputationConfig,
    records: RwLock<HashMap<String, IpRecord>>,
    cache: RwLock<HashMap<String, ReputationSnapshot>>,
    sources: Vec<Arc<dyn ReputationSource>>,
    clock: SharedClock,
    sink: SharedSink,
}

impl IpReputationStore {
    /// Create a new store
    pub fn new(
        config: ReputationConfig,
        sources: Vec<Arc<dyn ReputationSource>>,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            sources,
            clock,
            sink,
        }
    }

    /// Check whether an IP is currently blocked, clearing an expired block
    pub fn is_blocked(&self, ip: &str) -> bool {
        self.block_info(ip).is_some()
    }

    /// Active block for an IP, if any
    pub fn block_info(&self, ip: &str) -> Option<BlockInfo> {
        let now = self.clock.now_ms();

        {
            let records = self.records.read();
            match records.get(ip).and_then(|r| r.block.as_ref()) {
                None => return None,
                Some(block) if block.is_active(now) => return Some(block.clone()),
                Some(_) => {}
            }
        }

        // Expired: clear it, re-checking under the write lock in case a new
        // block landed in between
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(ip) {
            if let Some(block) = &record.block {
                if block.is_active(now) {
                    return Some(block.clone());
                }
                debug!(ip = %ip, reason = %block.reason, "Block expired");
                record.block = None;
            }
        }
        drop(records);
        self.cache.write().remove(ip);
        None
    }

    /// Block an IP. `None` duration means permanent.
    pub fn block(&self, ip: &str, reason: &str, duration: Option<Duration>) -> BlockInfo {
        let (info, _) = self.insert_block(ip, reason, true, |_| duration);
        info
    }

    /// Block an IP unless a block is already in force.
    ///
    /// The block is permanent when this violation brings the count to
    /// `permanent_after`. The active-block check, the violation increment and
    /// the permanence decision happen under one write lock, so concurrent
    /// callers produce exactly one block. Returns the block in force and
    /// whether this call created it.
    pub fn block_unless_blocked(
        &self,
        ip: &str,
        reason: &str,
        duration: Duration,
        permanent_after: u32,
    ) -> (BlockInfo, bool) {
        self.insert_block(ip, reason, false, |violations| {
            (violations < permanent_after).then_some(duration)
        })
    }

    fn insert_block(
        &self,
        ip: &str,
        reason: &str,
        replace_active: bool,
        duration_for: impl FnOnce(u32) -> Option<Duration>,
    ) -> (BlockInfo, bool) {
        let now = self.clock.now_ms();

        let (info, violations) = {
            let mut records = self.records.write();
            let record = records
                .entry(ip.to_string())
                .or_insert_with(|| IpRecord::new(ip, now));
            if !replace_active {
                if let Some(existing) = record.active_block(now) {
                    return (existing.clone(), false);
                }
            }

            let violations = record.violation_count.saturating_add(1);
            let duration = duration_for(violations);
            let info = BlockInfo {
                reason: reason.to_string(),
                blocked_at: now,
                expires_at: duration.map(|d| now.saturating_add(d.as_millis() as u64)),
                permanent: duration.is_none(),
            };
            record.violation_count = violations;
            record.block = Some(info.clone());
            (info, violations)
        };
        self.cache.write().remove(ip);

        info!(
            ip = %ip,
            reason = %reason,
            permanent = info.permanent,
            violations = violations,
            "IP blocked"
        );

        self.sink.record(&SecurityEvent::IpBlocked {
            ip: ip.to_string(),
            reason: reason.to_string(),
            permanent: info.permanent,
            expires_at: info.expires_at,
            violations,
            timestamp: now,
        });
        if info.permanent {
            self.sink.alert(&SecurityAlert::PermanentIpBlock {
                ip: ip.to_string(),
                reason: reason.to_string(),
                violations,
                timestamp: now,
            });
        }

        (info, true)
    }

    /// Lift a block. Violation count and suspicion are kept.
    pub fn unblock(&self, ip: &str) -> bool {
        let now = self.clock.now_ms();
        let removed = self
            .records
            .write()
            .get_mut(ip)
            .and_then(|record| record.block.take())
            .is_some();

        if removed {
            self.cache.write().remove(ip);
            info!(ip = %ip, "IP unblocked");
            self.sink.record(&SecurityEvent::IpUnblocked {
                ip: ip.to_string(),
                timestamp: now,
            });
        }
        removed
    }

    /// Add `delta` to an IP's decayed suspicion; returns the new value
    pub fn adjust_suspicion(&self, ip: &str, delta: f64) -> f64 {
        self.update_suspicion(ip, |s| s + delta)
    }

    /// Multiply an IP's decayed suspicion by `factor`; returns the new value
    pub fn scale_suspicion(&self, ip: &str, factor: f64) -> f64 {
        self.update_suspicion(ip, |s| s * factor)
    }

    fn update_suspicion(&self, ip: &str, f: impl FnOnce(f64) -> f64) -> f64 {
        let now = self.clock.now_ms();
        let half_life = self.config.suspicion_half_life_ms;
        let value = {
            let mut records = self.records.write();
            let record = records
                .entry(ip.to_string())
                .or_insert_with(|| IpRecord::new(ip, now));
            record.settle(now, half_life);
            record.suspicion = f(record.suspicion).clamp(0.0, 1.0);
            record.suspicion
        };
        self.cache.write().remove(ip);
        value
    }

    /// Current decayed suspicion (0 for unknown IPs)
    pub fn suspicion(&self, ip: &str) -> f64 {
        let now = self.clock.now_ms();
        self.records
            .read()
            .get(ip)
            .map(|r| r.suspicion_at(now, self.config.suspicion_half_life_ms))
            .unwrap_or(0.0)
    }

    pub fn violation_count(&self, ip: &str) -> u32 {
        self.records
            .read()
            .get(ip)
            .map(|r| r.violation_count)
            .unwrap_or(0)
    }

    /// Snapshot of a tracked IP's record
    pub fn record(&self, ip: &str) -> Option<IpRecord> {
        self.records.read().get(ip).cloned()
    }

    /// Active blocks, for administration
    pub fn blocked_ips(&self) -> Vec<(String, BlockInfo)> {
        let now = self.clock.now_ms();
        let mut blocked: Vec<_> = self
            .records
            .read()
            .values()
            .filter_map(|r| r.active_block(now).map(|b| (r.ip.clone(), b.clone())))
            .collect();
        blocked.sort_by(|a, b| a.0.cmp(&b.0));
        blocked
    }

    /// Combined reputation for an IP.
    ///
    /// Served from cache within the cache window; otherwise every source is
    /// queried (outside any lock) with a per-source timeout and combined with
    /// the internal score by arithmetic mean.
    pub async fn get_reputation(&self, ip: &str) -> ReputationSnapshot {
        let now = self.clock.now_ms();
        if let Some(cached) = self.cached(ip, now) {
            return cached;
        }

        let external = self.query_sources(ip).await;

        let snapshot = {
            let now = self.clock.now_ms();
            let records = self.records.read();
            let record = records.get(ip);
            let blocked = record.and_then(|r| r.active_block(now)).is_some();
            let suspicion = record
                .map(|r| r.suspicion_at(now, self.config.suspicion_half_life_ms))
                .unwrap_or(0.0);
            let previously_blocked = record.map(|r| r.violation_count > 0).unwrap_or(false);
            drop(records);

            combine(ip, now, blocked, suspicion, previously_blocked, external)
        };

        self.cache.write().insert(ip.to_string(), snapshot.clone());
        snapshot
    }

    /// Query every source concurrently, each under its own timeout.
    /// Results keep source order.
    async fn query_sources(
        &self,
        ip: &str,
    ) -> Vec<(String, Result<SourceReport, ReputationSourceError>)> {
        let timeout = Duration::from_millis(self.config.source_timeout_ms);
        let mut queries = JoinSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let ip = ip.to_string();
            queries.spawn(async move {
                let name = source.name().to_string();
                let result = match tokio::time::timeout(timeout, source.query(&ip)).await {
                    Ok(result) => result,
                    Err(_) => Err(ReputationSourceError::Timeout { name: name.clone() }),
                };
                (index, name, result)
            });
        }

        let mut results: Vec<Option<(String, Result<SourceReport, ReputationSourceError>)>> =
            (0..self.sources.len()).map(|_| None).collect();
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((index, name, result)) => results[index] = Some((name, result)),
                Err(e) => warn!(ip = %ip, error = %e, "Reputation source task failed"),
            }
        }

        results
            .into_iter()
            .zip(&self.sources)
            .map(|(result, source)| {
                result.unwrap_or_else(|| {
                    let name = source.name().to_string();
                    let reason = "query task aborted".to_string();
                    (name.clone(), Err(ReputationSourceError::Unavailable { name, reason }))
                })
            })
            .collect()
    }

    fn cached(&self, ip: &str, now: u64) -> Option<ReputationSnapshot> {
        self.cache
            .read()
            .get(ip)
            .filter(|s| now.saturating_sub(s.computed_at) < self.config.cache_ttl_ms)
            .cloned()
    }

    /// Drop expired blocks, stale cache entries and records with no signal left
    pub fn sweep(&self) -> ReputationSweep {
        let now = self.clock.now_ms();
        let half_life = self.config.suspicion_half_life_ms;
        let mut report = ReputationSweep::default();

        {
            let mut records = self.records.write();
            for record in records.values_mut() {
                if record.block.as_ref().is_some_and(|b| !b.is_active(now)) {
                    record.block = None;
                    report.expired_blocks += 1;
                }
            }
            let before = records.len();
            records.retain(|_, r| {
                r.block.is_some()
                    || r.violation_count > 0
                    || r.suspicion_at(now, half_life) >= SUSPICION_EPSILON
            });
            report.idle_records = before - records.len();
        }

        {
            let ttl = self.config.cache_ttl_ms;
            let mut cache = self.cache.write();
            let before = cache.len();
            cache.retain(|_, s| now.saturating_sub(s.computed_at) < ttl);
            report.stale_cache_entries = before - cache.len();
        }

        if report != ReputationSweep::default() {
            debug!(
                expired_blocks = report.expired_blocks,
                stale_cache_entries = report.stale_cache_entries,
                idle_records = report.idle_records,
                "Reputation sweep"
            );
        }
        report
    }

    pub fn stats(&self) -> ReputationStats {
        let now = self.clock.now_ms();
        let half_life = self.config.suspicion_half_life_ms;
        let records = self.records.read();
        let mut stats = ReputationStats {
            tracked_ips: records.len(),
            cached_snapshots: self.cache.read().len(),
            sources: self.sources.len(),
            ..Default::default()
        };
        for record in records.values() {
            if let Some(block) = record.active_block(now) {
                stats.blocked_ips += 1;
                if block.permanent {
                    stats.permanent_blocks += 1;
                }
            }
            if record.suspicion_at(now, half_life) > 0.5 {
                stats.suspicious_ips += 1;
            }
        }
        stats
    }
}

/// Internal trust derived from local state
pub fn internal_score(blocked: bool, suspicion: f64) -> f64 {
    if blocked {
        0.0
    } else if suspicion > 0.8 {
        0.2
    } else if suspicion > 0.5 {
        0.5
    } else {
        (1.0 - suspicion).max(0.1)
    }
}

/// Non-finite scores fall back to neutral so they cannot poison the mean
fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        SourceReport::neutral().score
    }
}

fn combine(
    ip: &str,
    now: u64,
    blocked: bool,
    suspicion: f64,
    previously_blocked: bool,
    external: Vec<(String, Result<SourceReport, ReputationSourceError>)>,
) -> ReputationSnapshot {
    let mut threats = BTreeSet::new();
    if previously_blocked {
        threats.insert("previously_blocked".to_string());
    }

    let mut sources = vec![SourceScore {
        name: INTERNAL_SOURCE.to_string(),
        score: internal_score(blocked, suspicion),
        available: true,
    }];

    for (name, result) in external {
        match result {
            Ok(report) => {
                threats.extend(report.threats);
                sources.push(SourceScore {
                    name,
                    score: sanitize_score(report.score),
                    available: true,
                });
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "Reputation source unavailable, using neutral score");
                sources.push(SourceScore {
                    name,
                    score: SourceReport::neutral().score,
                    available: false,
                });
            }
        }
    }

    let mean = sources.iter().map(|s| s.score).sum::<f64>() / sources.len() as f64;
    let score = if blocked { 0.0 } else { mean.clamp(0.0, 1.0) };

    ReputationSnapshot {
        ip: ip.to_string(),
        score,
        threats,
        sources,
        computed_at: now,
    }
}
