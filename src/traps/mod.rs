//! Honeypot Trap Registry
//!
//! Decoy resources no legitimate visitor requests:
//! - Static paths fixed at startup
//! - Invisible links and hidden forms injected into served pages
//! - Fake API endpoints returning fabricated JSON
//! - Decoy HTML pages
//!
//! Dynamic traps are regenerated once older than the rotation window. The
//! trap table is replaced wholesale on every change, so a lookup always sees
//! either the old or the new set.

pub mod decoys;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::{routes_collide, TrapConfig};
use crate::error::GateError;
use crate::request::GateRequest;

/// Attempts at finding a free suffixed path before a slot is skipped
const MAX_PATH_ATTEMPTS: usize = 8;

/// Trap variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapKind {
    Static,
    InvisibleLink,
    HiddenForm,
    FakeApi,
    DecoyContent,
}

impl TrapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrapKind::Static => "static",
            TrapKind::InvisibleLink => "invisible_link",
            TrapKind::HiddenForm => "hidden_form",
            TrapKind::FakeApi => "fake_api",
            TrapKind::DecoyContent => "decoy_content",
        }
    }

    /// Kinds whose path carries a random suffix that changes on rotation
    fn has_suffix(&self) -> bool {
        matches!(self, TrapKind::InvisibleLink | TrapKind::HiddenForm)
    }
}

/// Body served to medium-suspicion visitors of a trap
#[derive(Debug, Clone, PartialEq)]
pub enum DecoyBody {
    Json(Value),
    Html(String),
}

/// A single honeypot
#[derive(Debug)]
pub struct Trap {
    pub id: String,
    pub path: String,
    pub kind: TrapKind,
    pub created_at: u64,
    /// Markup to embed in pages (links and forms only)
    pub html: Option<String>,
    pub decoy: Option<DecoyBody>,
    /// Base path this trap was generated from; `None` for static traps
    slot: Option<String>,
    active: AtomicBool,
    triggers: AtomicU64,
    last_triggered: AtomicU64,
}

impl Trap {
    fn new(kind: TrapKind, path: String, slot: Option<String>, now_ms: u64) -> Self {
        Self {
            id: new_trap_id(),
            path,
            kind,
            created_at: now_ms,
            html: None,
            decoy: None,
            slot,
            active: AtomicBool::new(true),
            triggers: AtomicU64::new(0),
            last_triggered: AtomicU64::new(0),
        }
    }

    /// Static trap at a fixed path
    pub fn fixed(path: impl Into<String>, now_ms: u64) -> Self {
        Self::new(TrapKind::Static, path.into(), None, now_ms)
    }

    /// Dynamic trap generated from a base path.
    ///
    /// Links and forms get a random suffix; fake APIs and decoy pages keep the
    /// base path and get freshly fabricated content.
    pub fn dynamic(kind: TrapKind, slot: &str, now_ms: u64) -> Self {
        let mut rng = rand::thread_rng();
        let path = if kind.has_suffix() {
            suffixed(slot, &mut rng)
        } else {
            slot.to_string()
        };

        let mut trap = Self::new(kind, path, Some(slot.to_string()), now_ms);
        match kind {
            TrapKind::InvisibleLink => trap.html = Some(decoys::invisible_link_html(&trap.path)),
            TrapKind::HiddenForm => trap.html = Some(decoys::hidden_form_html(&trap.path)),
            TrapKind::FakeApi => {
                trap.decoy = Some(DecoyBody::Json(decoys::fake_api_payload(
                    slot, now_ms, &mut rng,
                )))
            }
            TrapKind::DecoyContent => trap.decoy = Some(DecoyBody::Html(decoys::decoy_page(slot))),
            TrapKind::Static => {}
        }
        trap
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn triggers(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    pub fn last_triggered(&self) -> Option<u64> {
        match self.last_triggered.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    fn is_stale(&self, now_ms: u64, rotation_ms: u64) -> bool {
        self.kind != TrapKind::Static && now_ms.saturating_sub(self.created_at) > rotation_ms
    }

    fn info(&self) -> TrapInfo {
        TrapInfo {
            id: self.id.clone(),
            path: self.path.clone(),
            kind: self.kind,
            created_at: self.created_at,
            active: self.is_active(),
            triggers: self.triggers(),
            last_triggered: self.last_triggered(),
        }
    }
}

/// What a trap hit looked like
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub trap_id: String,
    pub trap_kind: TrapKind,
    pub ip: String,
    pub user_agent: String,
    pub timestamp: u64,
    pub path: String,
    pub method: String,
}

/// Trap listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrapInfo {
    pub id: String,
    pub path: String,
    pub kind: TrapKind,
    pub created_at: u64,
    pub active: bool,
    pub triggers: u64,
    pub last_triggered: Option<u64>,
}

/// Result of a rotation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub retired: usize,
    pub deployed: usize,
}

type TrapTable = HashMap<String, Arc<Trap>>;

/// Honeypot trap registry
pub struct TrapRegistry {
    config: TrapConfig,
    table: RwLock<Arc<TrapTable>>,
    clock: SharedClock,
}

impl TrapRegistry {
    /// Create a registry with the configured static traps and, when enabled,
    /// the default dynamic set
    pub fn new(config: TrapConfig, clock: SharedClock) -> Result<Self, GateError> {
        let registry = Self {
            config,
            table: RwLock::new(Arc::new(HashMap::new())),
            clock,
        };

        let static_paths = registry.config.static_paths.clone();
        registry.register_static(&static_paths)?;

        if registry.config.dynamic_traps {
            let now = registry.clock.now_ms();
            let traps = default_dynamic_slots()
                .map(|(kind, slot)| Trap::dynamic(kind, slot, now))
                .collect();
            registry.register_dynamic(traps);
        }

        info!(
            traps = registry.len(),
            dynamic = registry.config.dynamic_traps,
            "Trap registry initialized"
        );

        Ok(registry)
    }

    /// Register fixed trap paths.
    ///
    /// All-or-nothing: a malformed path, a path already claimed, or a collision
    /// with an application route rejects the whole batch.
    pub fn register_static(&self, paths: &[String]) -> Result<usize, GateError> {
        let now = self.clock.now_ms();
        let mut table = self.table.write();
        let mut next: TrapTable = (**table).clone();

        for path in paths {
            if !path.starts_with('/') {
                return Err(GateError::InvalidConfiguration(format!(
                    "honeypot path '{}' must start with '/'",
                    path
                )));
            }
            if next.contains_key(path) {
                return Err(GateError::InvalidConfiguration(format!(
                    "honeypot path '{}' is already registered",
                    path
                )));
            }
            if let Some(route) = self.reserved_collision(path) {
                return Err(GateError::InvalidConfiguration(format!(
                    "honeypot path '{}' collides with application route '{}'",
                    path, route
                )));
            }
            next.insert(path.clone(), Arc::new(Trap::fixed(path.clone(), now)));
        }

        *table = Arc::new(next);
        Ok(paths.len())
    }

    /// Install dynamic traps. Traps whose path is taken or reserved are
    /// skipped with a warning; returns how many were installed.
    pub fn register_dynamic(&self, traps: Vec<Trap>) -> usize {
        let mut table = self.table.write();
        let mut next: TrapTable = (**table).clone();
        let mut installed = 0;

        for trap in traps {
            if let Some(trap) = self.place(&next, trap) {
                next.insert(trap.path.clone(), Arc::new(trap));
                installed += 1;
            }
        }

        *table = Arc::new(next);
        installed
    }

    /// Regenerate every dynamic trap older than the rotation window.
    ///
    /// Static traps are never touched. The new table replaces the old one in a
    /// single swap under the write lock.
    pub fn rotate(&self) -> RotationReport {
        let now = self.clock.now_ms();
        let rotation_ms = self.config.rotation_ms;
        let mut table = self.table.write();

        let (stale, mut next): (Vec<Arc<Trap>>, TrapTable) = {
            let mut stale = Vec::new();
            let mut kept = HashMap::with_capacity(table.len());
            for (path, trap) in table.iter() {
                if trap.is_stale(now, rotation_ms) {
                    stale.push(trap.clone());
                } else {
                    kept.insert(path.clone(), trap.clone());
                }
            }
            (stale, kept)
        };

        let mut report = RotationReport {
            retired: stale.len(),
            deployed: 0,
        };
        for old in stale {
            let slot = old.slot.clone().unwrap_or_else(|| old.path.clone());
            if let Some(trap) = self.place(&next, Trap::dynamic(old.kind, &slot, now)) {
                next.insert(trap.path.clone(), Arc::new(trap));
                report.deployed += 1;
            }
        }

        *table = Arc::new(next);

        if report.retired > 0 {
            info!(
                retired = report.retired,
                deployed = report.deployed,
                "Dynamic traps rotated"
            );
        }
        report
    }

    /// Find a free path for a trap, re-rolling the suffix of links and forms
    fn place(&self, table: &TrapTable, mut trap: Trap) -> Option<Trap> {
        for _ in 0..MAX_PATH_ATTEMPTS {
            let taken = table.contains_key(&trap.path);
            let reserved = self.reserved_collision(&trap.path);
            if !taken && reserved.is_none() {
                return Some(trap);
            }
            if !trap.kind.has_suffix() {
                warn!(
                    path = %trap.path,
                    kind = trap.kind.as_str(),
                    "Trap path unavailable, skipping"
                );
                return None;
            }
            let Some(slot) = trap.slot.clone() else {
                return None;
            };
            trap = Trap::dynamic(trap.kind, &slot, trap.created_at);
        }
        warn!(path = %trap.path, "No free trap path found, skipping");
        None
    }

    fn reserved_collision(&self, path: &str) -> Option<&str> {
        self.config
            .reserved_routes
            .iter()
            .find(|route| routes_collide(path, route))
            .map(|s| s.as_str())
    }

    fn snapshot(&self) -> Arc<TrapTable> {
        self.table.read().clone()
    }

    /// Active trap at exactly this path
    pub fn match_path(&self, path: &str) -> Option<Arc<Trap>> {
        self.table
            .read()
            .get(path)
            .filter(|trap| trap.is_active())
            .cloned()
    }

    /// Count a hit on a trap
    pub fn record_trigger(&self, trap: &Trap, request: &GateRequest) -> TriggerEvent {
        let now = self.clock.now_ms();
        trap.triggers.fetch_add(1, Ordering::Relaxed);
        trap.last_triggered.store(now.max(1), Ordering::Relaxed);

        debug!(
            trap_id = %trap.id,
            path = %trap.path,
            ip = %request.ip,
            "Trap triggered"
        );

        TriggerEvent {
            trap_id: trap.id.clone(),
            trap_kind: trap.kind,
            ip: request.ip.clone(),
            user_agent: request.user_agent().to_string(),
            timestamp: now,
            path: request.path.clone(),
            method: request.method.clone(),
        }
    }

    /// Enable or disable the trap at a path; false if there is none
    pub fn set_active(&self, path: &str, active: bool) -> bool {
        match self.table.read().get(path) {
            Some(trap) => {
                trap.active.store(active, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Hidden links and forms for embedding in served pages, ordered by path
    pub fn injectable_html(&self) -> Vec<String> {
        let table = self.snapshot();
        let mut traps: Vec<&Arc<Trap>> = table
            .values()
            .filter(|t| t.is_active() && t.html.is_some())
            .collect();
        traps.sort_by(|a, b| a.path.cmp(&b.path));
        traps.iter().filter_map(|t| t.html.clone()).collect()
    }

    /// All traps, ordered by path
    pub fn traps(&self) -> Vec<TrapInfo> {
        let mut traps: Vec<TrapInfo> = self.snapshot().values().map(|t| t.info()).collect();
        traps.sort_by(|a, b| a.path.cmp(&b.path));
        traps
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_dynamic_slots() -> impl Iterator<Item = (TrapKind, &'static str)> {
    let links = decoys::INVISIBLE_LINK_SLOTS
        .iter()
        .map(|s| (TrapKind::InvisibleLink, *s));
    let forms = decoys::HIDDEN_FORM_SLOTS
        .iter()
        .map(|s| (TrapKind::HiddenForm, *s));
    let apis = decoys::FAKE_API_SLOTS.iter().map(|s| (TrapKind::FakeApi, *s));
    let pages = decoys::DECOY_PAGE_SLOTS
        .iter()
        .map(|s| (TrapKind::DecoyContent, *s));
    links.chain(forms).chain(apis).chain(pages)
}

fn suffixed<R: Rng>(slot: &str, rng: &mut R) -> String {
    format!("{}-{:06x}", slot, rng.gen_range(0..0x100_0000u32))
}

fn new_trap_id() -> String {
    format!("trap_{:016x}", rand::thread_rng().gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    const DYNAMIC_COUNT: usize = 18;

    fn create_registry(config: TrapConfig) -> (TrapRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry = TrapRegistry::new(config, clock.clone()).unwrap();
        (registry, clock)
    }

    fn static_only() -> TrapConfig {
        TrapConfig {
            dynamic_traps: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_static_traps_match_exactly() {
        let (registry, _) = create_registry(static_only());
        assert_eq!(registry.len(), 10);

        let trap = registry.match_path("/admin-secret/").unwrap();
        assert_eq!(trap.kind, TrapKind::Static);
        assert!(registry.match_path("/admin-secret").is_none());
        assert!(registry.match_path("/admin-secret/x").is_none());
        assert!(registry.match_path("/").is_none());
    }

    #[test]
    fn test_default_dynamic_set() {
        let (registry, _) = create_registry(TrapConfig::default());
        assert_eq!(registry.len(), 10 + DYNAMIC_COUNT);

        let api = registry.match_path("/api/internal/config").unwrap();
        assert_eq!(api.kind, TrapKind::FakeApi);
        assert!(matches!(&api.decoy, Some(DecoyBody::Json(v)) if v["honeypot"] == true));

        let page = registry.match_path("/system-logs.html").unwrap();
        assert!(matches!(page.decoy, Some(DecoyBody::Html(_))));

        // 5 links + 4 forms
        assert_eq!(registry.injectable_html().len(), 9);
    }

    #[test]
    fn test_link_paths_are_suffixed() {
        let (registry, _) = create_registry(TrapConfig::default());
        let links: Vec<TrapInfo> = registry
            .traps()
            .into_iter()
            .filter(|t| t.kind == TrapKind::InvisibleLink)
            .collect();
        assert_eq!(links.len(), 5);
        for link in &links {
            let (base, suffix) = link.path.rsplit_once('-').unwrap();
            assert!(decoys::INVISIBLE_LINK_SLOTS.contains(&base));
            assert_eq!(suffix.len(), 6);
        }
    }

    #[test]
    fn test_register_static_rejects_duplicates() {
        let (registry, _) = create_registry(static_only());
        let err = registry
            .register_static(&["/fresh/".to_string(), "/admin-secret/".to_string()])
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidConfiguration(_)));
        // Nothing from the failed batch was installed
        assert!(registry.match_path("/fresh/").is_none());
    }

    #[test]
    fn test_register_static_rejects_reserved_routes() {
        let config = TrapConfig {
            static_paths: Vec::new(),
            dynamic_traps: false,
            reserved_routes: vec!["/shop".to_string()],
            ..Default::default()
        };
        let (registry, _) = create_registry(config);
        assert!(registry.register_static(&["/shop/".to_string()]).is_err());
        assert_eq!(registry.register_static(&["/trap/".to_string()]).unwrap(), 1);
    }

    #[test]
    fn test_dynamic_trap_on_reserved_route_is_skipped() {
        let config = TrapConfig {
            reserved_routes: vec!["/system-logs.html".to_string()],
            ..Default::default()
        };
        let (registry, _) = create_registry(config);
        assert!(registry.match_path("/system-logs.html").is_none());
        assert_eq!(registry.len(), 10 + DYNAMIC_COUNT - 1);
    }

    #[test]
    fn test_trigger_counting() {
        let (registry, clock) = create_registry(static_only());
        let trap = registry.match_path("/backup-files/").unwrap();
        let request = GateRequest::new("1.2.3.4", "GET", "/backup-files/")
            .with_header("User-Agent", "curl/8.0");

        clock.advance(Duration::from_secs(5));
        let event = registry.record_trigger(&trap, &request);
        assert_eq!(event.ip, "1.2.3.4");
        assert_eq!(event.user_agent, "curl/8.0");
        assert_eq!(event.trap_kind, TrapKind::Static);
        assert_eq!(event.timestamp, 1_005_000);

        registry.record_trigger(&trap, &request);
        let trap = registry.match_path("/backup-files/").unwrap();
        assert_eq!(trap.triggers(), 2);
        assert_eq!(trap.last_triggered(), Some(1_005_000));
    }

    #[test]
    fn test_rotation_replaces_stale_dynamic_traps() {
        let (registry, clock) = create_registry(TrapConfig::default());
        let before = registry.traps();

        // Nothing is stale yet
        assert_eq!(registry.rotate(), RotationReport::default());

        clock.advance(Duration::from_millis(3_600_001));
        let report = registry.rotate();
        assert_eq!(report.retired, DYNAMIC_COUNT);
        assert_eq!(report.deployed, DYNAMIC_COUNT);

        let after = registry.traps();
        assert_eq!(after.len(), before.len());

        for trap in &before {
            match trap.kind {
                TrapKind::Static => {
                    assert!(after.iter().any(|t| t.id == trap.id && t.path == trap.path));
                }
                TrapKind::FakeApi | TrapKind::DecoyContent => {
                    let replaced = after.iter().find(|t| t.path == trap.path).unwrap();
                    assert_ne!(replaced.id, trap.id);
                }
                TrapKind::InvisibleLink | TrapKind::HiddenForm => {
                    assert!(after.iter().all(|t| t.id != trap.id));
                }
            }
        }
    }

    #[test]
    fn test_disabled_trap_does_not_match() {
        let (registry, _) = create_registry(static_only());
        assert!(registry.set_active("/secret-api/", false));
        assert!(registry.match_path("/secret-api/").is_none());
        assert!(!registry.set_active("/nope/", false));
    }
}
