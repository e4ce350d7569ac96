//! Zentinel Abuse Gate Library
//!
//! A request-risk gate that sits in front of a web application and decides,
//! per request, whether to allow it, challenge the client, block the client's
//! IP, or answer with a honeypot response.
//!
//! # Features
//!
//! - **IP Reputation**: internal suspicion with exponential decay, combined with
//!   pluggable external sources under a per-source timeout
//! - **Adaptive Challenges**: math, distorted text, image selection and
//!   behavioral challenges with single-use opaque IDs and attempt caps
//! - **Honeypot Traps**: static paths plus rotating invisible links, hidden
//!   forms, fake API endpoints and decoy pages
//! - **Scraper Profiles**: trap-hit history, pattern tagging and escalation up
//!   to time-bounded or permanent blocks
//! - **Fail Open**: internal errors are logged and counted, never surfaced as a
//!   rejection
//!
//! # Example
//!
//! ```ignore
//! use zentinel_abuse_gate::{GateConfig, GateOrchestrator, GateRequest};
//!
//! let gate = GateOrchestrator::new(GateConfig::default())?;
//! let request = GateRequest::new("203.0.113.7", "GET", "/admin")
//!     .with_header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0");
//!
//! match gate.evaluate(&request).await {
//!     decision if decision.is_allow() => { /* forward upstream */ }
//!     decision => { /* send decision.response_body() */ }
//! }
//! ```

pub mod bot;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod csp;
pub mod decision;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod profile;
pub mod reputation;
pub mod request;
pub mod traps;

// Re-exports for convenience
pub use challenge::{BehaviorData, ChallengeManager, ChallengePayload};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ChallengeType, DetectionSensitivity, Difficulty, GateConfig, GateConfigJson};
pub use decision::{ChallengeReason, ChallengeVerification, GateDecision, TrapBody};
pub use engine::{GateBuilder, GateOrchestrator, GateStats, PassStrength, SweepReport};
pub use error::{ChallengeError, GateError, ReputationSourceError};
pub use events::{MemorySink, SecurityAlert, SecurityEvent, SecuritySink, TracingSink};
pub use profile::{Evidence, ScraperProfile, SuspicionLevel};
pub use reputation::{IpReputationStore, ReputationSnapshot, ReputationSource, SourceReport};
pub use request::{client_ip, GateRequest};
pub use traps::{Trap, TrapKind, TrapRegistry};
