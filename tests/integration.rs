//! Integration tests for the abuse gate.
//!
//! These drive a full `GateOrchestrator` through its public API with a manual
//! clock and an in-memory event sink.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use zentinel_abuse_gate::challenge::{ClickSample, Keystroke, MousePoint, IMAGE_CATEGORIES};
use zentinel_abuse_gate::reputation::{SimulatedFeed, StaticReputationSource};
use zentinel_abuse_gate::{
    BehaviorData, ChallengeReason, ChallengeType, DetectionSensitivity, Difficulty, GateConfig,
    GateDecision, GateError, GateOrchestrator, GateRequest, ManualClock, MemorySink, SecurityAlert,
    SourceReport, TrapBody, TrapKind,
};

const START_MS: u64 = 1_700_000_000_000;
const BROWSER_UA: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15";

/// Default configuration without the random new-IP roll
fn test_config() -> GateConfig {
    GateConfig {
        detection_sensitivity: DetectionSensitivity::Low,
        ..Default::default()
    }
}

fn create_gate(config: GateConfig) -> (GateOrchestrator, Arc<ManualClock>, Arc<MemorySink>) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let sink = Arc::new(MemorySink::new());
    let gate = GateOrchestrator::builder(config)
        .clock(clock.clone())
        .event_sink(sink.clone())
        .build()
        .expect("Failed to build gate");
    (gate, clock, sink)
}

/// Request carrying the headers a real browser sends
fn browser_request(ip: &str, path: &str) -> GateRequest {
    GateRequest::new(ip, "GET", path)
        .with_header("User-Agent", BROWSER_UA)
        .with_header("Accept", "text/html,application/xhtml+xml")
        .with_header("Accept-Language", "en-GB,en;q=0.9")
}

/// Interaction samples that satisfy every behavioral task
fn human_behavior() -> BehaviorData {
    let mouse = (0..20)
        .map(|i| {
            let angle = i as f64 * std::f64::consts::TAU / 20.0;
            MousePoint {
                x: 200.0 + 100.0 * angle.cos(),
                y: 200.0 + 100.0 * angle.sin(),
            }
        })
        .collect();
    let keystrokes = [0.0, 100.0, 300.0, 400.0, 600.0, 700.0]
        .iter()
        .map(|&timestamp| Keystroke { timestamp })
        .collect();
    let clicks = [320.0, 410.0, 505.0]
        .iter()
        .map(|&reaction_time| ClickSample { reaction_time })
        .collect();
    BehaviorData {
        mouse,
        keystrokes,
        clicks,
    }
}

fn parse_math(question: &str) -> i64 {
    let parts: Vec<&str> = question
        .trim_start_matches("What is ")
        .trim_end_matches('?')
        .split_whitespace()
        .collect();
    let left: i64 = parts[0].parse().unwrap();
    let right: i64 = parts[2].parse().unwrap();
    match parts[1] {
        "+" => left + right,
        "-" => left - right,
        "×" => left * right,
        "÷" => left / right,
        other => panic!("unexpected operator {}", other),
    }
}

// ============================================================================
// Honeypot Escalation
// ============================================================================

#[tokio::test]
async fn test_first_trap_hit_delays_not_found() {
    let (gate, _, sink) = create_gate(test_config());

    let decision = gate.evaluate(&browser_request("198.51.100.1", "/admin-secret/")).await;
    assert!(decision.response_body().unwrap().body.is_empty());
    match decision {
        GateDecision::TrapResponse {
            http_status,
            delay_ms,
            body,
        } => {
            assert_eq!(http_status, 404);
            assert_eq!(delay_ms, 5_000);
            assert_eq!(body, TrapBody::Empty);
        }
        other => panic!("Expected trap response, got {:?}", other),
    }

    let profile = gate.profile("198.51.100.1").unwrap();
    assert_eq!(profile.trap_triggers, 1);
    assert_eq!(gate.evidence_for("198.51.100.1").len(), 1);
    assert_eq!(sink.count("honeypot_triggered"), 1);
    assert!(!gate.is_blocked("198.51.100.1"));
}

#[tokio::test]
async fn test_three_traps_block_the_ip() {
    let (gate, _, sink) = create_gate(test_config());
    let ip = "198.51.100.2";

    let first = gate.evaluate(&browser_request(ip, "/admin-secret/")).await;
    assert_eq!(first.http_status(), Some(404));

    let second = gate.evaluate(&browser_request(ip, "/backup-files/")).await;
    match second {
        GateDecision::TrapResponse { delay_ms, .. } => assert_eq!(delay_ms, 10_000),
        other => panic!("Expected trap response, got {:?}", other),
    }

    let third = gate.evaluate(&browser_request(ip, "/private-data/")).await;
    assert!(
        matches!(third, GateDecision::Blocked { http_status: 403, permanent: false, .. }),
        "Expected block, got {:?}",
        third
    );

    // Any path is now blocked
    let fourth = gate.evaluate(&browser_request(ip, "/")).await;
    assert!(matches!(fourth, GateDecision::Blocked { permanent: false, .. }));
    assert!(gate.is_blocked(ip));

    assert_eq!(sink.count("ip_blocked"), 1);
    assert!(sink
        .alerts()
        .iter()
        .any(|a| matches!(a, SecurityAlert::CriticalScraper { trap_triggers: 3, .. })));
}

#[tokio::test]
async fn test_block_expires_after_duration() {
    let (gate, clock, _) = create_gate(test_config());
    let ip = "198.51.100.3";

    for path in ["/admin-secret/", "/backup-files/", "/private-data/"] {
        gate.evaluate(&browser_request(ip, path)).await;
    }
    assert!(gate.is_blocked(ip));

    clock.advance(Duration::from_millis(3_600_000));
    assert!(gate.is_blocked(ip));

    clock.advance(Duration::from_millis(1));
    assert!(!gate.is_blocked(ip));
}

#[tokio::test]
async fn test_dynamic_trap_link_is_a_trap() {
    let (gate, _, _) = create_gate(test_config());

    let html = gate.injectable_html();
    let link = gate
        .trap_registry()
        .traps()
        .into_iter()
        .find(|t| t.kind == TrapKind::InvisibleLink)
        .expect("No invisible link deployed");
    assert!(html.contains(&link.path));

    let decision = gate.evaluate(&browser_request("198.51.100.4", &link.path)).await;
    assert!(decision.is_trap_response());
}

#[tokio::test]
async fn test_fake_api_decoy_is_tagged() {
    let (gate, _, _) = create_gate(test_config());

    // No Accept-Language: one hit lands at medium suspicion
    let request = GateRequest::new("198.51.100.5", "GET", "/api/internal/config")
        .with_header("User-Agent", BROWSER_UA)
        .with_header("Accept", "application/json");

    let decision = gate.evaluate(&request).await;
    let body = decision.response_body().unwrap();
    assert_eq!(decision.http_status(), Some(200));
    assert_eq!(body.content_type, "application/json");

    let value: serde_json::Value = serde_json::from_str(&body.body).unwrap();
    assert_eq!(value["honeypot"], true);
}

#[tokio::test]
async fn test_repeat_offender_is_blocked_permanently() {
    let mut config = test_config();
    config.permanent_block_threshold = 2;
    let (gate, clock, sink) = create_gate(config);
    let ip = "198.51.100.6";

    for path in ["/admin-secret/", "/backup-files/", "/private-data/"] {
        gate.evaluate(&browser_request(ip, path)).await;
    }
    clock.advance(Duration::from_millis(3_600_001));
    assert!(!gate.is_blocked(ip));

    let decision = gate.evaluate(&browser_request(ip, "/system-config/")).await;
    assert!(matches!(decision, GateDecision::Blocked { permanent: true, .. }));
    assert!(sink
        .alerts()
        .iter()
        .any(|a| matches!(a, SecurityAlert::PermanentIpBlock { violations: 2, .. })));

    clock.advance(Duration::from_secs(365 * 24 * 3600));
    assert!(gate.is_blocked(ip));
}

// ============================================================================
// Reputation
// ============================================================================

#[tokio::test]
async fn test_good_reputation_is_allowed() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let gate = GateOrchestrator::builder(test_config())
        .clock(clock)
        .event_sink(Arc::new(MemorySink::new()))
        .reputation_source(Arc::new(StaticReputationSource::new(
            "feed",
            SourceReport::new(0.8),
        )))
        .build()
        .unwrap();

    let snapshot = gate.reputation("203.0.113.10").await;
    assert!((snapshot.score - 0.9).abs() < 1e-9);

    let decision = gate.evaluate(&browser_request("203.0.113.10", "/products")).await;
    assert_eq!(decision, GateDecision::Allow);
}

#[tokio::test]
async fn test_low_reputation_is_challenged_with_images() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let gate = GateOrchestrator::builder(test_config())
        .clock(clock)
        .event_sink(Arc::new(MemorySink::new()))
        .reputation_source(Arc::new(
            StaticReputationSource::new("feed", SourceReport::new(0.9))
                .with_report("203.0.113.66", SourceReport::new(0.0).with_threat("botnet")),
        ))
        .reputation_source(Arc::new(
            StaticReputationSource::new("spamlist", SourceReport::new(0.9))
                .with_report("203.0.113.66", SourceReport::new(0.0)),
        ))
        .reputation_source(Arc::new(
            StaticReputationSource::new("abuse", SourceReport::new(0.9))
                .with_report("203.0.113.66", SourceReport::new(0.0)),
        ))
        .build()
        .unwrap();

    let snapshot = gate.reputation("203.0.113.66").await;
    assert!(snapshot.threats.contains("botnet"));

    let decision = gate.evaluate(&browser_request("203.0.113.66", "/")).await;
    match decision {
        GateDecision::Challenge {
            http_status,
            reason,
            payload,
        } => {
            assert_eq!(http_status, 429);
            assert_eq!(reason, ChallengeReason::LowReputation);
            assert_eq!(payload.kind, ChallengeType::Image);
        }
        other => panic!("Expected challenge, got {:?}", other),
    }

    let clean = gate.evaluate(&browser_request("203.0.113.11", "/")).await;
    assert!(clean.is_allow());
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_scores_neutral() {
    let mut config = test_config();
    config.reputation.source_timeout_ms = 50;
    let gate = GateOrchestrator::builder(config)
        .clock(Arc::new(ManualClock::new(START_MS)))
        .event_sink(Arc::new(MemorySink::new()))
        .reputation_source(Arc::new(
            SimulatedFeed::abuse_feed().with_latency(Duration::from_secs(10)),
        ))
        .build()
        .unwrap();

    let snapshot = gate.reputation("203.0.113.12").await;
    let feed = snapshot
        .sources
        .iter()
        .find(|s| s.name == "abuse_feed")
        .unwrap();
    assert!(!feed.available);
    assert_eq!(feed.score, 0.5);
    assert!((snapshot.score - 0.75).abs() < 1e-9);
}

// ============================================================================
// Challenges
// ============================================================================

#[tokio::test]
async fn test_hard_image_challenge_round_trip() {
    let (gate, _, _) = create_gate(test_config());

    let payload = gate
        .challenge_manager()
        .generate(ChallengeType::Image, Difficulty::Hard, None)
        .unwrap();
    let images = payload.images.as_ref().unwrap();
    assert_eq!(images.len(), 9);

    // Tiles never name their category
    let tiles = serde_json::to_string(images).unwrap().replace(&payload.id, "");
    for category in IMAGE_CATEGORIES {
        assert!(!tiles.contains(category), "tile leaked category {}", category);
    }

    let target = payload
        .question
        .trim_start_matches("Select every image containing: ")
        .to_string();
    let answer: Vec<String> = (0..images.len())
        .filter(|&i| gate.image_asset(&payload.id, i) == Some(target.as_str()))
        .map(|i| i.to_string())
        .collect();
    assert!(!answer.is_empty());

    let result = gate.submit_challenge(&payload.id, &answer.join(","), None);
    assert!(result.valid, "Image answer rejected: {:?}", result);
}

#[tokio::test]
async fn test_math_answer_with_whitespace() {
    let (gate, _, _) = create_gate(test_config());
    let manager = gate.challenge_manager();

    let payload = loop {
        let payload = manager
            .generate(ChallengeType::Math, Difficulty::Easy, None)
            .unwrap();
        if parse_math(&payload.question) == 7 {
            break payload;
        }
    };

    let result = gate.submit_challenge(&payload.id, " 7 ", None);
    assert!(result.valid);

    // Single use
    let replay = gate.submit_challenge(&payload.id, "7", None);
    assert!(!replay.valid);
    assert_eq!(replay.error.as_deref(), Some("Invalid or expired challenge"));
}

#[tokio::test]
async fn test_expired_challenge_is_rejected() {
    let (gate, clock, _) = create_gate(test_config());
    let payload = gate
        .challenge_manager()
        .generate(ChallengeType::Math, Difficulty::Medium, None)
        .unwrap();
    let answer = parse_math(&payload.question).to_string();

    clock.advance(Duration::from_millis(300_001));
    let result = gate.submit_challenge(&payload.id, &answer, None);
    assert!(!result.valid);
    assert_eq!(result.error.as_deref(), Some("Invalid or expired challenge"));
    assert_eq!(result.attempts_remaining, None);
}

#[tokio::test]
async fn test_solving_protected_path_challenge_grants_pass() {
    let (gate, _, sink) = create_gate(test_config());
    let request = browser_request("192.0.2.20", "/login");

    let payload = match gate.evaluate(&request).await {
        GateDecision::Challenge {
            reason: ChallengeReason::ProtectedPath,
            payload,
            ..
        } => payload,
        other => panic!("Expected protected path challenge, got {:?}", other),
    };
    assert_eq!(payload.kind, ChallengeType::Math);

    let answer = parse_math(&payload.question).to_string();
    assert!(gate.submit_challenge(&payload.id, &answer, None).valid);
    assert_eq!(gate.evaluate(&request).await, GateDecision::Allow);

    assert_eq!(sink.count("challenge_issued"), 1);
    assert_eq!(sink.count("challenge_solved"), 1);
}

#[tokio::test]
async fn test_behavioral_pass_is_weak() {
    let (gate, _, _) = create_gate(test_config());
    let ip = "192.0.2.30";
    let crawler = GateRequest::new(ip, "GET", "/catalog").with_header("User-Agent", "Spider/1");

    let payload = match gate.evaluate(&crawler).await {
        GateDecision::Challenge {
            reason: ChallengeReason::SuspiciousBehavior,
            payload,
            ..
        } => payload,
        other => panic!("Expected behavior challenge, got {:?}", other),
    };
    assert_eq!(payload.kind, ChallengeType::Behavioral);

    let result = gate.submit_challenge(&payload.id, "", Some(&human_behavior()));
    assert!(result.valid);

    assert!(gate.evaluate(&crawler).await.is_allow());
    assert!(gate
        .evaluate(&GateRequest::new(ip, "GET", "/admin"))
        .await
        .is_challenge());
}

#[tokio::test]
async fn test_challenges_get_harder_for_repeat_ips() {
    let (gate, _, _) = create_gate(test_config());
    let request = browser_request("192.0.2.40", "/register");

    let mut difficulties = Vec::new();
    let mut kinds = Vec::new();
    for _ in 0..5 {
        match gate.evaluate(&request).await {
            GateDecision::Challenge { payload, .. } => {
                difficulties.push(payload.difficulty);
                kinds.push(payload.kind);
            }
            other => panic!("Expected challenge, got {:?}", other),
        }
    }

    assert_eq!(
        difficulties,
        vec![
            Difficulty::Medium,
            Difficulty::Medium,
            Difficulty::Hard,
            Difficulty::Hard,
            Difficulty::Hard
        ]
    );
    assert_eq!(kinds[3], ChallengeType::Math);
    assert_eq!(kinds[4], ChallengeType::Text);
}

// ============================================================================
// Concurrency
// ============================================================================

const CONCURRENT_REQUESTS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_trap_hits_block_once() {
    let mut config = test_config();
    config.permanent_block_threshold = 2;
    let (gate, _, sink) = create_gate(config);
    let gate = Arc::new(gate);
    let barrier = Arc::new(tokio::sync::Barrier::new(CONCURRENT_REQUESTS));
    let ip = "203.0.113.90";

    let tasks: Vec<_> = (0..CONCURRENT_REQUESTS)
        .map(|_| {
            let gate = gate.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                // A scripted client is critical on its first hit
                let request = GateRequest::new(ip, "GET", "/backup-files/")
                    .with_header("User-Agent", "curl/8.4.0");
                barrier.wait().await;
                gate.evaluate(&request).await
            })
        })
        .collect();

    for task in tasks {
        let decision = task.await.unwrap();
        assert!(
            matches!(decision, GateDecision::Blocked { permanent: false, .. }),
            "Expected temporary block, got {:?}",
            decision
        );
    }

    assert_eq!(gate.reputation_store().violation_count(ip), 1);
    assert_eq!(sink.count("ip_blocked"), 1);
    let critical = sink
        .alerts()
        .iter()
        .filter(|a| matches!(a, SecurityAlert::CriticalScraper { .. }))
        .count();
    assert_eq!(critical, 1);
    assert!(!sink
        .alerts()
        .iter()
        .any(|a| matches!(a, SecurityAlert::PermanentIpBlock { .. })));
    assert_eq!(gate.profile(ip).unwrap().trap_triggers, CONCURRENT_REQUESTS as u32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_accept_once() {
    let (gate, _, sink) = create_gate(test_config());
    let gate = Arc::new(gate);
    let payload = gate
        .challenge_manager()
        .generate(ChallengeType::Math, Difficulty::Easy, Some("203.0.113.91"))
        .unwrap();
    let answer = parse_math(&payload.question).to_string();
    let barrier = Arc::new(tokio::sync::Barrier::new(CONCURRENT_REQUESTS));

    let tasks: Vec<_> = (0..CONCURRENT_REQUESTS)
        .map(|_| {
            let gate = gate.clone();
            let barrier = barrier.clone();
            let id = payload.id.clone();
            let answer = answer.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                gate.submit_challenge(&id, &answer, None)
            })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        let result = task.await.unwrap();
        if result.valid {
            accepted += 1;
        } else {
            assert_eq!(result.error.as_deref(), Some("Invalid or expired challenge"));
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(sink.count("challenge_solved"), 1);
    assert!(gate.verified_pass("203.0.113.91").is_some());
}

// ============================================================================
// Configuration and Maintenance
// ============================================================================

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "challenge-types": ["math", "text"],
            "captcha-difficulty": "easy",
            "detection-sensitivity": "low",
            "honeypot-paths": ["/wp-admin-old/"],
            "contact": "abuse@example.net"
        }}"#
    )
    .unwrap();

    let config = GateConfig::from_file(file.path()).unwrap();
    assert_eq!(
        config.challenges.enabled_types,
        vec![ChallengeType::Math, ChallengeType::Text]
    );
    assert_eq!(config.challenges.difficulty, Difficulty::Easy);
    assert_eq!(config.traps.static_paths, vec!["/wp-admin-old/".to_string()]);
    assert!(GateOrchestrator::new(config).is_ok());
}

#[test]
fn test_unknown_challenge_type_is_rejected() {
    let result = GateConfig::from_json_str(r#"{"challenge-types": ["math", "puzzle"]}"#);
    assert!(matches!(result, Err(GateError::InvalidConfiguration(_))));
}

#[test]
fn test_trap_colliding_with_route_is_rejected() {
    let result = GateConfig::from_json_str(
        r#"{"honeypot-paths": ["/account/"], "reserved-routes": ["/account"]}"#,
    );
    assert!(matches!(result, Err(GateError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_sweep_clears_expired_state() {
    let (gate, clock, _) = create_gate(test_config());
    gate.evaluate(&browser_request("192.0.2.50", "/admin")).await;
    gate.csp().generate();
    assert_eq!(gate.challenge_manager().len(), 1);

    clock.advance(Duration::from_millis(3_600_001));
    let report = gate.sweep();
    assert_eq!(report.challenges, 1);
    assert_eq!(report.nonces, 1);
    assert!(report.traps.retired > 0);
    assert!(gate.challenge_manager().is_empty());

    // Static traps survive rotation
    assert!(gate
        .evaluate(&browser_request("192.0.2.51", "/admin-secret/"))
        .await
        .is_trap_response());
}

#[tokio::test]
async fn test_unknown_ip_fallback() {
    let (gate, _, _) = create_gate(test_config());
    let request = browser_request("", "/hidden-admin/");
    assert!(gate.evaluate(&request).await.is_trap_response());
    assert!(gate.profile("unknown").is_some());
}

#[tokio::test]
async fn test_stats_track_decisions() {
    let (gate, _, _) = create_gate(test_config());
    gate.evaluate(&browser_request("192.0.2.60", "/")).await;
    gate.evaluate(&browser_request("192.0.2.60", "/admin")).await;
    gate.evaluate(&browser_request("192.0.2.61", "/secret-api/")).await;

    let stats = gate.stats();
    assert_eq!(stats.metrics.requests_total, 3);
    assert_eq!(stats.challenges.active, 1);
    assert_eq!(stats.profiles.profiles, 1);
    assert!(gate.metrics().prometheus().contains("gate_requests_total 3"));
}
