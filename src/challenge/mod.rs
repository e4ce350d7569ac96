//! Challenge Manager
//!
//! Issues and validates time-limited human-verification challenges:
//! - Math: arithmetic question, operand range and operators by difficulty
//! - Image: pick the tiles showing a target category
//! - Text: transcribe a rendered alphanumeric string
//! - Behavioral: mouse, typing or click-timing samples checked heuristically
//!
//! Challenges are single use. The stored answer never leaves this module.

pub mod behavior;
mod generate;
mod render;

pub use behavior::{BehaviorData, BehavioralTask, ClickSample, Keystroke, MousePoint};
pub use generate::{ChallengeImage, IMAGE_CATEGORIES};
pub use render::TextImage;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::{ChallengeConfig, ChallengeType, Difficulty};
use crate::error::{ChallengeError, GateError};
use generate::Answer;

/// Client-facing challenge, without the answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengePayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub difficulty: Difficulty,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ChallengeImage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<TextImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<BehavioralTask>,
    pub expires_at: u64,
}

/// Stored challenge
#[derive(Debug, Clone)]
struct Challenge {
    payload: ChallengePayload,
    answer: Answer,
    created_at: u64,
    attempts: u32,
    /// IP the challenge was issued to
    subject: Option<String>,
    /// Category behind each image tile
    tiles: Vec<&'static str>,
}

impl Challenge {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.payload.expires_at
    }
}

/// Challenge manager statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChallengeStats {
    pub active: usize,
    pub by_type: HashMap<String, usize>,
}

/// Challenge manager
pub struct ChallengeManager {
    config: ChallengeConfig,
    challenges: RwLock<HashMap<String, Challenge>>,
    clock: SharedClock,
}

impl ChallengeManager {
    /// Create a new challenge manager
    pub fn new(config: ChallengeConfig, clock: SharedClock) -> Self {
        Self {
            config,
            challenges: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    /// Mint a challenge. `subject` is the IP it is issued to, if known.
    pub fn generate(
        &self,
        kind: ChallengeType,
        difficulty: Difficulty,
        subject: Option<&str>,
    ) -> Result<ChallengePayload, GateError> {
        if !self.config.enabled_types.contains(&kind) {
            return Err(GateError::ChallengeTypeDisabled(kind));
        }

        let now = self.clock.now_ms();
        let id = new_challenge_id();
        let mut rng = rand::thread_rng();

        let mut payload = ChallengePayload {
            id: id.clone(),
            kind,
            difficulty,
            question: String::new(),
            images: None,
            image_data: None,
            task: None,
            expires_at: now.saturating_add(self.config.timeout_ms),
        };
        let mut tiles = Vec::new();

        let answer = match kind {
            ChallengeType::Math => {
                let (question, answer) = generate::math(difficulty, &mut rng);
                payload.question = question;
                Answer::Exact(answer.to_string())
            }
            ChallengeType::Image => {
                let (target, layout, answer) = generate::image(difficulty, &mut rng);
                payload.question = format!("Select every image containing: {}", target);
                payload.images = Some(generate::image_tiles(&id, layout.len()));
                tiles = layout;
                Answer::Indices(answer)
            }
            ChallengeType::Text => {
                let (value, image) = generate::text(difficulty, &mut rng);
                payload.question = "Enter the characters shown in the image".to_string();
                payload.image_data = Some(image);
                Answer::Exact(value)
            }
            ChallengeType::Behavioral => {
                let task = generate::behavioral(&mut rng);
                payload.question = task.instructions().to_string();
                payload.task = Some(task);
                Answer::Behavioral(task)
            }
        };

        debug!(
            challenge_id = %id,
            challenge_type = %kind,
            difficulty = %difficulty,
            "Challenge generated"
        );

        self.challenges.write().insert(
            id,
            Challenge {
                payload: payload.clone(),
                answer,
                created_at: now,
                attempts: 0,
                subject: subject.map(str::to_string),
                tiles,
            },
        );

        Ok(payload)
    }

    /// Validate a submission.
    ///
    /// Returns the challenge type on success. The challenge is deleted on
    /// success, on expiry and once the attempt cap is exceeded.
    pub fn validate(
        &self,
        id: &str,
        answer: &str,
        behavior: Option<&BehaviorData>,
    ) -> Result<ChallengeType, ChallengeError> {
        let now = self.clock.now_ms();
        let mut challenges = self.challenges.write();

        let (expired, attempts, accepted, kind) = {
            let challenge = challenges.get_mut(id).ok_or(ChallengeError::NotFound)?;
            if challenge.is_expired(now) {
                (true, challenge.attempts, false, challenge.payload.kind)
            } else {
                challenge.attempts += 1;
                let accepted = challenge.attempts <= self.config.max_attempts
                    && challenge.answer.accepts(answer, behavior);
                (false, challenge.attempts, accepted, challenge.payload.kind)
            }
        };

        if expired {
            challenges.remove(id);
            return Err(ChallengeError::Expired);
        }
        if attempts > self.config.max_attempts {
            challenges.remove(id);
            return Err(ChallengeError::TooManyAttempts);
        }
        if accepted {
            challenges.remove(id);
            debug!(challenge_id = %id, attempts = attempts, "Challenge solved");
            return Ok(kind);
        }

        Err(ChallengeError::Incorrect {
            attempts_remaining: self.config.max_attempts - attempts,
        })
    }

    /// IP a pending challenge was issued to
    pub fn subject(&self, id: &str) -> Option<String> {
        self.challenges
            .read()
            .get(id)
            .and_then(|c| c.subject.clone())
    }

    /// Category behind an image tile, for serving the picture
    pub fn image_asset(&self, id: &str, index: usize) -> Option<&'static str> {
        let now = self.clock.now_ms();
        self.challenges
            .read()
            .get(id)
            .filter(|c| !c.is_expired(now))
            .and_then(|c| c.tiles.get(index).copied())
    }

    /// Age of a pending challenge in ms
    pub fn age_ms(&self, id: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.challenges
            .read()
            .get(id)
            .map(|c| now.saturating_sub(c.created_at))
    }

    /// Drop expired challenges; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut challenges = self.challenges.write();
        let before = challenges.len();
        challenges.retain(|_, c| !c.is_expired(now));
        let removed = before - challenges.len();
        if removed > 0 {
            debug!(removed = removed, "Expired challenges swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.challenges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ChallengeStats {
        let challenges = self.challenges.read();
        let mut by_type = HashMap::new();
        for challenge in challenges.values() {
            *by_type
                .entry(challenge.payload.kind.to_string())
                .or_insert(0) += 1;
        }
        ChallengeStats {
            active: challenges.len(),
            by_type,
        }
    }

    #[cfg(test)]
    fn answer_of(&self, id: &str) -> Option<Answer> {
        self.challenges.read().get(id).map(|c| c.answer.clone())
    }

    /// Answer as a client would type it (math, text and image only)
    #[cfg(test)]
    pub(crate) fn expected_answer(&self, id: &str) -> Option<String> {
        match self.answer_of(id)? {
            Answer::Exact(answer) => Some(answer),
            Answer::Indices(indices) => Some(
                indices
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Answer::Behavioral(_) => None,
        }
    }
}

/// Opaque, unguessable challenge identifier
fn new_challenge_id() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ch_{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_manager() -> (ChallengeManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = ChallengeManager::new(ChallengeConfig::default(), clock.clone());
        (manager, clock)
    }

    fn exact_answer(manager: &ChallengeManager, id: &str) -> String {
        match manager.answer_of(id) {
            Some(Answer::Exact(answer)) => answer,
            other => panic!("expected exact answer, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_excludes_answer() {
        let (manager, _) = create_manager();
        let payload = manager
            .generate(ChallengeType::Text, Difficulty::Medium, None)
            .unwrap();
        let answer = exact_answer(&manager, &payload.id);

        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains(&format!("\"{}\"", answer)));
        assert!(!json.contains("answer"));
        assert!(json.contains("\"type\":\"text\""));
    }

    #[test]
    fn test_ids_are_unique() {
        let (manager, _) = create_manager();
        let a = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        let b = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_single_use() {
        let (manager, _) = create_manager();
        let payload = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        let answer = exact_answer(&manager, &payload.id);

        assert_eq!(manager.validate(&payload.id, &answer, None), Ok(ChallengeType::Math));
        assert_eq!(
            manager.validate(&payload.id, &answer, None),
            Err(ChallengeError::NotFound)
        );
    }

    #[test]
    fn test_trimmed_answer_accepted() {
        let (manager, _) = create_manager();
        let payload = manager.generate(ChallengeType::Math, Difficulty::Hard, None).unwrap();
        let answer = exact_answer(&manager, &payload.id);
        assert!(manager
            .validate(&payload.id, &format!("  {}\n", answer), None)
            .is_ok());
    }

    #[test]
    fn test_attempt_cap() {
        let (manager, _) = create_manager();
        let payload = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();

        for remaining in [2, 1, 0] {
            assert_eq!(
                manager.validate(&payload.id, "-1", None),
                Err(ChallengeError::Incorrect {
                    attempts_remaining: remaining
                })
            );
        }
        assert_eq!(
            manager.validate(&payload.id, "-1", None),
            Err(ChallengeError::TooManyAttempts)
        );
        assert_eq!(
            manager.validate(&payload.id, "-1", None),
            Err(ChallengeError::NotFound)
        );
    }

    #[test]
    fn test_correct_answer_after_cap_is_rejected() {
        let (manager, _) = create_manager();
        let payload = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        let answer = exact_answer(&manager, &payload.id);
        for _ in 0..3 {
            let _ = manager.validate(&payload.id, "-1", None);
        }
        assert_eq!(
            manager.validate(&payload.id, &answer, None),
            Err(ChallengeError::TooManyAttempts)
        );
    }

    #[test]
    fn test_expired_regardless_of_answer() {
        let (manager, clock) = create_manager();
        let payload = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        let answer = exact_answer(&manager, &payload.id);

        clock.advance(Duration::from_millis(300_001));
        assert_eq!(
            manager.validate(&payload.id, &answer, None),
            Err(ChallengeError::Expired)
        );
        assert_eq!(
            manager.validate(&payload.id, &answer, None),
            Err(ChallengeError::NotFound)
        );
    }

    #[test]
    fn test_valid_at_expiry_instant() {
        let (manager, clock) = create_manager();
        let payload = manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        let answer = exact_answer(&manager, &payload.id);

        clock.advance(Duration::from_millis(300_000));
        assert!(manager.validate(&payload.id, &answer, None).is_ok());
    }

    #[test]
    fn test_hard_image_challenge() {
        let (manager, _) = create_manager();
        let payload = manager
            .generate(ChallengeType::Image, Difficulty::Hard, None)
            .unwrap();
        let images = payload.images.clone().unwrap();
        assert_eq!(images.len(), 9);

        let target = payload
            .question
            .rsplit(": ")
            .next()
            .unwrap()
            .to_string();
        let Some(Answer::Indices(indices)) = manager.answer_of(&payload.id) else {
            panic!("image challenge must store indices");
        };
        assert!(!indices.is_empty());
        for index in &indices {
            assert_eq!(manager.image_asset(&payload.id, *index), Some(target.as_str()));
        }
        for image in &images {
            if !indices.contains(&image.index) {
                assert_ne!(manager.image_asset(&payload.id, image.index), Some(target.as_str()));
            }
            // Tile URLs never name the category
            let src = image.src.replace(&payload.id, "");
            assert!(IMAGE_CATEGORIES.iter().all(|c| !src.contains(c)));
        }
    }

    #[test]
    fn test_behavioral_requires_samples() {
        let (manager, _) = create_manager();
        let payload = manager
            .generate(ChallengeType::Behavioral, Difficulty::Medium, None)
            .unwrap();
        assert!(payload.task.is_some());
        assert!(matches!(
            manager.validate(&payload.id, "", None),
            Err(ChallengeError::Incorrect { .. })
        ));
    }

    #[test]
    fn test_behavioral_click_timing() {
        let (manager, _) = create_manager();
        let samples = BehaviorData {
            clicks: [300.0, 420.0, 510.0]
                .iter()
                .map(|&t| ClickSample { reaction_time: t })
                .collect(),
            ..Default::default()
        };

        // Retry until the random task is the click task
        loop {
            let payload = manager
                .generate(ChallengeType::Behavioral, Difficulty::Easy, None)
                .unwrap();
            if payload.task == Some(BehavioralTask::ClickTiming) {
                assert!(manager.validate(&payload.id, "", Some(&samples)).is_ok());
                break;
            }
        }
    }

    #[test]
    fn test_disabled_type() {
        let clock = Arc::new(ManualClock::new(0));
        let config = ChallengeConfig {
            enabled_types: vec![ChallengeType::Math],
            ..Default::default()
        };
        let manager = ChallengeManager::new(config, clock);
        assert!(matches!(
            manager.generate(ChallengeType::Image, Difficulty::Easy, None),
            Err(GateError::ChallengeTypeDisabled(ChallengeType::Image))
        ));
    }

    #[test]
    fn test_subject_and_sweep() {
        let (manager, clock) = create_manager();
        let payload = manager
            .generate(ChallengeType::Math, Difficulty::Easy, Some("1.2.3.4"))
            .unwrap();
        assert_eq!(manager.subject(&payload.id).as_deref(), Some("1.2.3.4"));
        assert_eq!(manager.age_ms(&payload.id), Some(0));

        clock.advance(Duration::from_secs(600));
        manager.generate(ChallengeType::Math, Difficulty::Easy, None).unwrap();
        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.stats().by_type.get("math"), Some(&1));
    }
}
