//! Challenge Generators
//!
//! Each generator returns the client-facing prompt and the stored answer.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use super::behavior::BehavioralTask;
use super::render::{render_text, TextImage};
use crate::config::Difficulty;

/// Fixed pool for image-selection challenges
pub const IMAGE_CATEGORIES: [&str; 12] = [
    "cat", "dog", "car", "house", "tree", "flower", "bird", "fish", "boat", "bicycle", "clock",
    "chair",
];

const TEXT_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Image tile in a selection challenge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeImage {
    pub index: usize,
    /// Opaque asset URL; the category is resolved server-side
    pub src: String,
    pub alt: String,
}

/// Stored answer, never serialized
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Answer {
    /// Math and text: trimmed, case-insensitive match
    Exact(String),
    /// Image selection: target positions, sorted
    Indices(Vec<usize>),
    Behavioral(BehavioralTask),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl MathOp {
    fn symbol(&self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "×",
            MathOp::Div => "÷",
        }
    }
}

/// Arithmetic question and its integer answer
pub(crate) fn math<R: Rng>(difficulty: Difficulty, rng: &mut R) -> (String, i64) {
    let (low, high, ops): (i64, i64, &[MathOp]) = match difficulty {
        Difficulty::Easy => (1, 10, &[MathOp::Add, MathOp::Sub]),
        Difficulty::Medium => (1, 20, &[MathOp::Add, MathOp::Sub, MathOp::Mul]),
        Difficulty::Hard => (
            10,
            59,
            &[MathOp::Add, MathOp::Sub, MathOp::Mul, MathOp::Div],
        ),
    };

    let a = rng.gen_range(low..=high);
    let b = rng.gen_range(low..=high);
    let op = ops.choose(rng).copied().unwrap_or(MathOp::Add);

    let (left, right, answer) = match op {
        MathOp::Add => (a, b, a + b),
        // Larger operand first keeps the result non-negative
        MathOp::Sub => (a.max(b), a.min(b), a.max(b) - a.min(b)),
        MathOp::Mul => (a, b, a * b),
        // Dividend built from a product so the quotient is exact
        MathOp::Div => (a * b, b, a),
    };

    (
        format!("What is {} {} {}?", left, op.symbol(), right),
        answer,
    )
}

/// Image-selection layout: shuffled categories and the target positions
pub(crate) fn image<R: Rng>(
    difficulty: Difficulty,
    rng: &mut R,
) -> (&'static str, Vec<&'static str>, Vec<usize>) {
    let decoys = match difficulty {
        Difficulty::Easy => 3,
        Difficulty::Medium => 5,
        Difficulty::Hard => 8,
    };

    let target = IMAGE_CATEGORIES.choose(rng).copied().unwrap_or("cat");
    let mut tiles: Vec<&'static str> = IMAGE_CATEGORIES
        .iter()
        .copied()
        .filter(|c| *c != target)
        .collect();
    tiles.shuffle(rng);
    tiles.truncate(decoys);
    tiles.push(target);
    tiles.shuffle(rng);

    let answer = tiles
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == target)
        .map(|(i, _)| i)
        .collect();

    (target, tiles, answer)
}

/// Tiles as sent to the client
pub(crate) fn image_tiles(challenge_id: &str, count: usize) -> Vec<ChallengeImage> {
    (0..count)
        .map(|index| ChallengeImage {
            index,
            src: format!("/captcha/images/{}/{}", challenge_id, index),
            alt: format!("Image {}", index + 1),
        })
        .collect()
}

/// Random text and its rendering
pub(crate) fn text<R: Rng>(difficulty: Difficulty, rng: &mut R) -> (String, TextImage) {
    let length = match difficulty {
        Difficulty::Easy => 4,
        Difficulty::Medium => 5,
        Difficulty::Hard => 7,
    };

    let value: String = (0..length)
        .map(|_| TEXT_CHARSET[rng.gen_range(0..TEXT_CHARSET.len())] as char)
        .collect();
    let image = render_text(&value, difficulty, rng);
    (value, image)
}

pub(crate) fn behavioral<R: Rng>(rng: &mut R) -> BehavioralTask {
    BehavioralTask::ALL
        .choose(rng)
        .copied()
        .unwrap_or(BehavioralTask::MousePattern)
}

impl Answer {
    /// Compare a submission against the stored answer
    pub(crate) fn accepts(&self, submitted: &str, behavior: Option<&super::BehaviorData>) -> bool {
        match self {
            Answer::Exact(expected) => submitted.trim().eq_ignore_ascii_case(expected),
            Answer::Indices(expected) => {
                let parsed: Result<Vec<usize>, _> = submitted
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::parse::<usize>)
                    .collect();
                match parsed {
                    // Repeated positions are a wrong answer, not a shorthand
                    Ok(mut indices) => {
                        indices.sort_unstable();
                        &indices == expected
                    }
                    Err(_) => false,
                }
            }
            Answer::Behavioral(task) => behavior.map(|data| task.verify(data)).unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn evaluate(question: &str) -> (i64, &str, i64, f64) {
        let parts: Vec<&str> = question
            .trim_start_matches("What is ")
            .trim_end_matches('?')
            .split_whitespace()
            .collect();
        assert_eq!(parts.len(), 3, "unexpected question format: {}", question);
        let left: i64 = parts[0].parse().unwrap();
        let right: i64 = parts[2].parse().unwrap();
        let exact = match parts[1] {
            "+" => (left + right) as f64,
            "-" => (left - right) as f64,
            "×" => (left * right) as f64,
            "÷" => left as f64 / right as f64,
            other => panic!("unknown operator {}", other),
        };
        (left, parts[1], right, exact)
    }

    #[test]
    fn test_math_answers_are_correct_for_all_difficulties() {
        let mut rng = StdRng::seed_from_u64(42);
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            for _ in 0..1000 {
                let (question, answer) = math(difficulty, &mut rng);
                let (_, op, _, exact) = evaluate(&question);
                assert_eq!(exact.fract(), 0.0, "non-integer result for {}", question);
                assert_eq!(exact as i64, answer, "wrong answer for {}", question);
                assert!(answer >= 0, "negative answer for {}", question);

                match difficulty {
                    Difficulty::Easy => assert!(op == "+" || op == "-"),
                    Difficulty::Medium => assert!(op != "÷"),
                    Difficulty::Hard => {}
                }
            }
        }
    }

    #[test]
    fn test_math_operand_ranges() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..500 {
            let (question, _) = math(Difficulty::Easy, &mut rng);
            let (left, _, right, _) = evaluate(&question);
            assert!((1..=10).contains(&left) && (1..=10).contains(&right));
        }
    }

    #[test]
    fn test_image_layout_by_difficulty() {
        let mut rng = StdRng::seed_from_u64(5);
        for (difficulty, expected) in [
            (Difficulty::Easy, 4),
            (Difficulty::Medium, 6),
            (Difficulty::Hard, 9),
        ] {
            let (target, tiles, answer) = image(difficulty, &mut rng);
            assert_eq!(tiles.len(), expected);
            assert_eq!(answer.len(), 1);
            assert!(answer.iter().all(|&i| tiles[i] == target));
            assert_eq!(tiles.iter().filter(|c| **c == target).count(), 1);
        }
    }

    #[test]
    fn test_text_length_and_charset() {
        let mut rng = StdRng::seed_from_u64(11);
        for (difficulty, length) in [
            (Difficulty::Easy, 4),
            (Difficulty::Medium, 5),
            (Difficulty::Hard, 7),
        ] {
            let (value, image) = text(difficulty, &mut rng);
            assert_eq!(value.len(), length);
            assert!(value.bytes().all(|b| TEXT_CHARSET.contains(&b)));
            assert!(!image.svg.contains(&value));
        }
    }

    #[test]
    fn test_answer_matching() {
        let exact = Answer::Exact("7".to_string());
        assert!(exact.accepts(" 7 ", None));
        assert!(!exact.accepts("8", None));

        let text = Answer::Exact("K7QX".to_string());
        assert!(text.accepts("k7qx", None));

        let indices = Answer::Indices(vec![2, 5]);
        assert!(indices.accepts("5, 2", None));
        assert!(indices.accepts("2,5", None));
        assert!(!indices.accepts("2", None));
        assert!(!indices.accepts("two", None));
        assert!(!indices.accepts("5,2,2", None));
        assert!(!indices.accepts("2,2,5,5", None));

        let behavioral = Answer::Behavioral(BehavioralTask::ClickTiming);
        assert!(!behavioral.accepts("", None));
    }
}
