//! Behavioral Challenge Heuristics
//!
//! Checks over client-collected interaction samples. These are friction for
//! naive automation, not proof of a human: a scripted client can synthesize
//! samples that pass.

use serde::{Deserialize, Serialize};

/// Mouse path sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MousePoint {
    pub x: f64,
    pub y: f64,
}

/// Keystroke sample (timestamp in ms)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keystroke {
    pub timestamp: f64,
}

/// Click sample (reaction time in ms)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickSample {
    pub reaction_time: f64,
}

/// Interaction samples submitted with a behavioral challenge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorData {
    #[serde(default)]
    pub mouse: Vec<MousePoint>,
    #[serde(default)]
    pub keystrokes: Vec<Keystroke>,
    #[serde(default)]
    pub clicks: Vec<ClickSample>,
}

/// Behavioral task variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehavioralTask {
    /// Trace a circle with the pointer
    MousePattern,
    /// Type a sentence naturally
    TypingRhythm,
    /// Click as soon as a target appears
    ClickTiming,
}

impl BehavioralTask {
    pub const ALL: [BehavioralTask; 3] = [
        BehavioralTask::MousePattern,
        BehavioralTask::TypingRhythm,
        BehavioralTask::ClickTiming,
    ];

    /// Prompt shown to the user
    pub fn instructions(&self) -> &'static str {
        match self {
            BehavioralTask::MousePattern => "Draw a circle with your mouse inside the box",
            BehavioralTask::TypingRhythm => "Type the sentence shown below at your normal pace",
            BehavioralTask::ClickTiming => "Click the button each time it turns green",
        }
    }

    /// Run the heuristic matching this task
    pub fn verify(&self, data: &BehaviorData) -> bool {
        match self {
            BehavioralTask::MousePattern => is_circular_motion(&data.mouse),
            BehavioralTask::TypingRhythm => is_natural_typing(&data.keystrokes),
            BehavioralTask::ClickTiming => is_human_reaction(&data.clicks),
        }
    }
}

const MIN_MOUSE_POINTS: usize = 10;
const RADIUS_BAND: (f64, f64) = (50.0, 150.0);
const MIN_KEYSTROKES: usize = 5;
const VARIANCE_BAND: (f64, f64) = (100.0, 10_000.0);
const MEAN_INTERVAL_BAND: (f64, f64) = (50.0, 500.0);
const MIN_CLICKS: usize = 3;
const REACTION_BAND: (f64, f64) = (200.0, 800.0);
const REQUIRED_FRACTION: f64 = 0.7;

/// More than 70% of points lie in a ring around their centroid
pub fn is_circular_motion(points: &[MousePoint]) -> bool {
    if points.len() < MIN_MOUSE_POINTS {
        return false;
    }

    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;

    let in_band = points
        .iter()
        .filter(|p| {
            let distance = ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt();
            distance > RADIUS_BAND.0 && distance < RADIUS_BAND.1
        })
        .count();

    in_band as f64 / n > REQUIRED_FRACTION
}

/// Inter-key intervals vary like a person typing
pub fn is_natural_typing(keystrokes: &[Keystroke]) -> bool {
    if keystrokes.len() < MIN_KEYSTROKES {
        return false;
    }

    let intervals: Vec<f64> = keystrokes
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .collect();
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;

    variance >= VARIANCE_BAND.0
        && variance < VARIANCE_BAND.1
        && mean >= MEAN_INTERVAL_BAND.0
        && mean <= MEAN_INTERVAL_BAND.1
}

/// At least 70% of reaction times fall in the human range
pub fn is_human_reaction(clicks: &[ClickSample]) -> bool {
    if clicks.len() < MIN_CLICKS {
        return false;
    }

    let human = clicks
        .iter()
        .filter(|c| c.reaction_time >= REACTION_BAND.0 && c.reaction_time <= REACTION_BAND.1)
        .count();

    human as f64 / clicks.len() as f64 >= REQUIRED_FRACTION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(radius: f64, points: usize) -> Vec<MousePoint> {
        (0..points)
            .map(|i| {
                let angle = i as f64 / points as f64 * std::f64::consts::TAU;
                MousePoint {
                    x: 200.0 + radius * angle.cos(),
                    y: 200.0 + radius * angle.sin(),
                }
            })
            .collect()
    }

    fn keystrokes(intervals: &[f64]) -> Vec<Keystroke> {
        let mut t = 0.0;
        let mut out = vec![Keystroke { timestamp: t }];
        for interval in intervals {
            t += interval;
            out.push(Keystroke { timestamp: t });
        }
        out
    }

    #[test]
    fn test_circle_passes() {
        assert!(is_circular_motion(&circle(100.0, 24)));
    }

    #[test]
    fn test_tiny_circle_and_line_fail() {
        assert!(!is_circular_motion(&circle(10.0, 24)));

        let line: Vec<_> = (0..20)
            .map(|i| MousePoint {
                x: i as f64 * 2.0,
                y: 0.0,
            })
            .collect();
        assert!(!is_circular_motion(&line));
    }

    #[test]
    fn test_too_few_points_fail() {
        assert!(!is_circular_motion(&circle(100.0, 9)));
    }

    #[test]
    fn test_natural_typing() {
        assert!(is_natural_typing(&keystrokes(&[120.0, 180.0, 95.0, 210.0, 150.0])));
    }

    #[test]
    fn test_robotic_typing_fails() {
        // Perfectly regular intervals have zero variance
        assert!(!is_natural_typing(&keystrokes(&[100.0, 100.0, 100.0, 100.0])));
        // Far too fast
        assert!(!is_natural_typing(&keystrokes(&[5.0, 30.0, 2.0, 40.0])));
        assert!(!is_natural_typing(&keystrokes(&[120.0, 180.0])));
    }

    #[test]
    fn test_reaction_times() {
        let human: Vec<_> = [250.0, 410.0, 320.0, 900.0]
            .iter()
            .map(|&t| ClickSample { reaction_time: t })
            .collect();
        assert!(is_human_reaction(&human));

        let bot: Vec<_> = [5.0, 7.0, 6.0, 300.0]
            .iter()
            .map(|&t| ClickSample { reaction_time: t })
            .collect();
        assert!(!is_human_reaction(&bot));
    }

    #[test]
    fn test_task_dispatch() {
        let data = BehaviorData {
            mouse: circle(80.0, 16),
            ..Default::default()
        };
        assert!(BehavioralTask::MousePattern.verify(&data));
        assert!(!BehavioralTask::TypingRhythm.verify(&data));
        assert!(!BehavioralTask::ClickTiming.verify(&data));
    }
}
