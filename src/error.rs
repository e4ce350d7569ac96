//! Error types for the abuse gate

use crate::config::ChallengeType;

/// Errors raised while building or running the gate
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("challenge type '{0}' is not enabled")]
    ChallengeTypeDisabled(ChallengeType),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Outcome of a failed challenge validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("challenge not found")]
    NotFound,

    #[error("challenge expired")]
    Expired,

    #[error("too many attempts")]
    TooManyAttempts,

    #[error("incorrect answer ({attempts_remaining} attempts remaining)")]
    Incorrect { attempts_remaining: u32 },
}

impl ChallengeError {
    /// Message safe to show to the client.
    ///
    /// Unknown and expired challenges share a message so the response does not
    /// reveal whether an ID was ever valid.
    pub fn public_message(&self) -> &'static str {
        match self {
            ChallengeError::NotFound | ChallengeError::Expired => "Invalid or expired challenge",
            ChallengeError::TooManyAttempts => "Too many attempts, request a new challenge",
            ChallengeError::Incorrect { .. } => "Incorrect answer",
        }
    }

    /// Remaining attempts, when the challenge is still usable
    pub fn attempts_remaining(&self) -> Option<u32> {
        match self {
            ChallengeError::Incorrect { attempts_remaining } => Some(*attempts_remaining),
            _ => None,
        }
    }
}

/// Failure of a single reputation source lookup
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReputationSourceError {
    #[error("reputation source '{name}' timed out")]
    Timeout { name: String },

    #[error("reputation source '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },
}
