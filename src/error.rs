//! Error types for the race core
//!
//! Runtime errors (bad transitions, unknown participants) are recoverable and
//! get logged and dropped by the session. Curve and settings errors are fatal
//! and stop a session from being built at all.

use thiserror::Error;

use crate::sim::{MatchPhase, ParticipantId};

#[derive(Error, Debug)]
pub enum RaceError {
    #[error("invalid transition {from:?} -> {to:?} (current phase is {current:?})")]
    InvalidTransition {
        from: MatchPhase,
        to: MatchPhase,
        current: MatchPhase,
    },

    #[error("unknown participant {0}")]
    MissingParticipant(ParticipantId),

    #[error("path needs at least 2 control points, got {points}")]
    DegenerateCurve { points: usize },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RaceError {
    /// Whether the session can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            RaceError::InvalidTransition { .. } => true,
            RaceError::MissingParticipant(_) => true,
            RaceError::DegenerateCurve { .. } => false,
            RaceError::Config(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = RaceError::InvalidTransition {
            from: MatchPhase::PlayingMatch,
            to: MatchPhase::EndingMatch,
            current: MatchPhase::ReadyForMatch,
        };
        assert!(err.is_recoverable());
        assert!(RaceError::MissingParticipant(ParticipantId(7)).is_recoverable());
        assert!(!RaceError::DegenerateCurve { points: 1 }.is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = RaceError::DegenerateCurve { points: 0 };
        assert_eq!(err.to_string(), "path needs at least 2 control points, got 0");

        let err = RaceError::MissingParticipant(ParticipantId(3));
        assert_eq!(err.to_string(), "unknown participant #3");
    }
}
