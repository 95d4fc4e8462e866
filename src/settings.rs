//! Match and course settings
//!
//! Loaded from JSON by the host; every field falls back to the defaults in
//! [`crate::consts`] when missing.

use std::path::Path;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::ConfigError;

/// Timing and tracking options for the match lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    // === Lifecycle delays ===
    /// Countdown length in StartingMatch
    pub start_delay_ms: u64,
    /// Countdown length in EndingMatch
    pub end_delay_ms: u64,
    /// Results screen length in CompletedMatch
    pub ready_delay_ms: u64,
    /// Granularity of countdown broadcasts
    pub countdown_tick_ms: u64,
    /// Queued players needed before the start countdown runs
    pub min_players: usize,

    // === Tracking ===
    /// Interval between progress samples
    pub sample_interval_ms: u64,
    /// Squared distance a racer must move before being re-projected
    pub min_move_distance_sq: f32,
    /// Golden-section search tolerance on t
    pub search_tolerance: f32,
    /// Number of finishers that get an ordinal label in the roll-call
    pub roll_call_cap: usize,

    // === Event bus ===
    /// Per-subscriber queue limit before the oldest events are dropped
    pub max_pending_events: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            start_delay_ms: MATCH_START_DELAY_MS,
            end_delay_ms: MATCH_END_DELAY_MS,
            ready_delay_ms: NEW_MATCH_READY_DELAY_MS,
            countdown_tick_ms: COUNTDOWN_TICK_MS,
            min_players: MIN_PLAYERS,

            sample_interval_ms: SAMPLE_INTERVAL_MS,
            min_move_distance_sq: MIN_MOVE_DISTANCE_SQ,
            search_tolerance: SEARCH_TOLERANCE,
            roll_call_cap: ROLL_CALL_CAP,

            max_pending_events: MAX_PENDING_EVENTS,
        }
    }
}

impl MatchSettings {
    /// Parse settings from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file on disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json_str(&json)?;
        log::info!("Loaded match settings from {}", path.as_ref().display());
        Ok(settings)
    }

    /// Reject values that would stall or break the scheduler
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countdown_tick_ms == 0 {
            return Err(invalid("countdown_tick_ms", "must be greater than zero"));
        }
        if self.sample_interval_ms == 0 {
            return Err(invalid("sample_interval_ms", "must be greater than zero"));
        }
        if self.min_players == 0 {
            return Err(invalid("min_players", "at least one player is required"));
        }
        let tolerance = self.search_tolerance;
        if tolerance.is_nan() || tolerance <= 0.0 || tolerance >= 0.5 {
            return Err(invalid(
                "search_tolerance",
                format!("{tolerance} is outside (0, 0.5)"),
            ));
        }
        if self.min_move_distance_sq.is_nan() || self.min_move_distance_sq < 0.0 {
            return Err(invalid("min_move_distance_sq", "must be non-negative"));
        }
        if self.max_pending_events == 0 {
            return Err(invalid("max_pending_events", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn end_delay(&self) -> Duration {
        Duration::from_millis(self.end_delay_ms)
    }

    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// The race path a course is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSettings {
    pub name: String,
    /// Ordered control points, start to finish
    pub control_points: Vec<Vec3>,
}

impl CourseSettings {
    pub fn new(name: impl Into<String>, control_points: Vec<Vec3>) -> Self {
        Self {
            name: name.into(),
            control_points,
        }
    }

    /// Parse a course from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for CourseSettings {
    /// A gentle S-bend used by the demo binary
    fn default() -> Self {
        Self::new(
            "S-Bend",
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(40.0, 0.0, 10.0),
                Vec3::new(80.0, 2.0, 40.0),
                Vec3::new(120.0, 4.0, 50.0),
                Vec3::new(160.0, 2.0, 30.0),
                Vec3::new(200.0, 0.0, 0.0),
            ],
        )
    }
}
