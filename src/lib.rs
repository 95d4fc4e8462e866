//! Trackside - race progress tracking and match lifecycle
//!
//! Core modules:
//! - `sim`: Deterministic race core (path projection, match phases, roster, standings)
//! - `rollcall`: Finish list formatting for the shared results board
//! - `settings`: Match timing and course configuration
//! - `error`: Error taxonomy

pub mod error;
pub mod rollcall;
pub mod settings;
pub mod sim;

pub use error::{ConfigError, RaceError};
pub use rollcall::RollCall;
pub use settings::{CourseSettings, MatchSettings};
pub use sim::RaceSession;

/// Default configuration constants
pub mod consts {
    /// StartingMatch countdown length
    pub const MATCH_START_DELAY_MS: u64 = 5_000;
    /// EndingMatch countdown length (stragglers may still finish)
    pub const MATCH_END_DELAY_MS: u64 = 10_000;
    /// CompletedMatch results display before the next lobby opens
    pub const NEW_MATCH_READY_DELAY_MS: u64 = 5_000;
    /// Countdown broadcast granularity
    pub const COUNTDOWN_TICK_MS: u64 = 1_000;
    /// Queued players needed to start
    pub const MIN_PLAYERS: usize = 2;

    /// Progress sampling interval
    pub const SAMPLE_INTERVAL_MS: u64 = 500;
    /// Racers moving less than this (squared, world units) are not re-projected
    pub const MIN_MOVE_DISTANCE_SQ: f32 = 0.25;
    /// Closest-point search tolerance on t
    pub const SEARCH_TOLERANCE: f32 = 1e-4;
    /// Finishers that receive an ordinal label on the roll-call
    pub const ROLL_CALL_CAP: usize = 8;

    /// Per-subscriber event queue limit
    pub const MAX_PENDING_EVENTS: usize = 1024;
}
