//! Deterministic race core
//!
//! Everything here runs on one cooperative scheduler:
//! - Time only advances through explicit frame deltas
//! - Components talk through the event bus, never directly
//! - Stable iteration order (by participant ID)
//! - No rendering, audio or transport dependencies

pub mod events;
pub mod path;
pub mod roster;
pub mod session;
pub mod state;
pub mod timer;
pub mod tracker;

pub use events::{EventBus, EventKind, RaceEvent, Subscription};
pub use path::PathCurve;
pub use roster::{ParticipantId, Roster, RosterEntry, RosterStatus};
pub use session::RaceSession;
pub use state::{MatchPhase, MatchStateMachine};
pub use timer::{Countdown, CountdownProgress, IntervalTimer};
pub use tracker::{Participant, RaceTracker, Standing, TrackerState};
