//! Race session: one match lifecycle, fully wired
//!
//! The session is the only way to build the roster, tracker and state
//! machine, so each race gets exactly one of each. The host feeds it inbound
//! signals and frame deltas; presentation collaborators read outbound events
//! through their own [`Subscription`].

use std::time::Duration;

use glam::Vec3;

use super::events::{EventBus, EventKind, RaceEvent, Subscription};
use super::path::PathCurve;
use super::roster::{ParticipantId, Roster};
use super::state::{MatchPhase, MatchStateMachine};
use super::tracker::RaceTracker;
use crate::error::RaceError;
use crate::settings::{CourseSettings, MatchSettings};

/// Safety valve for event feedback loops within one pump
const MAX_PUMP_ROUNDS: usize = 64;

#[derive(Debug)]
pub struct RaceSession {
    settings: MatchSettings,
    course_name: String,
    bus: EventBus,
    roster: Roster,
    tracker: RaceTracker,
    machine: MatchStateMachine,
}

impl RaceSession {
    /// Build a session. Invalid settings or a degenerate course are fatal.
    pub fn new(settings: MatchSettings, course: &CourseSettings) -> Result<Self, RaceError> {
        settings.validate()?;
        let curve = PathCurve::new(course.control_points.clone())?;

        let bus = EventBus::new(settings.max_pending_events);
        let roster = Roster::new(bus.clone());
        let tracker = RaceTracker::new(curve, &settings, bus.clone());
        let machine = MatchStateMachine::new(&settings, bus.clone());

        log::info!(
            "Race session ready on '{}' (min players {}, sampling every {}ms)",
            course.name,
            settings.min_players,
            settings.sample_interval_ms
        );

        Ok(Self {
            settings,
            course_name: course.name.clone(),
            bus,
            roster,
            tracker,
            machine,
        })
    }

    /// Listen for events, e.g. [`EventKind::PRESENTATION`]
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.bus.subscribe(kinds)
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn course_name(&self) -> &str {
        &self.course_name
    }

    pub fn phase(&self) -> MatchPhase {
        self.machine.phase()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn tracker(&self) -> &RaceTracker {
        &self.tracker
    }

    pub fn machine(&self) -> &MatchStateMachine {
        &self.machine
    }

    // === Inbound signals ===

    pub fn join(&mut self, id: ParticipantId, name: impl Into<String>) {
        self.dispatch(RaceEvent::ParticipantJoined { id, name: name.into() });
    }

    pub fn leave(&mut self, id: ParticipantId) {
        self.dispatch(RaceEvent::ParticipantLeft { id });
    }

    pub fn queue(&mut self, id: ParticipantId) {
        self.dispatch(RaceEvent::ParticipantQueueRequest { id });
    }

    pub fn dequeue(&mut self, id: ParticipantId) {
        self.dispatch(RaceEvent::ParticipantDequeueRequest { id });
    }

    /// A racer touched the goal. `client_reported_time` is only logged.
    pub fn goal_reached(&mut self, id: ParticipantId, client_reported_time: f32) {
        self.dispatch(RaceEvent::GoalReached {
            id,
            client_reported_time,
        });
    }

    /// Force everything back to ReadyForMatch immediately
    pub fn world_reset(&mut self) {
        self.dispatch(RaceEvent::WorldReset);
    }

    /// Latest world position for a racer. Unknown racers are logged and ignored.
    pub fn report_position(&mut self, id: ParticipantId, position: Vec3) {
        if let Err(err) = self.tracker.report_position(id, position) {
            log::warn!("Dropping position report: {}", err);
        }
    }

    /// Per-frame update
    pub fn update(&mut self, dt: Duration) {
        // Race clock and sampling first, so the frame that starts a race
        // does not count towards it
        self.tracker.advance(dt);
        self.pump();
        self.machine.advance(dt);
        self.pump();
    }

    fn dispatch(&mut self, event: RaceEvent) {
        self.bus.publish(event);
        self.pump();
    }

    /// Deliver pending events until every component is idle. The roster runs
    /// first so the tracker snapshots up-to-date membership on race start.
    fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let handled = self.roster.handle_pending()
                + self.tracker.handle_pending(&self.roster)
                + self.machine.handle_pending();
            if handled == 0 {
                return;
            }
        }
        log::warn!("Event pump did not settle after {} rounds", MAX_PUMP_ROUNDS);
    }
}
