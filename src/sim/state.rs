//! Match phases and the state machine that drives them
//!
//! Phases form a strict cycle with one early exit:
//!
//! ```text
//! ReadyForMatch -> StartingMatch -> PlayingMatch -> EndingMatch -> CompletedMatch -> ReadyForMatch
//!                        \____________(countdown aborted)____________/
//! ```
//!
//! Starting, Ending and Completed are timed. Each timer belongs to the phase
//! that started it and is dropped on every transition.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::events::{EventBus, EventKind, RaceEvent, Subscription};
use super::timer::Countdown;
use crate::error::RaceError;
use crate::settings::MatchSettings;

/// Current phase of the match lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Lobby open, waiting for enough queued players
    #[default]
    ReadyForMatch,
    /// Start countdown running
    StartingMatch,
    /// Race in progress
    PlayingMatch,
    /// Someone reached the goal; stragglers get a last countdown
    EndingMatch,
    /// Results on screen
    CompletedMatch,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::ReadyForMatch => "ReadyForMatch",
            MatchPhase::StartingMatch => "StartingMatch",
            MatchPhase::PlayingMatch => "PlayingMatch",
            MatchPhase::EndingMatch => "EndingMatch",
            MatchPhase::CompletedMatch => "CompletedMatch",
        }
    }

    /// Next phase in the regular cycle
    pub fn next(&self) -> MatchPhase {
        match self {
            MatchPhase::ReadyForMatch => MatchPhase::StartingMatch,
            MatchPhase::StartingMatch => MatchPhase::PlayingMatch,
            MatchPhase::PlayingMatch => MatchPhase::EndingMatch,
            MatchPhase::EndingMatch => MatchPhase::CompletedMatch,
            MatchPhase::CompletedMatch => MatchPhase::ReadyForMatch,
        }
    }

    /// Whether `self -> to` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, to: MatchPhase) -> bool {
        to == self.next() || (*self == MatchPhase::StartingMatch && to == MatchPhase::ReadyForMatch)
    }

    /// Lobby queueing is open in these phases
    pub fn accepts_queue_requests(&self) -> bool {
        matches!(self, MatchPhase::ReadyForMatch | MatchPhase::StartingMatch)
    }
}

/// A countdown owned by the phase that started it
#[derive(Debug)]
struct PhaseTimer {
    owner: MatchPhase,
    countdown: Countdown,
}

/// Owns the canonical match phase and its timers
#[derive(Debug)]
pub struct MatchStateMachine {
    phase: MatchPhase,
    timer: Option<PhaseTimer>,
    /// Last queue size reported by the roster
    queued: usize,
    min_players: usize,
    start_delay: Duration,
    end_delay: Duration,
    ready_delay: Duration,
    countdown_tick: Duration,
    bus: EventBus,
    subscription: Subscription,
}

impl MatchStateMachine {
    pub(crate) fn new(settings: &MatchSettings, bus: EventBus) -> Self {
        let subscription = bus.subscribe(&[
            EventKind::QueueCountChanged,
            EventKind::RacerFinished,
            EventKind::RaceAbandoned,
            EventKind::WorldReset,
        ]);
        Self {
            phase: MatchPhase::ReadyForMatch,
            timer: None,
            queued: 0,
            min_players: settings.min_players,
            start_delay: settings.start_delay(),
            end_delay: settings.end_delay(),
            ready_delay: settings.ready_delay(),
            countdown_tick: settings.countdown_tick(),
            bus,
            subscription,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Time left on the running phase timer, if any
    pub fn time_remaining(&self) -> Option<Duration> {
        self.timer.as_ref().map(|t| t.countdown.remaining())
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Commit `from -> to` if `from` is the live phase and the edge exists.
    /// Rejections leave the machine untouched.
    pub fn request_transition(&mut self, from: MatchPhase, to: MatchPhase) -> Result<(), RaceError> {
        if from != self.phase || from == to || !from.can_transition_to(to) {
            let err = RaceError::InvalidTransition {
                from,
                to,
                current: self.phase,
            };
            log::warn!("Rejected transition: {}", err);
            return Err(err);
        }
        self.commit(to);
        Ok(())
    }

    pub fn on_enough_players_queued(&mut self) -> Result<(), RaceError> {
        self.request_transition(MatchPhase::ReadyForMatch, MatchPhase::StartingMatch)
    }

    /// Abort the start countdown
    pub fn on_too_few_players_queued(&mut self) -> Result<(), RaceError> {
        self.request_transition(MatchPhase::StartingMatch, MatchPhase::ReadyForMatch)
    }

    pub fn on_goal_reached(&mut self) -> Result<(), RaceError> {
        if self.phase == MatchPhase::EndingMatch {
            // Later finishers arrive while the end countdown runs
            log::debug!("Goal reached during EndingMatch, countdown already running");
            return Ok(());
        }
        self.request_transition(MatchPhase::PlayingMatch, MatchPhase::EndingMatch)
    }

    /// Force ReadyForMatch immediately, bypassing timers
    pub fn world_reset(&mut self) {
        if self.phase == MatchPhase::ReadyForMatch {
            self.timer = None;
            return;
        }
        log::info!("World reset from {}", self.phase.as_str());
        self.commit(MatchPhase::ReadyForMatch);
    }

    /// Advance the phase timer; expiry commits the next transition
    pub fn advance(&mut self, dt: Duration) {
        let Some(timer) = self.timer.as_mut() else {
            return;
        };
        if timer.owner != self.phase {
            // Unreachable while commit() clears the timer, kept as a hard stop
            log::warn!("Dropping timer owned by {}", timer.owner.as_str());
            self.timer = None;
            return;
        }

        let progress = timer.countdown.advance(dt);
        for remaining in progress.ticks {
            self.publish_countdown(remaining);
        }
        if progress.expired {
            let next = self.phase.next();
            if let Err(err) = self.request_transition(self.phase, next) {
                log::warn!("Timer transition failed: {}", err);
            }
        }
    }

    /// Process queued bus events. Returns how many were handled.
    pub fn handle_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.subscription.pop() {
            handled += 1;
            match event {
                RaceEvent::QueueCountChanged { queued } => self.on_queue_count(queued),
                // Only finishes the tracker accepted; stray goal signals never get here
                RaceEvent::RacerFinished { id, place } => {
                    log::debug!("{} finished in place {}", id, place);
                    let _ = self.on_goal_reached();
                }
                RaceEvent::RaceAbandoned => {
                    if self.phase == MatchPhase::PlayingMatch {
                        log::info!("All racers left, ending match");
                        let _ = self.request_transition(MatchPhase::PlayingMatch, MatchPhase::EndingMatch);
                    }
                }
                RaceEvent::WorldReset => self.world_reset(),
                other => log::trace!("Match state machine ignoring {:?}", other.kind()),
            }
        }
        handled
    }

    fn on_queue_count(&mut self, queued: usize) {
        self.queued = queued;
        match self.phase {
            MatchPhase::ReadyForMatch if queued >= self.min_players => {
                let _ = self.on_enough_players_queued();
            }
            MatchPhase::StartingMatch if queued < self.min_players => {
                let _ = self.on_too_few_players_queued();
            }
            _ => {}
        }
    }

    fn commit(&mut self, to: MatchPhase) {
        let from = self.phase;
        // Cancel before entering the new phase so nothing stale can fire
        self.timer = None;
        self.phase = to;
        log::info!("Match phase {} -> {}", from.as_str(), to.as_str());

        let delay = match to {
            MatchPhase::StartingMatch => Some(self.start_delay),
            MatchPhase::EndingMatch => Some(self.end_delay),
            MatchPhase::CompletedMatch => Some(self.ready_delay),
            MatchPhase::ReadyForMatch | MatchPhase::PlayingMatch => None,
        };
        if let Some(delay) = delay {
            self.timer = Some(PhaseTimer {
                owner: to,
                countdown: Countdown::new(delay, self.countdown_tick),
            });
        }

        self.bus.publish(RaceEvent::MatchStateChanged { from, to });
        if let Some(delay) = delay {
            self.publish_countdown(delay);
        }
    }

    fn publish_countdown(&self, remaining: Duration) {
        let ms_remaining = remaining.as_millis() as u64;
        match self.phase {
            MatchPhase::StartingMatch => self.bus.publish(RaceEvent::MatchStartCountdown { ms_remaining }),
            MatchPhase::EndingMatch => self.bus.publish(RaceEvent::MatchEndCountdown { ms_remaining }),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::roster::ParticipantId;

    const ALL: [MatchPhase; 5] = [
        MatchPhase::ReadyForMatch,
        MatchPhase::StartingMatch,
        MatchPhase::PlayingMatch,
        MatchPhase::EndingMatch,
        MatchPhase::CompletedMatch,
    ];

    fn machine(min_players: usize) -> (MatchStateMachine, EventBus) {
        let settings = MatchSettings {
            min_players,
            ..Default::default()
        };
        let bus = EventBus::new(64);
        (MatchStateMachine::new(&settings, bus.clone()), bus)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_cycle_edges() {
        for phase in ALL {
            assert!(phase.can_transition_to(phase.next()));
            assert!(!phase.can_transition_to(phase));
        }
        assert!(MatchPhase::StartingMatch.can_transition_to(MatchPhase::ReadyForMatch));
        assert!(!MatchPhase::PlayingMatch.can_transition_to(MatchPhase::ReadyForMatch));
    }

    #[test]
    fn test_self_transition_fails() {
        let (mut sm, _bus) = machine(1);
        for phase in ALL {
            assert!(sm.request_transition(phase, phase).is_err());
        }
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);
    }

    #[test]
    fn test_wrong_source_fails() {
        let (mut sm, bus) = machine(1);
        let watcher = bus.subscribe(&[EventKind::MatchStateChanged]);
        let err = sm
            .request_transition(MatchPhase::PlayingMatch, MatchPhase::EndingMatch)
            .unwrap_err();
        assert!(matches!(
            err,
            RaceError::InvalidTransition {
                current: MatchPhase::ReadyForMatch,
                ..
            }
        ));
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);
        assert_eq!(watcher.pending_count(), 0);
    }

    #[test]
    fn test_transition_broadcast_after_commit() {
        let (mut sm, bus) = machine(1);
        let watcher = bus.subscribe(&[EventKind::MatchStateChanged, EventKind::MatchStartCountdown]);
        sm.on_enough_players_queued().unwrap();
        assert_eq!(sm.phase(), MatchPhase::StartingMatch);
        assert_eq!(
            watcher.drain(),
            vec![
                RaceEvent::MatchStateChanged {
                    from: MatchPhase::ReadyForMatch,
                    to: MatchPhase::StartingMatch,
                },
                RaceEvent::MatchStartCountdown { ms_remaining: 5000 },
            ]
        );
    }

    #[test]
    fn test_start_countdown_ticks_then_plays() {
        let (mut sm, bus) = machine(1);
        sm.on_enough_players_queued().unwrap();
        let watcher = bus.subscribe(&[EventKind::MatchStartCountdown, EventKind::MatchStateChanged]);

        for _ in 0..49 {
            sm.advance(ms(100));
        }
        assert_eq!(sm.phase(), MatchPhase::StartingMatch);
        sm.advance(ms(100));
        assert_eq!(sm.phase(), MatchPhase::PlayingMatch);
        assert_eq!(sm.time_remaining(), None);

        let events = watcher.drain();
        let ticks: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                RaceEvent::MatchStartCountdown { ms_remaining } => Some(*ms_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![4000, 3000, 2000, 1000]);
        assert_eq!(
            events.last(),
            Some(&RaceEvent::MatchStateChanged {
                from: MatchPhase::StartingMatch,
                to: MatchPhase::PlayingMatch,
            })
        );
    }

    #[test]
    fn test_abort_cancels_countdown() {
        let (mut sm, _bus) = machine(2);
        sm.on_queue_count(2);
        assert_eq!(sm.phase(), MatchPhase::StartingMatch);
        sm.advance(ms(4900));

        sm.on_queue_count(1);
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);
        assert_eq!(sm.time_remaining(), None);

        // The old countdown must not push us into PlayingMatch
        sm.advance(ms(1000));
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);

        // Re-queueing starts a fresh countdown
        sm.on_queue_count(2);
        assert_eq!(sm.time_remaining(), Some(ms(5000)));
    }

    #[test]
    fn test_goal_reached_only_while_playing() {
        let (mut sm, _bus) = machine(1);
        assert!(sm.on_goal_reached().is_err());
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);

        sm.on_enough_players_queued().unwrap();
        sm.advance(ms(5000));
        assert_eq!(sm.phase(), MatchPhase::PlayingMatch);
        // Playing has no timer
        sm.advance(ms(60_000));
        assert_eq!(sm.phase(), MatchPhase::PlayingMatch);

        sm.on_goal_reached().unwrap();
        assert_eq!(sm.phase(), MatchPhase::EndingMatch);
        assert!(sm.on_goal_reached().is_ok());
        assert_eq!(sm.time_remaining(), Some(ms(10_000)));
    }

    #[test]
    fn test_full_cycle_via_timers() {
        let (mut sm, bus) = machine(1);
        let watcher = bus.subscribe(&[EventKind::MatchEndCountdown]);
        sm.on_enough_players_queued().unwrap();
        sm.advance(ms(5000));
        sm.on_goal_reached().unwrap();
        sm.advance(ms(10_000));
        assert_eq!(sm.phase(), MatchPhase::CompletedMatch);
        sm.advance(ms(5000));
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);

        let ends: Vec<RaceEvent> = watcher.drain();
        assert_eq!(ends.first(), Some(&RaceEvent::MatchEndCountdown { ms_remaining: 10_000 }));
        assert_eq!(ends.len(), 10);
    }

    #[test]
    fn test_world_reset_bypasses_timers() {
        let (mut sm, _bus) = machine(1);
        sm.on_enough_players_queued().unwrap();
        sm.advance(ms(5000));
        sm.on_goal_reached().unwrap();
        sm.world_reset();
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);
        assert_eq!(sm.time_remaining(), None);
        sm.advance(ms(20_000));
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);
    }

    #[test]
    fn test_handles_bus_events() {
        let (mut sm, bus) = machine(1);
        bus.publish(RaceEvent::QueueCountChanged { queued: 1 });
        assert_eq!(sm.handle_pending(), 1);
        assert_eq!(sm.phase(), MatchPhase::StartingMatch);

        bus.publish(RaceEvent::WorldReset);
        sm.handle_pending();
        assert_eq!(sm.phase(), MatchPhase::ReadyForMatch);
    }

    #[test]
    fn test_only_accepted_finishes_end_the_race() {
        let (mut sm, bus) = machine(1);
        sm.on_enough_players_queued().unwrap();
        sm.advance(ms(5000));

        // Raw goal signals are the tracker's to validate
        bus.publish(RaceEvent::GoalReached {
            id: ParticipantId(42),
            client_reported_time: 1.0,
        });
        assert_eq!(sm.handle_pending(), 0);
        assert_eq!(sm.phase(), MatchPhase::PlayingMatch);

        bus.publish(RaceEvent::RacerFinished {
            id: ParticipantId(1),
            place: 1,
        });
        assert_eq!(sm.handle_pending(), 1);
        assert_eq!(sm.phase(), MatchPhase::EndingMatch);
    }
}
