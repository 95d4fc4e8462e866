//! Race progress tracking and live standings
//!
//! While a race runs, the tracker samples every unfinished racer on a fixed
//! interval, projects their position onto the course, and broadcasts ranks.
//! Finishers drop out of the sampling loop and onto the roll-call.
//!
//! Per tick, all projections complete before the ranking is sorted and
//! published, so listeners never see a half-updated order.

use std::cmp::Ordering;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::events::{EventBus, EventKind, RaceEvent, Subscription};
use super::path::PathCurve;
use super::roster::{ParticipantId, Roster, RosterStatus};
use super::state::MatchPhase;
use super::timer::IntervalTimer;
use crate::error::RaceError;
use crate::rollcall::{RollCall, ordinal};
use crate::settings::MatchSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    Idle,
    Tracking,
}

/// Per-racer tracking record, owned by the tracker for one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Progress along the course in [0, 1]
    pub progress: f32,
    /// Match clock at the last projection (frozen at finish)
    pub elapsed: Duration,
    /// Position used for the last projection
    pub position: Option<Vec3>,
    /// Most recent position reported by the host
    pub reported: Option<Vec3>,
    pub finished: bool,
}

impl Participant {
    fn new(id: ParticipantId, name: String) -> Self {
        Self {
            id,
            name,
            progress: 0.0,
            elapsed: Duration::ZERO,
            position: None,
            reported: None,
            finished: false,
        }
    }

    /// Whether the reported position moved far enough to be worth projecting
    fn needs_projection(&self, min_move_distance_sq: f32) -> Option<Vec3> {
        let reported = self.reported?;
        match self.position {
            None => Some(reported),
            Some(last) if last.distance_squared(reported) > min_move_distance_sq => Some(reported),
            Some(_) => None,
        }
    }
}

/// One row of the ranking snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub id: ParticipantId,
    /// 1-indexed
    pub rank: usize,
    pub progress: f32,
    pub finished: bool,
}

#[derive(Debug)]
pub struct RaceTracker {
    state: TrackerState,
    curve: PathCurve,
    /// Sorted by id
    participants: Vec<Participant>,
    roll_call: RollCall,
    /// Match clock, accumulated from frame deltas
    clock: Duration,
    sampler: IntervalTimer,
    min_move_distance_sq: f32,
    search_tolerance: f32,
    bus: EventBus,
    /// Lifecycle events, held for the tracker's whole life
    lifecycle: Subscription,
    /// Finish signals, held only while tracking
    race: Option<Subscription>,
}

impl RaceTracker {
    pub(crate) fn new(curve: PathCurve, settings: &MatchSettings, bus: EventBus) -> Self {
        let lifecycle = bus.subscribe(&[
            EventKind::MatchStateChanged,
            EventKind::ParticipantDeparted,
            EventKind::WorldReset,
        ]);
        Self {
            state: TrackerState::Idle,
            curve,
            participants: Vec::new(),
            roll_call: RollCall::new(settings.roll_call_cap),
            clock: Duration::ZERO,
            sampler: IntervalTimer::new(settings.sample_interval()),
            min_move_distance_sq: settings.min_move_distance_sq,
            search_tolerance: settings.search_tolerance,
            bus,
            lifecycle,
            race: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == TrackerState::Tracking
    }

    pub fn curve(&self) -> &PathCurve {
        &self.curve
    }

    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.index_of(id).map(|i| &self.participants[i])
    }

    pub fn roll_call(&self) -> &RollCall {
        &self.roll_call
    }

    fn index_of(&self, id: ParticipantId) -> Option<usize> {
        self.participants.binary_search_by_key(&id, |p| p.id).ok()
    }

    /// Idle -> Tracking: snapshot active roster members as racers
    pub fn start(&mut self, roster: &Roster) {
        if self.is_tracking() {
            log::warn!("Tracker restarted while tracking, discarding previous race");
            self.stop(false);
        }

        self.participants = roster
            .query(RosterStatus::Active)
            .into_iter()
            .map(|id| {
                let name = roster.name_of(id).map_or_else(|| id.to_string(), str::to_string);
                Participant::new(id, name)
            })
            .collect();
        self.roll_call.clear();
        self.clock = Duration::ZERO;
        self.sampler.reset();
        self.race = Some(self.bus.subscribe(&[EventKind::GoalReached]));
        self.state = TrackerState::Tracking;

        log::info!("Tracking {} racers on {} control points", self.participants.len(), self.curve.len());
    }

    /// Tracking -> Idle. With `final_roll_call`, publishes the results board
    /// including everyone who did not finish.
    pub fn stop(&mut self, final_roll_call: bool) {
        if !self.is_tracking() {
            return;
        }
        // Release the finish subscription first so late goals are not queued
        self.race = None;

        if final_roll_call {
            let non_finishers = self
                .participants
                .iter()
                .filter(|p| !p.finished)
                .map(|p| (p.name.as_str(), p.elapsed));
            let text = self.roll_call.render_final(non_finishers);
            self.bus.publish(RaceEvent::RollCallUpdate { text });
        }

        for p in self.participants.iter().filter(|p| !p.finished) {
            self.bus.publish(RaceEvent::StopRankUpdates { id: p.id });
        }

        log::info!(
            "Tracking stopped at {:.2}s: {} finished of {}",
            self.clock.as_secs_f32(),
            self.roll_call.len(),
            self.participants.len()
        );

        self.participants.clear();
        self.roll_call.clear();
        self.clock = Duration::ZERO;
        self.sampler.reset();
        self.state = TrackerState::Idle;
    }

    /// Record the latest world position reported for a racer
    pub fn report_position(&mut self, id: ParticipantId, position: Vec3) -> Result<(), RaceError> {
        let Some(i) = self.index_of(id) else {
            return Err(RaceError::MissingParticipant(id));
        };
        let participant = &mut self.participants[i];
        if !participant.finished {
            participant.reported = Some(position);
        }
        Ok(())
    }

    /// Frame update: advance the match clock and run any due samples
    pub fn advance(&mut self, dt: Duration) {
        if !self.is_tracking() {
            return;
        }
        if !self.participants.is_empty() {
            self.clock += dt;
        }
        if self.sampler.advance(dt) > 0 {
            self.sample();
            self.publish_ranks();
        }
    }

    /// Re-project every unfinished racer that moved enough since last time
    fn sample(&mut self) {
        let clock = self.clock;
        let mut projected = 0;
        for p in self.participants.iter_mut().filter(|p| !p.finished) {
            let Some(position) = p.needs_projection(self.min_move_distance_sq) else {
                continue;
            };
            p.progress = self
                .curve
                .closest_progress_with_tolerance(position, self.search_tolerance);
            p.elapsed = clock;
            p.position = Some(position);
            projected += 1;
        }
        log::trace!("Sampled {} racers at {:.2}s", projected, clock.as_secs_f32());
    }

    /// Current ranking: finishers by finish order, then the rest by progress
    pub fn standings(&self) -> Vec<Standing> {
        let mut order: Vec<&Participant> = Vec::with_capacity(self.participants.len());
        for entry in self.roll_call.entries() {
            if let Some(i) = self.index_of(entry.id) {
                order.push(&self.participants[i]);
            }
        }

        let mut running: Vec<&Participant> = self.participants.iter().filter(|p| !p.finished).collect();
        // Stable: ties keep id order
        running.sort_by(|a, b| b.progress.partial_cmp(&a.progress).unwrap_or(Ordering::Equal));
        order.extend(running);

        order
            .into_iter()
            .enumerate()
            .map(|(i, p)| Standing {
                id: p.id,
                rank: i + 1,
                progress: p.progress,
                finished: p.finished,
            })
            .collect()
    }

    fn publish_ranks(&self) {
        let total_racers = self.participants.len();
        let match_time_ms = self.clock.as_secs_f32() * 1000.0;
        for standing in self.standings().into_iter().filter(|s| !s.finished) {
            self.bus.publish(RaceEvent::RankUpdate {
                id: standing.id,
                position: standing.rank,
                total_racers,
                match_time_ms,
            });
        }
    }

    /// Mark a racer as finished. A repeat call for the same racer is a no-op
    /// and returns `Ok(false)`.
    pub fn on_participant_finished(&mut self, id: ParticipantId) -> Result<bool, RaceError> {
        let Some(i) = self.index_of(id) else {
            log::warn!("Finish for unknown racer {}", id);
            return Err(RaceError::MissingParticipant(id));
        };
        if self.participants[i].finished {
            return Ok(false);
        }

        let clock = self.clock;
        let participant = &mut self.participants[i];
        participant.finished = true;
        participant.progress = 1.0;
        participant.elapsed = clock;
        let name = participant.name.clone();

        let place = self.roll_call.record(id, name.as_str(), clock);
        log::info!("{} ({}) finished {} at {:.2}s", id, name, ordinal(place), clock.as_secs_f32());

        self.bus.publish(RaceEvent::StopRankUpdates { id });
        self.bus.publish(RaceEvent::RollCallUpdate {
            text: self.roll_call.render(),
        });
        self.bus.publish(RaceEvent::RacerFinished { id, place });
        Ok(true)
    }

    /// Drop a racer who left the roster mid-race
    fn on_departed(&mut self, id: ParticipantId) {
        let Some(i) = self.index_of(id) else {
            return;
        };
        let removed = self.participants.remove(i);
        log::info!("{} ({}) removed from race", id, removed.name);

        if self.is_tracking() && self.participants.is_empty() {
            self.bus.publish(RaceEvent::RaceAbandoned);
        }
    }

    fn on_match_state_change(&mut self, from: MatchPhase, to: MatchPhase, roster: &Roster) {
        match to {
            MatchPhase::PlayingMatch => self.start(roster),
            MatchPhase::CompletedMatch => self.stop(true),
            MatchPhase::ReadyForMatch if from != MatchPhase::StartingMatch => self.stop(false),
            _ => {}
        }
    }

    /// Process queued bus events. Returns how many were handled.
    pub fn handle_pending(&mut self, roster: &Roster) -> usize {
        let mut handled = 0;
        loop {
            // Lifecycle first so a stop releases the finish subscription
            let event = match self.lifecycle.pop() {
                Some(event) => event,
                None => match self.race.as_ref().and_then(|s| s.pop()) {
                    Some(event) => event,
                    None => break,
                },
            };
            handled += 1;
            match event {
                RaceEvent::MatchStateChanged { from, to } => self.on_match_state_change(from, to, roster),
                RaceEvent::ParticipantDeparted { id, status } => {
                    if status == RosterStatus::Active {
                        self.on_departed(id);
                    }
                }
                RaceEvent::WorldReset => self.stop(false),
                RaceEvent::GoalReached {
                    id,
                    client_reported_time,
                } => {
                    log::debug!(
                        "{} reports goal at {:.2}s (tracker clock {:.2}s)",
                        id,
                        client_reported_time,
                        self.clock.as_secs_f32()
                    );
                    let _ = self.on_participant_finished(id);
                }
                other => log::trace!("Tracker ignoring {:?}", other.kind()),
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);
    const C: ParticipantId = ParticipantId(3);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn line() -> PathCurve {
        PathCurve::new(vec![Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)]).unwrap()
    }

    /// Tracker plus a roster with `ids` already active
    fn racing(ids: &[ParticipantId]) -> (RaceTracker, Roster, EventBus) {
        let bus = EventBus::new(256);
        let mut roster = Roster::new(bus.clone());
        for id in ids {
            roster.on_participant_join(*id, format!("P{}", id.0));
        }
        roster.on_match_state_change(MatchPhase::StartingMatch, MatchPhase::PlayingMatch);
        let mut tracker = RaceTracker::new(line(), &MatchSettings::default(), bus.clone());
        tracker.start(&roster);
        (tracker, roster, bus)
    }

    #[test]
    fn test_start_snapshots_active_roster() {
        let (tracker, _roster, _bus) = racing(&[A, B]);
        assert!(tracker.is_tracking());
        assert_eq!(tracker.participants().len(), 2);
        assert_eq!(tracker.participant(B).map(|p| p.name.as_str()), Some("P2"));
        assert_eq!(tracker.clock(), Duration::ZERO);
    }

    #[test]
    fn test_sampling_ranks_by_progress() {
        let (mut tracker, _roster, bus) = racing(&[A, B, C]);
        let ranks = bus.subscribe(&[EventKind::RankUpdate]);
        tracker.report_position(A, Vec3::new(10.0, 0.0, 0.0)).unwrap();
        tracker.report_position(B, Vec3::new(60.0, 0.0, 0.0)).unwrap();
        tracker.report_position(C, Vec3::new(30.0, 0.0, 0.0)).unwrap();

        tracker.advance(ms(400));
        assert_eq!(ranks.pending_count(), 0);
        tracker.advance(ms(100));

        let events = ranks.drain();
        assert_eq!(events.len(), 3);
        let rank_of = |id: ParticipantId| {
            events.iter().find_map(|e| match e {
                RaceEvent::RankUpdate {
                    id: eid,
                    position,
                    total_racers,
                    match_time_ms,
                } if *eid == id => Some((*position, *total_racers, *match_time_ms)),
                _ => None,
            })
        };
        assert_eq!(rank_of(B), Some((1, 3, 500.0)));
        assert_eq!(rank_of(C), Some((2, 3, 500.0)));
        assert_eq!(rank_of(A), Some((3, 3, 500.0)));
    }

    #[test]
    fn test_small_moves_skip_projection() {
        let (mut tracker, _roster, _bus) = racing(&[A]);
        tracker.report_position(A, Vec3::new(50.0, 0.0, 0.0)).unwrap();
        tracker.advance(ms(500));
        let first = tracker.participant(A).unwrap().clone();
        assert!((first.progress - 0.5).abs() < 0.01);
        assert_eq!(first.elapsed, ms(500));

        // 0.4 units squared is 0.16, under the 0.25 threshold
        tracker.report_position(A, Vec3::new(50.4, 0.0, 0.0)).unwrap();
        tracker.advance(ms(500));
        let second = tracker.participant(A).unwrap();
        assert_eq!(second.progress, first.progress);
        assert_eq!(second.elapsed, ms(500));

        tracker.report_position(A, Vec3::new(52.0, 0.0, 0.0)).unwrap();
        tracker.advance(ms(500));
        let third = tracker.participant(A).unwrap();
        assert!(third.progress > first.progress);
        assert_eq!(third.elapsed, ms(1500));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (mut tracker, _roster, bus) = racing(&[A, B]);
        let out = bus.subscribe(&[
            EventKind::StopRankUpdates,
            EventKind::RollCallUpdate,
            EventKind::RacerFinished,
        ]);
        tracker.advance(ms(12_300));

        assert!(tracker.on_participant_finished(A).unwrap());
        let once = tracker.participant(A).unwrap().clone();
        let first_events = out.drain();

        assert!(!tracker.on_participant_finished(A).unwrap());
        assert_eq!(tracker.participant(A).unwrap(), &once);
        assert_eq!(out.pending_count(), 0);

        assert!(once.finished);
        assert_eq!(once.progress, 1.0);
        assert_eq!(once.elapsed, ms(12_300));
        assert_eq!(
            first_events,
            vec![
                RaceEvent::StopRankUpdates { id: A },
                RaceEvent::RollCallUpdate {
                    text: "1st: P1 [00:12:30]\n".into()
                },
                RaceEvent::RacerFinished { id: A, place: 1 },
            ]
        );
    }

    #[test]
    fn test_finishers_excluded_from_rank_updates() {
        let (mut tracker, _roster, bus) = racing(&[A, B]);
        let ranks = bus.subscribe(&[EventKind::RankUpdate]);
        tracker.report_position(B, Vec3::new(20.0, 0.0, 0.0)).unwrap();
        tracker.on_participant_finished(A).unwrap();
        tracker.advance(ms(500));

        assert_eq!(
            ranks.drain(),
            vec![RaceEvent::RankUpdate {
                id: B,
                position: 2,
                total_racers: 2,
                match_time_ms: 500.0,
            }]
        );
        let standings = tracker.standings();
        assert_eq!(standings[0].id, A);
        assert!(standings[0].finished);
    }

    #[test]
    fn test_unknown_racer() {
        let (mut tracker, _roster, _bus) = racing(&[A]);
        assert!(matches!(
            tracker.on_participant_finished(C),
            Err(RaceError::MissingParticipant(ParticipantId(3)))
        ));
        assert!(tracker.report_position(C, Vec3::ONE).is_err());
    }

    #[test]
    fn test_stop_publishes_final_roll_call() {
        let (mut tracker, _roster, bus) = racing(&[A, B, C]);
        let out = bus.subscribe(&[EventKind::StopRankUpdates, EventKind::RollCallUpdate]);
        tracker.report_position(B, Vec3::new(40.0, 0.0, 0.0)).unwrap();
        for _ in 0..123 {
            tracker.advance(ms(100));
        }
        tracker.on_participant_finished(A).unwrap();
        out.drain();

        tracker.stop(true);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.participants().is_empty());
        assert!(tracker.roll_call().is_empty());
        assert_eq!(tracker.clock(), Duration::ZERO);

        // B stood still after the first sample, C never reported a position
        assert_eq!(
            out.drain(),
            vec![
                RaceEvent::RollCallUpdate {
                    text: "1st: P1 [00:12:30]\nDid Not Finish\tP2 [00:00:50]\nDid Not Finish\tP3 [00:00:00]\n"
                        .into()
                },
                RaceEvent::StopRankUpdates { id: B },
                RaceEvent::StopRankUpdates { id: C },
            ]
        );
    }

    #[test]
    fn test_idle_ignores_time() {
        let bus = EventBus::new(16);
        let mut tracker = RaceTracker::new(line(), &MatchSettings::default(), bus);
        tracker.advance(ms(1000));
        assert_eq!(tracker.clock(), Duration::ZERO);
        assert!(tracker.on_participant_finished(A).is_err());
    }

    #[test]
    fn test_departure_and_abandon() {
        let (mut tracker, roster, bus) = racing(&[A, B]);
        let abandoned = bus.subscribe(&[EventKind::RaceAbandoned]);

        bus.publish(RaceEvent::ParticipantDeparted {
            id: A,
            status: RosterStatus::Active,
        });
        tracker.handle_pending(&roster);
        assert_eq!(tracker.participants().len(), 1);
        assert_eq!(abandoned.pending_count(), 0);

        bus.publish(RaceEvent::ParticipantDeparted {
            id: B,
            status: RosterStatus::Active,
        });
        tracker.handle_pending(&roster);
        assert!(tracker.participants().is_empty());
        assert_eq!(abandoned.drain(), vec![RaceEvent::RaceAbandoned]);

        // Clock stops once nobody is registered
        tracker.advance(ms(1000));
        assert_eq!(tracker.clock(), Duration::ZERO);
    }

    #[test]
    fn test_goal_subscription_released_on_stop() {
        let (mut tracker, roster, bus) = racing(&[A]);
        let before = bus.subscriber_count();
        tracker.stop(false);
        assert_eq!(bus.subscriber_count(), before - 1);

        // A goal after the race is never delivered to the tracker
        bus.publish(RaceEvent::GoalReached {
            id: A,
            client_reported_time: 1.0,
        });
        assert_eq!(tracker.handle_pending(&roster), 0);
    }

    #[test]
    fn test_lifecycle_events_drive_start_and_stop() {
        let bus = EventBus::new(64);
        let mut roster = Roster::new(bus.clone());
        let mut tracker = RaceTracker::new(line(), &MatchSettings::default(), bus.clone());
        roster.on_participant_join(A, "A");
        roster.on_match_state_change(MatchPhase::StartingMatch, MatchPhase::PlayingMatch);

        bus.publish(RaceEvent::MatchStateChanged {
            from: MatchPhase::StartingMatch,
            to: MatchPhase::PlayingMatch,
        });
        tracker.handle_pending(&roster);
        assert!(tracker.is_tracking());

        bus.publish(RaceEvent::GoalReached {
            id: A,
            client_reported_time: 9.0,
        });
        tracker.handle_pending(&roster);
        assert!(tracker.participant(A).unwrap().finished);

        bus.publish(RaceEvent::WorldReset);
        tracker.handle_pending(&roster);
        assert!(!tracker.is_tracking());
    }

    proptest! {
        #[test]
        fn prop_higher_progress_never_ranks_worse(xs in proptest::collection::vec(0.0f32..100.0, 1..8)) {
            let ids: Vec<ParticipantId> = (1..=xs.len() as u32).map(ParticipantId).collect();
            let (mut tracker, _roster, _bus) = racing(&ids);
            for (id, x) in ids.iter().zip(&xs) {
                tracker.report_position(*id, Vec3::new(*x, 0.0, 0.0)).unwrap();
            }
            tracker.advance(ms(500));

            let standings = tracker.standings();
            prop_assert_eq!(standings.len(), xs.len());
            for pair in standings.windows(2) {
                prop_assert!(pair[0].progress >= pair[1].progress);
                prop_assert_eq!(pair[0].rank + 1, pair[1].rank);
            }
        }
    }
}
