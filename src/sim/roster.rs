//! Participant roster
//!
//! Tracks who is present and whether they are spectating in the lobby,
//! queued for the next race, or racing. Status only changes on explicit
//! queue/dequeue requests or on match phase transitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::events::{EventBus, EventKind, RaceEvent, Subscription};
use super::state::MatchPhase;
use crate::error::RaceError;

/// Stable participant identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Phase membership of a roster entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RosterStatus {
    /// Present, not in the next race
    #[default]
    Lobby,
    /// Wants to race in the next match
    Queued,
    /// Racing in the current match
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub name: String,
    pub status: RosterStatus,
}

/// Live set of participants, ordered by id
#[derive(Debug)]
pub struct Roster {
    entries: BTreeMap<ParticipantId, RosterEntry>,
    /// Last phase seen on the bus
    phase: MatchPhase,
    bus: EventBus,
    subscription: Subscription,
}

impl Roster {
    pub(crate) fn new(bus: EventBus) -> Self {
        let subscription = bus.subscribe(&[
            EventKind::ParticipantJoined,
            EventKind::ParticipantLeft,
            EventKind::ParticipantQueueRequest,
            EventKind::ParticipantDequeueRequest,
            EventKind::MatchStateChanged,
            EventKind::WorldReset,
        ]);
        Self {
            entries: BTreeMap::new(),
            phase: MatchPhase::ReadyForMatch,
            bus,
            subscription,
        }
    }

    /// Add a participant in the lobby. Re-joining only refreshes the name;
    /// the status stays whatever the lifecycle last made it.
    pub fn on_participant_join(&mut self, id: ParticipantId, name: impl Into<String>) {
        let name = name.into();
        if let Some(entry) = self.entries.get_mut(&id) {
            log::debug!("{} re-joined as {} while {:?}", id, name, entry.status);
            entry.name = name;
            return;
        }
        log::info!("{} ({}) joined", id, name);
        self.entries.insert(
            id,
            RosterEntry {
                id,
                name,
                status: RosterStatus::Lobby,
            },
        );
    }

    /// Remove a participant; queued or racing departures are announced
    pub fn on_participant_leave(&mut self, id: ParticipantId) -> Result<RosterEntry, RaceError> {
        let mut removed = None;
        self.with_queue_count(|roster| removed = roster.entries.remove(&id));
        let Some(entry) = removed else {
            log::warn!("Leave for unknown participant {}", id);
            return Err(RaceError::MissingParticipant(id));
        };

        log::info!("{} ({}) left while {:?}", id, entry.name, entry.status);
        if entry.status != RosterStatus::Lobby {
            self.bus.publish(RaceEvent::ParticipantDeparted {
                id,
                status: entry.status,
            });
        }
        Ok(entry)
    }

    /// Lobby -> Queued. Returns whether the status changed.
    pub fn on_queue_request(&mut self, id: ParticipantId) -> Result<bool, RaceError> {
        self.set_queued(id, RosterStatus::Lobby, RosterStatus::Queued)
    }

    /// Queued -> Lobby. Returns whether the status changed.
    pub fn on_dequeue_request(&mut self, id: ParticipantId) -> Result<bool, RaceError> {
        self.set_queued(id, RosterStatus::Queued, RosterStatus::Lobby)
    }

    fn set_queued(
        &mut self,
        id: ParticipantId,
        from: RosterStatus,
        to: RosterStatus,
    ) -> Result<bool, RaceError> {
        if !self.entries.contains_key(&id) {
            log::warn!("Queue change for unknown participant {}", id);
            return Err(RaceError::MissingParticipant(id));
        }
        if !self.phase.accepts_queue_requests() {
            log::warn!(
                "Ignoring {:?} -> {:?} for {} during {}",
                from,
                to,
                id,
                self.phase.as_str()
            );
            return Ok(false);
        }

        let mut changed = false;
        self.with_queue_count(|roster| {
            if let Some(entry) = roster.entries.get_mut(&id) {
                if entry.status == from {
                    entry.status = to;
                    changed = true;
                }
            }
        });
        if changed {
            log::debug!("{} is now {:?}", id, to);
        }
        Ok(changed)
    }

    /// Bulk status transfer on phase changes
    pub fn on_match_state_change(&mut self, from: MatchPhase, to: MatchPhase) {
        self.phase = to;
        match (from, to) {
            (MatchPhase::StartingMatch, MatchPhase::PlayingMatch) => {
                self.with_queue_count(|roster| roster.set_all(RosterStatus::Active));
            }
            (_, MatchPhase::CompletedMatch) => {
                self.with_queue_count(|roster| roster.set_all(RosterStatus::Lobby));
            }
            // An aborted countdown keeps the queue intact; any other way back
            // to ReadyForMatch is a reset
            (MatchPhase::StartingMatch, MatchPhase::ReadyForMatch) => {}
            (_, MatchPhase::ReadyForMatch) => {
                self.with_queue_count(|roster| roster.set_all(RosterStatus::Lobby));
            }
            _ => {}
        }
    }

    fn set_all(&mut self, status: RosterStatus) {
        for entry in self.entries.values_mut() {
            entry.status = status;
        }
    }

    /// Run a mutation and announce the queue size if it changed
    fn with_queue_count<F: FnOnce(&mut Self)>(&mut self, f: F) {
        let before = self.count(RosterStatus::Queued);
        f(self);
        let after = self.count(RosterStatus::Queued);
        if before != after {
            self.bus.publish(RaceEvent::QueueCountChanged { queued: after });
        }
    }

    /// Ids with the given status, in id order
    pub fn query(&self, status: RosterStatus) -> Vec<ParticipantId> {
        self.entries
            .values()
            .filter(|e| e.status == status)
            .map(|e| e.id)
            .collect()
    }

    pub fn count(&self, status: RosterStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    pub fn get(&self, id: ParticipantId) -> Option<&RosterEntry> {
        self.entries.get(&id)
    }

    pub fn status_of(&self, id: ParticipantId) -> Option<RosterStatus> {
        self.entries.get(&id).map(|e| e.status)
    }

    pub fn name_of(&self, id: ParticipantId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Process queued bus events. Returns how many were handled.
    pub fn handle_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.subscription.pop() {
            handled += 1;
            match event {
                RaceEvent::ParticipantJoined { id, name } => self.on_participant_join(id, name),
                RaceEvent::ParticipantLeft { id } => {
                    let _ = self.on_participant_leave(id);
                }
                RaceEvent::ParticipantQueueRequest { id } => {
                    let _ = self.on_queue_request(id);
                }
                RaceEvent::ParticipantDequeueRequest { id } => {
                    let _ = self.on_dequeue_request(id);
                }
                RaceEvent::MatchStateChanged { from, to } => self.on_match_state_change(from, to),
                RaceEvent::WorldReset => {
                    self.with_queue_count(|roster| roster.set_all(RosterStatus::Lobby));
                }
                other => log::trace!("Roster ignoring {:?}", other.kind()),
            }
        }
        handled
    }
}
