//! Typed publish/subscribe event bus
//!
//! Components publish events instead of reaching into each other's state.
//! Each subscriber owns a queue filtered by [`EventKind`]; dropping the
//! [`Subscription`] removes it from the bus, so a component that stops
//! listening cannot be handed stale events.
//!
//! The bus is single-threaded (`Rc<RefCell<..>>`). Every component of a race
//! lives on the same cooperative scheduler.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use super::roster::{ParticipantId, RosterStatus};
use super::state::MatchPhase;

/// Everything that crosses a component boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RaceEvent {
    // === Match lifecycle ===
    /// Broadcast after a phase change has been committed
    MatchStateChanged { from: MatchPhase, to: MatchPhase },
    MatchStartCountdown { ms_remaining: u64 },
    MatchEndCountdown { ms_remaining: u64 },

    // === Inbound from the host ===
    ParticipantJoined { id: ParticipantId, name: String },
    ParticipantLeft { id: ParticipantId },
    ParticipantQueueRequest { id: ParticipantId },
    ParticipantDequeueRequest { id: ParticipantId },
    /// `client_reported_time` is advisory; the tracker clock is authoritative
    GoalReached {
        id: ParticipantId,
        client_reported_time: f32,
    },
    WorldReset,

    // === Component feedback ===
    QueueCountChanged { queued: usize },
    ParticipantDeparted {
        id: ParticipantId,
        status: RosterStatus,
    },
    /// Every racer left mid-race
    RaceAbandoned,
    /// A tracked racer crossed the line for the first time. `place` is 1-indexed.
    RacerFinished { id: ParticipantId, place: usize },

    // === Outbound to presentation ===
    RankUpdate {
        id: ParticipantId,
        position: usize,
        total_racers: usize,
        match_time_ms: f32,
    },
    StopRankUpdates { id: ParticipantId },
    RollCallUpdate { text: String },
}

/// Discriminant used for subscription filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MatchStateChanged,
    MatchStartCountdown,
    MatchEndCountdown,
    ParticipantJoined,
    ParticipantLeft,
    ParticipantQueueRequest,
    ParticipantDequeueRequest,
    GoalReached,
    WorldReset,
    QueueCountChanged,
    ParticipantDeparted,
    RaceAbandoned,
    RacerFinished,
    RankUpdate,
    StopRankUpdates,
    RollCallUpdate,
}

impl EventKind {
    /// Events presentation collaborators care about
    pub const PRESENTATION: &'static [EventKind] = &[
        EventKind::MatchStateChanged,
        EventKind::MatchStartCountdown,
        EventKind::MatchEndCountdown,
        EventKind::RankUpdate,
        EventKind::StopRankUpdates,
        EventKind::RollCallUpdate,
    ];
}

impl RaceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RaceEvent::MatchStateChanged { .. } => EventKind::MatchStateChanged,
            RaceEvent::MatchStartCountdown { .. } => EventKind::MatchStartCountdown,
            RaceEvent::MatchEndCountdown { .. } => EventKind::MatchEndCountdown,
            RaceEvent::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            RaceEvent::ParticipantLeft { .. } => EventKind::ParticipantLeft,
            RaceEvent::ParticipantQueueRequest { .. } => EventKind::ParticipantQueueRequest,
            RaceEvent::ParticipantDequeueRequest { .. } => EventKind::ParticipantDequeueRequest,
            RaceEvent::GoalReached { .. } => EventKind::GoalReached,
            RaceEvent::WorldReset => EventKind::WorldReset,
            RaceEvent::QueueCountChanged { .. } => EventKind::QueueCountChanged,
            RaceEvent::ParticipantDeparted { .. } => EventKind::ParticipantDeparted,
            RaceEvent::RaceAbandoned => EventKind::RaceAbandoned,
            RaceEvent::RacerFinished { .. } => EventKind::RacerFinished,
            RaceEvent::RankUpdate { .. } => EventKind::RankUpdate,
            RaceEvent::StopRankUpdates { .. } => EventKind::StopRankUpdates,
            RaceEvent::RollCallUpdate { .. } => EventKind::RollCallUpdate,
        }
    }
}

struct Subscriber {
    id: u64,
    kinds: Vec<EventKind>,
    queue: VecDeque<RaceEvent>,
}

struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    max_pending: usize,
}

/// Cloneable handle to a shared event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                next_id: 1,
                subscribers: Vec::new(),
                max_pending: max_pending.max(1),
            })),
        }
    }

    /// Start receiving events of the given kinds. Released on drop.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            kinds: kinds.to_vec(),
            queue: VecDeque::new(),
        });
        log::trace!("Subscriber {} registered for {:?}", id, kinds);
        Subscription {
            id,
            bus: Rc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching subscriber
    pub fn publish(&self, event: RaceEvent) {
        let mut inner = self.inner.borrow_mut();
        let kind = event.kind();
        let max_pending = inner.max_pending;
        for sub in inner.subscribers.iter_mut().filter(|s| s.kinds.contains(&kind)) {
            if sub.queue.len() >= max_pending {
                log::warn!(
                    "Subscriber {} queue full ({} events), dropping oldest",
                    sub.id,
                    max_pending
                );
                sub.queue.pop_front();
            }
            sub.queue.push_back(event.clone());
        }
    }

    /// Events waiting across all subscribers
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().subscribers.iter().map(|s| s.queue.len()).sum()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// A live registration on an [`EventBus`]
pub struct Subscription {
    id: u64,
    bus: Weak<RefCell<BusInner>>,
}

impl Subscription {
    /// Take the oldest pending event
    pub fn pop(&self) -> Option<RaceEvent> {
        let bus = self.bus.upgrade()?;
        let mut inner = bus.borrow_mut();
        let event = inner
            .subscribers
            .iter_mut()
            .find(|s| s.id == self.id)
            .and_then(|s| s.queue.pop_front());
        event
    }

    /// Take every pending event
    pub fn drain(&self) -> Vec<RaceEvent> {
        let Some(bus) = self.bus.upgrade() else {
            return Vec::new();
        };
        let mut inner = bus.borrow_mut();
        let events = inner
            .subscribers
            .iter_mut()
            .find(|s| s.id == self.id)
            .map(|s| s.queue.drain(..).collect())
            .unwrap_or_default();
        events
    }

    pub fn pending_count(&self) -> usize {
        let Some(bus) = self.bus.upgrade() else {
            return 0;
        };
        let inner = bus.borrow();
        let count = inner
            .subscribers
            .iter()
            .find(|s| s.id == self.id)
            .map_or(0, |s| s.queue.len());
        count
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.borrow_mut().subscribers.retain(|s| s.id != self.id);
            log::trace!("Subscriber {} released", self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
