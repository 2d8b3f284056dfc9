//! Cross-conflux message bus.
//!
//! Any cross-worker side-effect that is not an enqueue-into-VQ travels
//! here: person loading, pedestrian hand-offs, teleportation wake-ups, and
//! incident injection.  Envelopes posted during tick `T` are staged and
//! only become visible to their destination at tick `T+1` — matching the
//! distribution-cycle semantics of the original message bus and keeping
//! delivery independent of worker interleaving.
//!
//! Delayed delivery (wake-ups with a tick offset) uses a sparse
//! `BTreeMap<Tick, Vec<Envelope>>`, drained up to the current tick each
//! time the simulation advances.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;

use meso_core::{ConfluxId, PersonId, StatsId, Tick};

use crate::Person;

// ── EngineMsg ─────────────────────────────────────────────────────────────────

/// A message addressed to a conflux.  Person-carrying kinds move ownership
/// of the person with the envelope.
pub enum EngineMsg {
    /// A dispatched person entering the simulation at their starting
    /// conflux.
    PersonLoad(Box<Person>),

    /// A pedestrian handed across a conflux boundary.
    PedestrianTransfer(Box<Person>),

    /// A rail passenger handed to this conflux for teleportation.
    MrtTeleport(Box<Person>),

    /// Wake a teleported rail passenger parked in the MRT list.
    WakeUp(PersonId),

    /// Wake a teleported car passenger parked in the car-sharing list.
    WakeUpCarPassenger(PersonId),

    /// Override the outflow rate of the named stats.
    InsertIncident {
        stats: Vec<StatsId>,
        flow_veh_s: f64,
    },

    /// Restore the configured outflow rate of the named stats.
    RemoveIncident { stats: Vec<StatsId> },
}

impl EngineMsg {
    /// The person this envelope is about, if any.
    fn person(&self) -> Option<PersonId> {
        match self {
            EngineMsg::PersonLoad(p)
            | EngineMsg::PedestrianTransfer(p)
            | EngineMsg::MrtTeleport(p) => Some(p.id),
            EngineMsg::WakeUp(id) | EngineMsg::WakeUpCarPassenger(id) => Some(*id),
            EngineMsg::InsertIncident { .. } | EngineMsg::RemoveIncident { .. } => None,
        }
    }
}

struct Envelope {
    to: ConfluxId,
    msg: EngineMsg,
}

// ── MessageBus ────────────────────────────────────────────────────────────────

/// Per-conflux inboxes plus staging buffers for future delivery.
pub struct MessageBus {
    /// Messages visible to each conflux this tick.
    inboxes: Vec<Mutex<VecDeque<EngineMsg>>>,
    /// Posted this tick; promoted to inboxes at the next tick boundary.
    pending: Mutex<Vec<Envelope>>,
    /// Scheduled for a future tick.
    delayed: Mutex<BTreeMap<Tick, Vec<Envelope>>>,
}

impl MessageBus {
    pub(crate) fn new(conflux_count: usize) -> Self {
        Self {
            inboxes: (0..conflux_count)
                .map(|_| Mutex::new(VecDeque::new()))
                .collect(),
            pending: Mutex::new(Vec::new()),
            delayed: Mutex::new(BTreeMap::new()),
        }
    }

    /// Post `msg` to `to`, visible at the destination's next update.
    pub fn post(&self, to: ConfluxId, msg: EngineMsg) {
        self.pending.lock().push(Envelope { to, msg });
    }

    /// Post `msg` to `to`, visible once the simulation reaches `due`.
    pub fn post_delayed(&self, to: ConfluxId, msg: EngineMsg, due: Tick) {
        self.delayed
            .lock()
            .entry(due)
            .or_default()
            .push(Envelope { to, msg });
    }

    /// Promote staged and due-delayed envelopes into the inboxes.  Called
    /// once per tick by the simulation driver, before any conflux phase.
    pub(crate) fn deliver_due(&self, now: Tick) {
        let mut due: Vec<Envelope> = self.pending.lock().drain(..).collect();
        {
            let mut delayed = self.delayed.lock();
            let later = delayed.split_off(&Tick(now.0 + 1));
            for (_, mut envelopes) in std::mem::replace(&mut *delayed, later) {
                due.append(&mut envelopes);
            }
        }
        for envelope in due {
            self.inboxes[envelope.to.index()]
                .lock()
                .push_back(envelope.msg);
        }
    }

    /// Take every message addressed to `conflux` this tick.
    pub(crate) fn drain(&self, conflux: ConfluxId) -> Vec<EngineMsg> {
        self.inboxes[conflux.index()].lock().drain(..).collect()
    }

    /// Re-address every pending envelope about `person` to `to` — the
    /// engine's analogue of re-registering a person's message handler when
    /// ownership moves to another conflux.
    pub fn reregister(&self, person: PersonId, to: ConfluxId) {
        let mut pending = self.pending.lock();
        for envelope in pending.iter_mut() {
            if envelope.msg.person() == Some(person) {
                envelope.to = to;
            }
        }
        drop(pending);

        let mut delayed = self.delayed.lock();
        for envelopes in delayed.values_mut() {
            for envelope in envelopes.iter_mut() {
                if envelope.msg.person() == Some(person) {
                    envelope.to = to;
                }
            }
        }
    }

    /// Envelopes scheduled for future ticks (tests and diagnostics).
    pub fn delayed_count(&self) -> usize {
        self.delayed.lock().values().map(Vec::len).sum()
    }

    /// The earliest tick with a scheduled envelope, if any.
    pub fn next_delayed_tick(&self) -> Option<Tick> {
        self.delayed.lock().keys().next().copied()
    }
}
