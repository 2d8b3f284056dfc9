//! The shared face of a conflux: virtual queues, admission bounds, and the
//! last-updated frame.
//!
//! Everything in this module may be touched by *remote* workers mid-tick —
//! an upstream conflux probing `has_space_in_virtual_queue`, pushing a
//! granted person, or depositing an arrival — so it lives behind one
//! `parking_lot::Mutex` plus an atomic frame number.  The owning worker
//! takes the same lock for its per-tick bound reset and VQ flush.
//!
//! The lock is never held across a person update: the flush drains a whole
//! queue under the lock, releases it, and processes the drained persons, so
//! re-enqueues (admission denials) relock without reentrancy.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use meso_core::{ConfluxId, LinkId};

use crate::{EngineError, EngineResult, Person};

// ── VqState ───────────────────────────────────────────────────────────────────

/// Mutex-protected part of a conflux boundary.
pub struct VqState {
    /// Admission buffer per inbound link, holding persons by value.
    queues: HashMap<LinkId, VecDeque<Person>>,
    /// Per-link admission budget for the current tick.
    bounds: HashMap<LinkId, u32>,
    /// Persons granted straight into this conflux's stats by a remote
    /// worker after this conflux finished its main pass; integrated by the
    /// owner at its next phase boundary.
    arrivals: Vec<Person>,
}

impl VqState {
    /// Replace this tick's admission bound for `link`.
    pub fn set_bound(&mut self, link: LinkId, bound: u32) {
        self.bounds.insert(link, bound);
    }

    pub fn bound(&self, link: LinkId) -> Option<u32> {
        self.bounds.get(&link).copied()
    }

    pub fn queue_len(&self, link: LinkId) -> usize {
        self.queues.get(&link).map_or(0, |q| q.len())
    }

    /// Links with a virtual queue, in no particular order.
    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.queues.keys().copied()
    }

    /// Drain the whole queue of `link`, sorted by decreasing remaining
    /// time so persons with the most budget left move first.
    pub fn drain_sorted(&mut self, link: LinkId) -> Vec<Person> {
        let Some(queue) = self.queues.get_mut(&link) else {
            return Vec::new();
        };
        let mut drained: Vec<Person> = queue.drain(..).collect();
        drained.sort_by(|a, b| {
            b.motion
                .remaining_secs
                .partial_cmp(&a.motion.remaining_secs)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        drained
    }

    /// Mutable access to every person parked in a queue (remaining-time
    /// reset at tick start).
    pub fn persons_mut(&mut self) -> impl Iterator<Item = &mut Person> {
        self.queues.values_mut().flat_map(|q| q.iter_mut())
    }

    pub fn take_arrivals(&mut self) -> Vec<Person> {
        std::mem::take(&mut self.arrivals)
    }

    pub fn total_queued(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }
}

// ── ConfluxBoundary ───────────────────────────────────────────────────────────

/// The cross-worker face of one conflux.
pub struct ConfluxBoundary {
    conflux: ConfluxId,
    vq: Mutex<VqState>,
    /// Frame of the last completed main pass; `-1` before the first tick.
    last_updated: AtomicI64,
}

impl ConfluxBoundary {
    pub(crate) fn new(conflux: ConfluxId, inbound_links: &[LinkId]) -> Self {
        let queues = inbound_links
            .iter()
            .map(|&l| (l, VecDeque::new()))
            .collect();
        Self {
            conflux,
            vq: Mutex::new(VqState {
                queues,
                bounds: HashMap::new(),
                arrivals: Vec::new(),
            }),
            last_updated: AtomicI64::new(-1),
        }
    }

    #[inline]
    pub fn conflux(&self) -> ConfluxId {
        self.conflux
    }

    /// Frame of the conflux's last completed main pass (`-1` = never).
    #[inline]
    pub fn last_updated_frame(&self) -> i64 {
        self.last_updated.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_updated_frame(&self, frame: i64) {
        self.last_updated.store(frame, Ordering::Release);
    }

    /// Lock the queue state.  Owner-side phases use this directly.
    pub(crate) fn lock(&self) -> MutexGuard<'_, VqState> {
        self.vq.lock()
    }

    /// `true` iff `vq_bounds[link] > |VQ[link]|` — the queue can take one
    /// more person this tick.
    ///
    /// # Errors
    /// [`EngineError::UnknownVqLink`] if `link` is not an inbound link of
    /// this conflux (network graph inconsistency).
    pub fn has_space_in_virtual_queue(&self, link: LinkId) -> EngineResult<bool> {
        let state = self.vq.lock();
        let Some(queue) = state.queues.get(&link) else {
            return Err(EngineError::UnknownVqLink {
                link,
                conflux: self.conflux,
            });
        };
        let bound = state.bounds.get(&link).copied().unwrap_or(0);
        Ok(bound as usize > queue.len())
    }

    /// Park `person` on the admission buffer of `link`.
    ///
    /// # Errors
    /// [`EngineError::UnknownVqLink`] if `link` has no queue here.
    pub fn push_back_onto_virtual_queue(&self, link: LinkId, person: Person) -> EngineResult<()> {
        let mut state = self.vq.lock();
        match state.queues.get_mut(&link) {
            Some(queue) => {
                queue.push_back(person);
                Ok(())
            }
            None => Err(EngineError::UnknownVqLink {
                link,
                conflux: self.conflux,
            }),
        }
    }

    /// Deposit a person a remote worker moved into this conflux's stats
    /// after its main pass; the owner integrates it at its next phase.
    pub(crate) fn push_arrival(&self, person: Person) {
        self.vq.lock().arrivals.push(person);
    }

    /// Persons currently parked across all queues of this boundary.
    pub fn total_queued(&self) -> usize {
        self.vq.lock().total_queued()
    }

    /// Queue length of one link's buffer.
    pub fn queue_len(&self, link: LinkId) -> usize {
        self.vq.lock().queue_len(link)
    }

    /// This tick's admission bound for `link` (0 if not yet computed).
    pub fn bound(&self, link: LinkId) -> u32 {
        self.vq.lock().bound(link).unwrap_or(0)
    }
}
