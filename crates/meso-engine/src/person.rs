//! The person record and the before/after snapshot housekeeping runs on.

use meso_core::{ConfluxId, PersonId, RoleKind, StatsId};
use meso_role::{LaneSlot, MotionState, Role};
use meso_trip::TripChain;

use crate::StatsDirectory;

// ── Person ────────────────────────────────────────────────────────────────────

/// One traveller.
///
/// A person is owned by exactly one conflux container at any instant: the
/// conflux's person map (with membership in a lane deque, lane-infinity, or
/// a role list), a virtual queue, a message envelope, or the loading queue.
/// Ownership transfer across confluxes is a move of this value.
pub struct Person {
    pub id: PersonId,

    /// Current role, `None` for a freshly spawned person whose chain has
    /// not been dispatched yet.
    pub role: Option<Role>,

    /// The daily trip chain being executed.
    pub chain: TripChain,

    /// Movement context mutated by the role each tick.
    pub motion: MotionState,

    /// Frame number of the last tick this person was updated; `-1` before
    /// the first update.
    pub last_updated_frame: i64,

    /// `true` once the current role's `frame_init` has run.
    pub initialized: bool,

    /// Millisecond timestamp at which the current trip-chain item started.
    pub start_time_ms: u64,
}

impl Person {
    pub fn new(id: PersonId, chain: TripChain) -> Self {
        Self {
            id,
            role: None,
            chain,
            motion: MotionState::default(),
            last_updated_frame: -1,
            initialized: false,
            start_time_ms: 0,
        }
    }

    /// The current role kind, if a role is assigned.
    #[inline]
    pub fn role_kind(&self) -> Option<RoleKind> {
        self.role.as_ref().map(|r| r.kind)
    }

    /// Vehicle length for capacity accounting; 0 without a vehicle.
    #[inline]
    pub fn vehicle_length_cm(&self) -> f64 {
        self.role.as_ref().map_or(0.0, |r| r.vehicle_length_cm())
    }

    /// `false` only while the role's vehicle is off the carriageway.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.role.as_ref().map_or(true, |r| r.is_moving())
    }
}

impl std::fmt::Debug for Person {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Person")
            .field("id", &self.id)
            .field("role", &self.role_kind())
            .field("motion", &self.motion)
            .field("last_updated_frame", &self.last_updated_frame)
            .finish_non_exhaustive()
    }
}

// ── PersonSnapshot ────────────────────────────────────────────────────────────

/// Everything housekeeping needs to know about a person's placement, frozen
/// before and after the role tick.
#[derive(Clone, Debug)]
pub struct PersonSnapshot {
    pub role_kind: Option<RoleKind>,
    pub is_moving: bool,
    pub is_queuing: bool,
    pub vehicle_length_cm: f64,
    pub stats: Option<StatsId>,
    pub lane: Option<LaneSlot>,
    /// The conflux owning `stats`, or the updating conflux for off-road
    /// persons.
    pub conflux: ConfluxId,
}

impl PersonSnapshot {
    pub fn capture(person: &Person, directory: &StatsDirectory, updating: ConfluxId) -> Self {
        let stats = person.motion.curr_stats;
        let conflux = stats
            .and_then(|s| directory.conflux_of(s))
            .unwrap_or(updating);
        Self {
            role_kind: person.role_kind(),
            is_moving: person.is_moving(),
            is_queuing: person.motion.is_queuing,
            vehicle_length_cm: person.vehicle_length_cm(),
            stats,
            lane: person.motion.curr_lane,
            conflux,
        }
    }
}
