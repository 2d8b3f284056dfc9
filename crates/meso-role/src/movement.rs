//! The `Movement` trait and the context the engine hands to it.

use meso_core::{PersonId, StatsId, Tick};

use crate::{MotionState, VehicleResource};

// ── StatsAccess ───────────────────────────────────────────────────────────────

/// Read-only view of segment-stats state, implemented by the engine.
///
/// Movements use this for headway and lane-choice decisions.  For stats
/// owned by a *different* conflux than the person's current owner, only the
/// static quantities (`length_cm`, `lane_count`) are meaningful; dynamic
/// ones fall back to free-flow values.
pub trait StatsAccess {
    /// Length of the stats slice in centimetres.
    fn length_cm(&self, stats: StatsId) -> f64;

    /// Number of real lanes (excluding lane-infinity).
    fn lane_count(&self, stats: StatsId) -> u8;

    /// Current space-mean speed on the stats, cm/s, clamped away from zero.
    fn seg_speed_cm_s(&self, stats: StatsId) -> f64;

    /// Persons currently in `lane` of `stats`.
    fn persons_in_lane(&self, stats: StatsId, lane: u8) -> usize;

    /// Trailing edge (distance from the stats end, cm) of the most recently
    /// updated vehicle in `lane` this tick, or `None` if no vehicle ahead
    /// has been updated yet.
    fn last_updated_tail_cm(&self, stats: StatsId, lane: u8) -> Option<f64>;
}

// ── MoveCtx ───────────────────────────────────────────────────────────────────

/// Everything a movement may touch during one `frame_init`/`frame_tick`.
pub struct MoveCtx<'a> {
    /// The tick being simulated.
    pub now: Tick,
    /// Millisecond timestamp of the start of `now`.
    pub now_ms: u64,
    /// Full tick budget in seconds.
    pub tick_seconds: f64,
    /// The person being moved.
    pub person: PersonId,
    /// The person's movement context (mutated in place).
    pub state: &'a mut MotionState,
    /// The person's vehicle, if any.  Movements that service stops flip
    /// `is_moving` here.
    pub vehicle: &'a mut Option<VehicleResource>,
    /// Read-only stats state for headway and lane choice.
    pub stats: &'a dyn StatsAccess,
}

// ── Movement ──────────────────────────────────────────────────────────────────

/// The minimal movement interface the engine drives.
///
/// # Admission-grant contract
///
/// When `frame_tick` exits with `state.requested_next_stats` set, the engine
/// runs the admission protocol and writes the outcome into `state.grant`:
///
/// - **Granted, downstream already updated this tick**: the request is
///   cleared and the engine *continues the per-tick loop without touching
///   `curr_stats`*.  The movement must step itself into the stats it
///   requested on the next `frame_tick` call.
/// - **Granted, downstream not yet updated**: the engine reassigns
///   `curr_stats` to the requested stats, clears `curr_lane`, and parks the
///   person on the downstream virtual queue; the movement's next
///   `frame_tick` happens during that conflux's VQ flush and must complete
///   the entry (pick a lane, reset distance).
/// - **Denied**: the request is cleared; the movement is expected to queue
///   locally and retry on a later tick.
pub trait Movement: Send {
    /// Initialise for the current trip-chain item.  Returns `false` if no
    /// viable path exists; the engine then removes the person without
    /// entering any container.
    fn frame_init(&mut self, ctx: &mut MoveCtx<'_>) -> bool;

    /// Advance the person, consuming some of `state.remaining_secs`.
    fn frame_tick(&mut self, ctx: &mut MoveCtx<'_>);

    /// Emit any per-tick output for this person.  Default: nothing.
    fn frame_tick_output(&mut self, _ctx: &MoveCtx<'_>) {}

    /// Where a freshly initialised person enters the network.  Drives
    /// starting-conflux resolution during dispatch; `None` for off-road
    /// roles.
    fn starting_stats(&self) -> Option<StatsId> {
        None
    }
}
