//! Reference movement implementations.
//!
//! These are deliberately simple — no car-following, no gap acceptance —
//! but they honour every engine contract (time budget, boundary requests,
//! grant consumption, queuing on denial), which makes them the workhorses
//! of the engine's tests and demos.  Production deployments replace them
//! through [`RoleFactory`](crate::RoleFactory).

use meso_core::StatsId;

use crate::{AdmissionGrant, LaneSlot, MoveCtx, Movement};

/// Distances below this are treated as "at the boundary".
const DIST_EPS_CM: f64 = 1e-6;

// ── IdleMovement ──────────────────────────────────────────────────────────────

/// A movement that does nothing: initialises successfully and spends the
/// whole budget standing still.  Used for roles the engine parks in
/// off-road lists (waiting, teleported passengers) whose progress is driven
/// by messages rather than ticks.
#[derive(Default)]
pub struct IdleMovement;

impl Movement for IdleMovement {
    fn frame_init(&mut self, _ctx: &mut MoveCtx<'_>) -> bool {
        true
    }

    fn frame_tick(&mut self, ctx: &mut MoveCtx<'_>) {
        ctx.state.remaining_secs = 0.0;
    }
}

// ── ActivityMovement ──────────────────────────────────────────────────────────

/// Performs an activity: waits at a node until the anchored end time.
pub struct ActivityMovement {
    location: meso_core::NodeId,
    start_ms: u64,
    end_ms: u64,
}

impl ActivityMovement {
    pub fn new(location: meso_core::NodeId, start_ms: u64, end_ms: u64) -> Self {
        Self {
            location,
            start_ms,
            end_ms,
        }
    }

    pub fn location(&self) -> meso_core::NodeId {
        self.location
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.end_ms
    }
}

impl Movement for ActivityMovement {
    fn frame_init(&mut self, _ctx: &mut MoveCtx<'_>) -> bool {
        true
    }

    fn frame_tick(&mut self, ctx: &mut MoveCtx<'_>) {
        if ctx.now_ms >= self.end_ms {
            ctx.state.to_be_removed = true;
        } else {
            ctx.state.remaining_secs = 0.0;
        }
    }
}

// ── CruiseMovement ────────────────────────────────────────────────────────────

/// A constant-speed on-road movement following a precomputed stats path.
///
/// Per tick it advances `speed × remaining_secs` centimetres, requests
/// admission at every stats boundary, queues when denied, and marks the
/// sub-trip complete when the path is exhausted.  Lane choice is
/// least-occupied-real-lane.
pub struct CruiseMovement {
    path: Vec<StatsId>,
    cursor: usize,
    speed_cm_s: f64,
    /// The stats we asked admission for; consumed when the grant lands.
    pending_entry: Option<StatsId>,
}

impl CruiseMovement {
    /// `path` is the ordered stats sequence of the whole sub-trip,
    /// upstream-first; `speed_cm_s` is the cruise speed.
    pub fn new(path: Vec<StatsId>, speed_cm_s: f64) -> Self {
        Self {
            path,
            cursor: 0,
            speed_cm_s,
            pending_entry: None,
        }
    }

    /// The stats the movement is currently traversing, per its own cursor.
    pub fn current_path_stats(&self) -> Option<StatsId> {
        self.path.get(self.cursor).copied()
    }

    /// Pick the least-occupied real lane of `stats`.
    fn choose_lane(view: &dyn crate::StatsAccess, stats: StatsId) -> u8 {
        let lanes = view.lane_count(stats);
        (0..lanes)
            .min_by_key(|&l| view.persons_in_lane(stats, l))
            .unwrap_or(0)
    }

    /// The next stats on the path, if any.
    fn next_on_path(&self) -> Option<StatsId> {
        self.path.get(self.cursor + 1).copied()
    }

    /// Raise a boundary request, or finish the sub-trip at path end.
    fn request_or_finish(&mut self, ctx: &mut MoveCtx<'_>) {
        match self.next_on_path() {
            Some(next) => {
                ctx.state.requested_next_stats = Some(next);
                self.pending_entry = Some(next);
            }
            None => ctx.state.to_be_removed = true,
        }
    }
}

impl Movement for CruiseMovement {
    fn frame_init(&mut self, ctx: &mut MoveCtx<'_>) -> bool {
        let Some(&first) = self.path.first() else {
            return false;
        };
        self.cursor = 0;
        self.pending_entry = None;
        ctx.state.curr_stats = Some(first);
        ctx.state.curr_lane = Some(LaneSlot::Infinity);
        ctx.state.distance_to_stats_end_cm = ctx.stats.length_cm(first);
        ctx.state.is_queuing = false;
        true
    }

    fn frame_tick(&mut self, ctx: &mut MoveCtx<'_>) {
        let state = &mut *ctx.state;

        // Consume the admission outcome from the previous boundary request.
        match state.grant {
            AdmissionGrant::Granted => {
                state.grant = AdmissionGrant::None;
                if let Some(next) = self.pending_entry.take() {
                    self.cursor += 1;
                    state.curr_stats = Some(next);
                    state.curr_lane = None;
                    state.distance_to_stats_end_cm = ctx.stats.length_cm(next);
                    state.is_queuing = false;
                }
            }
            AdmissionGrant::Denied => {
                state.grant = AdmissionGrant::None;
                self.pending_entry = None;
                state.is_queuing = true;
                state.remaining_secs = 0.0;
                return;
            }
            AdmissionGrant::None => {}
        }

        let Some(stats) = state.curr_stats else {
            // Off the road with no stats: nothing a cruise can do.
            state.remaining_secs = 0.0;
            return;
        };

        // Leave the staging lane (or the VQ) for a real lane.
        if !state.in_real_lane() {
            state.curr_lane = Some(LaneSlot::Lane(Self::choose_lane(ctx.stats, stats)));
        }

        // Already at the boundary from a previous tick: re-raise the request.
        if state.distance_to_stats_end_cm <= DIST_EPS_CM {
            self.request_or_finish(ctx);
            return;
        }

        let reachable = self.speed_cm_s * state.remaining_secs;
        if reachable < state.distance_to_stats_end_cm {
            state.distance_to_stats_end_cm -= reachable;
            state.remaining_secs = 0.0;
        } else {
            state.remaining_secs -= state.distance_to_stats_end_cm / self.speed_cm_s;
            state.distance_to_stats_end_cm = 0.0;
            self.request_or_finish(ctx);
        }
    }

    fn starting_stats(&self) -> Option<StatsId> {
        self.path.first().copied()
    }
}
