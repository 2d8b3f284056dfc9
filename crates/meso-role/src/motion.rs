//! Per-person movement context mutated by roles and read by the engine.

use meso_core::{LinkId, StatsId};

// ── LaneSlot ──────────────────────────────────────────────────────────────────

/// Where within a segment stats a person sits.
///
/// `Infinity` is the staging pseudo-lane every freshly entered vehicle
/// lands in before its movement picks a real lane; it is not subject to
/// per-lane capacity.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LaneSlot {
    /// A real lane, indexed from 0.
    Lane(u8),
    /// The staging pseudo-lane.
    Infinity,
}

impl LaneSlot {
    #[inline]
    pub fn is_infinity(self) -> bool {
        matches!(self, LaneSlot::Infinity)
    }

    /// The real-lane index, or `None` for lane-infinity.
    #[inline]
    pub fn real(self) -> Option<u8> {
        match self {
            LaneSlot::Lane(l) => Some(l),
            LaneSlot::Infinity => None,
        }
    }
}

// ── AdmissionGrant ────────────────────────────────────────────────────────────

/// Outcome of the cross-stats admission protocol, written by the engine and
/// consumed by the movement on its next `frame_tick`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum AdmissionGrant {
    /// No pending decision.
    #[default]
    None,
    /// The crossing was granted; the movement steps itself into the
    /// requested stats.
    Granted,
    /// The crossing was denied this tick; queue locally and retry.
    Denied,
}

// ── MotionState ───────────────────────────────────────────────────────────────

/// The movement context of one person.
///
/// Roles mutate this directly during `frame_tick`; the engine snapshots it
/// before and after each update to repair container membership.
#[derive(Debug)]
pub struct MotionState {
    /// The stats the person currently occupies (or was granted into while
    /// awaiting virtual-queue admission).  `None` for off-road roles.
    pub curr_stats: Option<StatsId>,

    /// Lane within `curr_stats`.  `None` while in a virtual queue or off
    /// the road.
    pub curr_lane: Option<LaneSlot>,

    /// Distance from the person's nose to the downstream end of
    /// `curr_stats`, in centimetres.
    pub distance_to_stats_end_cm: f64,

    /// Simulated seconds left in the person's budget for this tick.
    pub remaining_secs: f64,

    /// `true` while the person is counted in the queuing part of its lane.
    pub is_queuing: bool,

    /// Predicted time to the end of the current link, in seconds.  Written
    /// by the engine's merge phase, read by the cross-link ordering.
    pub driving_time_to_link_end_s: f64,

    /// Set by the movement when it arrives at a stats boundary and needs
    /// admission into the named stats.
    pub requested_next_stats: Option<StatsId>,

    /// Admission outcome for the last request.
    pub grant: AdmissionGrant,

    /// Set by a pedestrian movement that must be handed to the conflux
    /// owning this link.
    pub next_link_required: Option<LinkId>,

    /// Set by the movement when the current sub-trip has ended.
    pub to_be_removed: bool,

    /// Set by the engine when the tick budget ran out, telling the role to
    /// rebuild its per-tick parameters on the next tick.
    pub reset_params_required: bool,
}

impl Default for MotionState {
    fn default() -> Self {
        Self {
            curr_stats: None,
            curr_lane: None,
            distance_to_stats_end_cm: 0.0,
            remaining_secs: 0.0,
            is_queuing: false,
            driving_time_to_link_end_s: 0.0,
            requested_next_stats: None,
            grant: AdmissionGrant::None,
            next_link_required: None,
            to_be_removed: false,
            reset_params_required: false,
        }
    }
}

impl MotionState {
    /// `true` if the person occupies a real lane (not lane-infinity, not a
    /// virtual queue).
    #[inline]
    pub fn in_real_lane(&self) -> bool {
        matches!(self.curr_lane, Some(LaneSlot::Lane(_)))
    }
}
