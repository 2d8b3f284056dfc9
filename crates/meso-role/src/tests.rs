//! Unit tests for the reference movements against the engine contracts.

use meso_core::{NodeId, PersonId, StatsId, Tick};

use crate::{
    ActivityMovement, AdmissionGrant, CruiseMovement, IdleMovement, LaneSlot, MotionState,
    MoveCtx, Movement, StatsAccess, VehicleResource,
};

// ── Test stats view ───────────────────────────────────────────────────────────

/// Every stats is `length_cm` long with `lanes` empty lanes.
struct FixedStats {
    length_cm: f64,
    lanes: u8,
}

impl StatsAccess for FixedStats {
    fn length_cm(&self, _stats: StatsId) -> f64 {
        self.length_cm
    }
    fn lane_count(&self, _stats: StatsId) -> u8 {
        self.lanes
    }
    fn seg_speed_cm_s(&self, _stats: StatsId) -> f64 {
        1_000.0
    }
    fn persons_in_lane(&self, _stats: StatsId, _lane: u8) -> usize {
        0
    }
    fn last_updated_tail_cm(&self, _stats: StatsId, _lane: u8) -> Option<f64> {
        None
    }
}

fn ctx<'a>(
    state: &'a mut MotionState,
    vehicle: &'a mut Option<VehicleResource>,
    stats: &'a dyn StatsAccess,
    tick_seconds: f64,
) -> MoveCtx<'a> {
    MoveCtx {
        now: Tick(0),
        now_ms: 0,
        tick_seconds,
        person: PersonId(0),
        state,
        vehicle,
        stats,
    }
}

// ── CruiseMovement ────────────────────────────────────────────────────────────

#[test]
fn cruise_init_stages_in_lane_infinity() {
    let stats = FixedStats {
        length_cm: 100_000.0,
        lanes: 1,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![StatsId(0), StatsId(1)], 1_000.0);

    assert!(m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 1.0)));
    assert_eq!(state.curr_stats, Some(StatsId(0)));
    assert_eq!(state.curr_lane, Some(LaneSlot::Infinity));
    assert_eq!(state.distance_to_stats_end_cm, 100_000.0);
}

#[test]
fn cruise_init_fails_on_empty_path() {
    let stats = FixedStats {
        length_cm: 100_000.0,
        lanes: 1,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![], 1_000.0);
    assert!(!m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 1.0)));
}

#[test]
fn cruise_spends_budget_mid_stats() {
    // 1 km at 10 m/s with a 1 s tick: 10 m travelled, 990 m to go.
    let stats = FixedStats {
        length_cm: 100_000.0,
        lanes: 1,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![StatsId(0)], 1_000.0);
    m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 1.0));

    state.remaining_secs = 1.0;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 1.0));

    assert_eq!(state.remaining_secs, 0.0);
    assert_eq!(state.distance_to_stats_end_cm, 99_000.0);
    assert_eq!(state.curr_lane, Some(LaneSlot::Lane(0)), "left lane-infinity");
    assert!(state.requested_next_stats.is_none());
}

#[test]
fn cruise_requests_admission_at_boundary_with_time_left() {
    // 100 m at 100 m/s with a 5 s tick: boundary reached after 1 s.
    let stats = FixedStats {
        length_cm: 10_000.0,
        lanes: 1,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![StatsId(0), StatsId(1)], 10_000.0);
    m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    state.remaining_secs = 5.0;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    assert_eq!(state.requested_next_stats, Some(StatsId(1)));
    assert!((state.remaining_secs - 4.0).abs() < 1e-9);
    assert!(!state.to_be_removed);
}

#[test]
fn cruise_marks_removed_at_path_end() {
    let stats = FixedStats {
        length_cm: 10_000.0,
        lanes: 1,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![StatsId(0)], 10_000.0);
    m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    state.remaining_secs = 5.0;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));
    assert!(state.to_be_removed);
}

#[test]
fn cruise_steps_into_granted_stats() {
    let stats = FixedStats {
        length_cm: 10_000.0,
        lanes: 2,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![StatsId(0), StatsId(1)], 10_000.0);
    m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    state.remaining_secs = 5.0;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));
    assert_eq!(state.requested_next_stats, Some(StatsId(1)));

    // The engine grants and clears the request; the movement steps itself in.
    state.requested_next_stats = None;
    state.grant = AdmissionGrant::Granted;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    assert_eq!(state.curr_stats, Some(StatsId(1)));
    assert!(state.in_real_lane());
    assert_eq!(state.grant, AdmissionGrant::None);
    assert!(state.remaining_secs < 5.0, "entry consumed travel time");
}

#[test]
fn cruise_queues_on_denial_and_retries() {
    let stats = FixedStats {
        length_cm: 10_000.0,
        lanes: 1,
    };
    let mut state = MotionState::default();
    let mut vehicle = Some(VehicleResource::car());
    let mut m = CruiseMovement::new(vec![StatsId(0), StatsId(1)], 10_000.0);
    m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    state.remaining_secs = 5.0;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    state.requested_next_stats = None;
    state.grant = AdmissionGrant::Denied;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));

    assert!(state.is_queuing);
    assert_eq!(state.remaining_secs, 0.0);
    assert_eq!(state.curr_stats, Some(StatsId(0)), "still upstream");

    // Next tick: the boundary request is raised again.
    state.remaining_secs = 5.0;
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));
    assert_eq!(state.requested_next_stats, Some(StatsId(1)));
}

// ── ActivityMovement ──────────────────────────────────────────────────────────

#[test]
fn activity_waits_until_end_time() {
    let stats = FixedStats {
        length_cm: 0.0,
        lanes: 0,
    };
    let mut state = MotionState::default();
    let mut vehicle = None;
    let mut m = ActivityMovement::new(NodeId(3), 1_000, 11_000);

    let mut c = ctx(&mut state, &mut vehicle, &stats, 5.0);
    c.now_ms = 6_000;
    m.frame_tick(&mut c);
    assert!(!state.to_be_removed);
    assert_eq!(state.remaining_secs, 0.0);

    let mut c = ctx(&mut state, &mut vehicle, &stats, 5.0);
    c.now_ms = 11_000;
    m.frame_tick(&mut c);
    assert!(state.to_be_removed);
}

// ── IdleMovement ──────────────────────────────────────────────────────────────

#[test]
fn idle_consumes_budget() {
    let stats = FixedStats {
        length_cm: 0.0,
        lanes: 0,
    };
    let mut state = MotionState {
        remaining_secs: 5.0,
        ..MotionState::default()
    };
    let mut vehicle = None;
    let mut m = IdleMovement;
    assert!(m.frame_init(&mut ctx(&mut state, &mut vehicle, &stats, 5.0)));
    m.frame_tick(&mut ctx(&mut state, &mut vehicle, &stats, 5.0));
    assert_eq!(state.remaining_secs, 0.0);
}
