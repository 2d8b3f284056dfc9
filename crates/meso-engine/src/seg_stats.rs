//! Per-segment, per-lane occupancy and flow bookkeeping.
//!
//! One `SegmentStats` covers one slice of a road segment (segments may be
//! split into several stats).  Each real lane keeps an ordered deque of the
//! persons on it — **head of the deque is the person closest to the
//! downstream end** — plus separate queuing/moving counts.  A distinguished
//! *lane-infinity* deque stages persons that just entered the stats before
//! their movement picks a real lane; lane-infinity is not subject to
//! per-lane capacity.
//!
//! Per-lane `LaneParams` carry the saturation outflow and the per-tick
//! output counter the admission protocol decrements on every granted
//! crossing.  The counter is recomputed each tick from the flow rate with a
//! fractional carry, so a rate of 0.3 veh/s at 5 s ticks admits 1 vehicle
//! on most ticks and 2 on every other.

use std::collections::VecDeque;

use meso_core::{LinkId, PersonId, SegmentId, StatsId, PASSENGER_CAR_UNIT_CM};
use meso_role::LaneSlot;

use crate::{EngineError, EngineResult};

/// Speeds below this (cm/s) are clamped when dividing by speed.
pub(crate) const MIN_SPEED_CM_S: f64 = 1e-6;

// ── LaneParams ────────────────────────────────────────────────────────────────

/// Per-lane flow-rate parameters and the admission budget for the tick.
#[derive(Clone, Debug)]
pub struct LaneParams {
    output_flow_veh_s: f64,
    origin_flow_veh_s: f64,
    output_counter: u32,
    fraction: f64,
}

impl LaneParams {
    fn new(output_flow_veh_s: f64) -> Self {
        Self {
            output_flow_veh_s,
            origin_flow_veh_s: output_flow_veh_s,
            output_counter: 0,
            fraction: 0.0,
        }
    }

    /// Crossings still admissible from this lane this tick.
    #[inline]
    pub fn output_counter(&self) -> u32 {
        self.output_counter
    }

    /// Consume one admission.  Callers check `output_counter() > 0` first;
    /// the counter never goes below zero.
    #[inline]
    pub fn decrement_output_counter(&mut self) {
        debug_assert!(self.output_counter > 0, "output counter underflow");
        self.output_counter = self.output_counter.saturating_sub(1);
    }

    /// Refresh the counter for a new tick, carrying the fractional part so
    /// long-run admissions match `rate * tick_seconds` exactly.
    fn update_output_counter(&mut self, tick_seconds: f64) {
        let raw = self.output_flow_veh_s * tick_seconds + self.fraction;
        let whole = raw.floor();
        self.output_counter = whole as u32;
        self.fraction = raw - whole;
    }

    /// Override the outflow rate (incident insertion).
    fn set_flow_rate(&mut self, veh_s: f64) {
        self.output_flow_veh_s = veh_s;
    }

    /// Restore the outflow rate configured at network load.
    fn restore_flow_rate(&mut self) {
        self.output_flow_veh_s = self.origin_flow_veh_s;
    }

    #[inline]
    pub fn output_flow_veh_s(&self) -> f64 {
        self.output_flow_veh_s
    }
}

// ── Lane ──────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Lane {
    /// Persons on the lane, closest-to-downstream-end first.
    persons: VecDeque<PersonId>,
    queuing: usize,
    moving: usize,
    /// Distance-from-end of the trailing edge of the most recently updated
    /// vehicle this tick; headroom bound for the next person in the lane.
    last_updated_tail_cm: Option<f64>,
    params: LaneParams,
}

impl Lane {
    fn new(output_flow_veh_s: f64) -> Self {
        Self {
            persons: VecDeque::new(),
            queuing: 0,
            moving: 0,
            last_updated_tail_cm: None,
            params: LaneParams::new(output_flow_veh_s),
        }
    }
}

// ── SegmentStats ──────────────────────────────────────────────────────────────

/// Dynamic state of one stats slice.  Owned and mutated exclusively by its
/// conflux's worker.
pub struct SegmentStats {
    id: StatsId,
    segment: SegmentId,
    link: LinkId,
    stats_number: u16,
    length_cm: f64,
    free_speed_cm_s: f64,
    lanes: Vec<Lane>,
    lane_infinity: VecDeque<PersonId>,
    /// Total vehicle length currently on real lanes, for the speed-density
    /// relation.
    occupied_cm: f64,
    /// Cumulative vehicles that exited this stats (supply reporting).
    flow_count: u32,
}

impl SegmentStats {
    pub(crate) fn new(
        id: StatsId,
        segment: SegmentId,
        link: LinkId,
        stats_number: u16,
        length_cm: f64,
        lanes: u8,
        free_speed_cm_s: f64,
        output_flow_veh_s: f64,
    ) -> Self {
        Self {
            id,
            segment,
            link,
            stats_number,
            length_cm,
            free_speed_cm_s,
            lanes: (0..lanes).map(|_| Lane::new(output_flow_veh_s)).collect(),
            lane_infinity: VecDeque::new(),
            occupied_cm: 0.0,
            flow_count: 0,
        }
    }

    // ── Identity and static facts ─────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> StatsId {
        self.id
    }

    #[inline]
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    #[inline]
    pub fn link(&self) -> LinkId {
        self.link
    }

    #[inline]
    pub fn stats_number(&self) -> u16 {
        self.stats_number
    }

    #[inline]
    pub fn length_cm(&self) -> f64 {
        self.length_cm
    }

    #[inline]
    pub fn lane_count(&self) -> u8 {
        self.lanes.len() as u8
    }

    /// Holding capacity in passenger-car units across all real lanes.
    #[inline]
    pub fn capacity_pcu(&self) -> f64 {
        (self.length_cm / PASSENGER_CAR_UNIT_CM).ceil() * self.lanes.len() as f64
    }

    // ── Membership ────────────────────────────────────────────────────────

    /// Append `person` to `slot`.  New arrivals join the upstream end of a
    /// lane, so insertion order preserves the distance ordering invariant.
    pub fn add_person(
        &mut self,
        slot: LaneSlot,
        person: PersonId,
        is_queuing: bool,
        vehicle_length_cm: f64,
    ) {
        match slot {
            LaneSlot::Infinity => self.lane_infinity.push_back(person),
            LaneSlot::Lane(l) => {
                let lane = &mut self.lanes[l as usize];
                lane.persons.push_back(person);
                if is_queuing {
                    lane.queuing += 1;
                } else {
                    lane.moving += 1;
                }
                self.occupied_cm += vehicle_length_cm;
            }
        }
    }

    /// Remove `person` from `slot`, erroring if absent.
    ///
    /// The common case pops the head (the person closest to the downstream
    /// end leaves first); out-of-order removal scans the deque.
    pub fn dequeue(
        &mut self,
        person: PersonId,
        slot: LaneSlot,
        was_queuing: bool,
        vehicle_length_cm: f64,
        conflux: meso_core::ConfluxId,
    ) -> EngineResult<()> {
        if self.remove_person(person, slot, was_queuing, vehicle_length_cm) {
            Ok(())
        } else {
            Err(EngineError::RemoveMissingPerson {
                person,
                conflux,
                stats: self.id,
            })
        }
    }

    /// Remove `person` from `slot`; returns `false` if the person is not
    /// there.  Tolerated absence is the caller's policy (bus drivers already
    /// pulled out at a stop).
    pub fn remove_person(
        &mut self,
        person: PersonId,
        slot: LaneSlot,
        was_queuing: bool,
        vehicle_length_cm: f64,
    ) -> bool {
        match slot {
            LaneSlot::Infinity => {
                let Some(pos) = self.lane_infinity.iter().position(|&p| p == person) else {
                    return false;
                };
                self.lane_infinity.remove(pos);
                true
            }
            LaneSlot::Lane(l) => {
                let lane = &mut self.lanes[l as usize];
                let Some(pos) = lane.persons.iter().position(|&p| p == person) else {
                    return false;
                };
                lane.persons.remove(pos);
                if was_queuing {
                    lane.queuing = lane.queuing.saturating_sub(1);
                } else {
                    lane.moving = lane.moving.saturating_sub(1);
                }
                self.occupied_cm = (self.occupied_cm - vehicle_length_cm).max(0.0);
                true
            }
        }
    }

    /// Move `person` between the moving and queuing bookkeeping of its lane
    /// after its `is_queuing` flag flipped.
    pub fn update_queue_status(&mut self, slot: LaneSlot, now_queuing: bool) {
        if let LaneSlot::Lane(l) = slot {
            let lane = &mut self.lanes[l as usize];
            if now_queuing {
                lane.moving = lane.moving.saturating_sub(1);
                lane.queuing += 1;
            } else {
                lane.queuing = lane.queuing.saturating_sub(1);
                lane.moving += 1;
            }
        }
    }

    // ── Occupancy queries ─────────────────────────────────────────────────

    /// Persons in `slot`.
    pub fn num_in_lane(&self, slot: LaneSlot) -> usize {
        match slot {
            LaneSlot::Infinity => self.lane_infinity.len(),
            LaneSlot::Lane(l) => self.lanes[l as usize].persons.len(),
        }
    }

    /// Persons staged in lane-infinity.
    #[inline]
    pub fn num_in_lane_infinity(&self) -> usize {
        self.lane_infinity.len()
    }

    /// Total persons on this stats (real lanes plus lane-infinity).
    pub fn num_persons(&self) -> usize {
        self.lanes.iter().map(|l| l.persons.len()).sum::<usize>() + self.lane_infinity.len()
    }

    /// Moving persons across real lanes.
    pub fn num_moving(&self) -> usize {
        self.lanes.iter().map(|l| l.moving).sum()
    }

    /// Queuing persons across real lanes.
    pub fn num_queuing(&self) -> usize {
        self.lanes.iter().map(|l| l.queuing).sum()
    }

    /// Iterator over all persons on this stats, lane order then
    /// lane-infinity, downstream-first within each lane.
    pub fn person_ids(&self) -> impl Iterator<Item = PersonId> + '_ {
        self.lanes
            .iter()
            .flat_map(|l| l.persons.iter().copied())
            .chain(self.lane_infinity.iter().copied())
    }

    /// Iterator over the persons staged in lane-infinity, arrival order.
    pub fn lane_infinity_ids(&self) -> impl Iterator<Item = PersonId> + '_ {
        self.lane_infinity.iter().copied()
    }

    // ── Lane params ───────────────────────────────────────────────────────

    #[inline]
    pub fn lane_params(&self, lane: u8) -> &LaneParams {
        &self.lanes[lane as usize].params
    }

    #[inline]
    pub fn lane_params_mut(&mut self, lane: u8) -> &mut LaneParams {
        &mut self.lanes[lane as usize].params
    }

    /// Refresh every lane's output counter for a new tick.
    pub fn update_lane_params(&mut self, tick_seconds: f64) {
        for lane in &mut self.lanes {
            lane.params.update_output_counter(tick_seconds);
        }
    }

    /// Expected total outflow this tick at the configured rates, in
    /// vehicles.
    pub fn compute_expected_output_per_tick(&self, tick_seconds: f64) -> f64 {
        self.lanes
            .iter()
            .map(|l| l.params.output_flow_veh_s * tick_seconds)
            .sum()
    }

    /// Override every lane's outflow rate (incident insertion).
    pub fn override_flow_rate(&mut self, veh_s: f64) {
        for lane in &mut self.lanes {
            lane.params.set_flow_rate(veh_s);
        }
    }

    /// Restore every lane's configured outflow rate (incident removal).
    pub fn restore_flow_rate(&mut self) {
        for lane in &mut self.lanes {
            lane.params.restore_flow_rate();
        }
    }

    // ── Last-updated tail positions ───────────────────────────────────────

    /// Forget all tail positions at the start of a tick.
    pub fn reset_position_of_last_updated_agents(&mut self) {
        for lane in &mut self.lanes {
            lane.last_updated_tail_cm = None;
        }
    }

    /// Record the trailing edge of the most recently updated vehicle so the
    /// next person in the lane can compute its headroom.
    pub fn set_position_of_last_updated_agent(&mut self, dist_from_end_cm: f64, slot: LaneSlot) {
        if let LaneSlot::Lane(l) = slot {
            self.lanes[l as usize].last_updated_tail_cm = Some(dist_from_end_cm);
        }
    }

    #[inline]
    pub fn last_updated_tail_cm(&self, lane: u8) -> Option<f64> {
        self.lanes[lane as usize].last_updated_tail_cm
    }

    // ── Speed and flow ────────────────────────────────────────────────────

    /// Space-mean speed from a linear speed-density relation, clamped to
    /// 10% of free-flow so `length / speed` stays finite.
    pub fn seg_speed_cm_s(&self) -> f64 {
        let storage = self.length_cm * self.lanes.len() as f64;
        if storage <= 0.0 {
            return self.free_speed_cm_s;
        }
        let density = (self.occupied_cm / storage).min(1.0);
        (self.free_speed_cm_s * (1.0 - density)).max(self.free_speed_cm_s * 0.1)
    }

    /// Count one vehicle exiting this stats.
    #[inline]
    pub fn increment_flow(&mut self) {
        self.flow_count += 1;
    }

    #[inline]
    pub fn flow_count(&self) -> u32 {
        self.flow_count
    }

    #[inline]
    pub fn reset_flow(&mut self) {
        self.flow_count = 0;
    }

    // ── TopCMerge within one stats ────────────────────────────────────────

    /// Interleave this stats' lanes (and lane-infinity) into `out`, ordered
    /// by `key` ascending.  Each lane deque is already key-ordered (key is
    /// monotone in distance-to-end), so this is a k-way front merge; ties
    /// resolve to the lowest lane index, keeping the merge deterministic.
    pub fn top_c_merge_lanes(&self, key: impl Fn(PersonId) -> f64, out: &mut Vec<PersonId>) {
        let mut cursors: Vec<(usize, &VecDeque<PersonId>)> = self
            .lanes
            .iter()
            .map(|l| (0usize, &l.persons))
            .chain(std::iter::once((0usize, &self.lane_infinity)))
            .collect();

        loop {
            let mut best: Option<(usize, f64)> = None;
            for (i, (pos, deque)) in cursors.iter().enumerate() {
                if let Some(&p) = deque.get(*pos) {
                    let k = key(p);
                    let better = match best {
                        None => true,
                        Some((_, bk)) => k < bk,
                    };
                    if better {
                        best = Some((i, k));
                    }
                }
            }
            match best {
                None => break,
                Some((i, _)) => {
                    let (pos, deque) = &mut cursors[i];
                    out.push(deque[*pos]);
                    *pos += 1;
                }
            }
        }
    }
}
