//! The conflux: per-tick scheduling unit for the links flowing into one
//! node.
//!
//! A conflux owns the segment stats of its upstream links, the persons on
//! them, and the off-road role lists.  Its worker calls [`Conflux::update`]
//! once per tick (main pass) and [`Conflux::process_virtual_queues`] after
//! every conflux has finished its main pass (VQ flush).  Remote workers
//! touch a conflux only through its [`ConfluxBoundary`] or the message bus.
//!
//! # Per-tick time accounting
//!
//! `update_person` drives the person's movement role in a loop, handing it
//! the remaining fraction of the tick each iteration.  The role consumes
//! budget and exits at a stats boundary, at budget exhaustion, at sub-trip
//! end, or with a pedestrian hand-off; the engine resolves each exit
//! (admission protocol, trip-chain switch, message post) and re-enters the
//! role until the budget is gone.  Preemption is never needed — the budget
//! is the schedule.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use meso_core::{
    ConfluxId, ConfluxRng, LinkId, NodeId, PersonId, RoleKind, SegmentId, SimSettings, StatsId,
    Tick,
};
use meso_role::{
    ActivityMovement, AdmissionGrant, LaneSlot, MoveCtx, Role, RoleFactory, StatsAccess,
};
use meso_trip::{ChainItem, ChainStatus};

use crate::seg_stats::MIN_SPEED_CM_S;
use crate::{
    merge, ConfluxBoundary, EngineError, EngineMsg, EngineResult, MessageBus, Person,
    PersonSnapshot, SegmentStats, StatsDirectory, TransitDirectory,
};

// ── EngineCtx ─────────────────────────────────────────────────────────────────

/// Immutable handles every conflux phase receives.  Built once per phase by
/// the simulation driver; nothing here is looked up through a global.
pub struct EngineCtx<'a> {
    pub settings: &'a SimSettings,
    pub directory: &'a StatsDirectory,
    pub boundaries: &'a [ConfluxBoundary],
    pub bus: &'a MessageBus,
    pub factory: &'a dyn RoleFactory,
    pub transit: &'a dyn TransitDirectory,
}

// ── Stats view handed to movements ────────────────────────────────────────────

/// `StatsAccess` over this conflux's stats arena, falling back to the
/// static directory for stats owned elsewhere.
struct ConfluxStatsView<'a> {
    stats: &'a [SegmentStats],
    index: &'a HashMap<StatsId, usize>,
    directory: &'a StatsDirectory,
}

impl StatsAccess for ConfluxStatsView<'_> {
    fn length_cm(&self, stats: StatsId) -> f64 {
        match self.index.get(&stats) {
            Some(&i) => self.stats[i].length_cm(),
            None => self.directory.meta(stats).map_or(0.0, |m| m.length_cm),
        }
    }

    fn lane_count(&self, stats: StatsId) -> u8 {
        match self.index.get(&stats) {
            Some(&i) => self.stats[i].lane_count(),
            None => self.directory.meta(stats).map_or(0, |m| m.lanes),
        }
    }

    fn seg_speed_cm_s(&self, stats: StatsId) -> f64 {
        match self.index.get(&stats) {
            Some(&i) => self.stats[i].seg_speed_cm_s(),
            None => self
                .directory
                .meta(stats)
                .map_or(MIN_SPEED_CM_S, |m| m.free_speed_cm_s),
        }
    }

    fn persons_in_lane(&self, stats: StatsId, lane: u8) -> usize {
        match self.index.get(&stats) {
            Some(&i) => self.stats[i].num_in_lane(LaneSlot::Lane(lane)),
            None => 0,
        }
    }

    fn last_updated_tail_cm(&self, stats: StatsId, lane: u8) -> Option<f64> {
        self.index
            .get(&stats)
            .and_then(|&i| self.stats[i].last_updated_tail_cm(lane))
    }
}

// ── Outcome enums ─────────────────────────────────────────────────────────────

/// How `move_person` left the person.
enum MoveOutcome {
    /// Sub-trip chain exhausted or init failed: remove the person.
    Done,
    /// Pedestrian must be handed to the conflux owning this link.
    PedestrianHandoff(LinkId),
    /// Person starts waiting for a bus at this stop.
    TransitHandoff(NodeId),
    /// Still owned here; run housekeeping.
    Continue,
}

/// How `switch_trip_chain_item` left the person.
enum SwitchOutcome {
    Done,
    TransitHandoff(NodeId),
    Stay,
}

// ── Conflux ───────────────────────────────────────────────────────────────────

/// One conflux.  See the module docs for the tick protocol.
pub struct Conflux {
    id: ConfluxId,
    node: NodeId,
    is_loader: bool,
    tick_seconds: f64,

    /// Upstream links in deterministic order; per link, local stats indices
    /// upstream-first.
    upstream: Vec<(LinkId, Vec<usize>)>,
    /// Local stats arena.
    stats: Vec<SegmentStats>,
    /// Global stats id → index into `stats`.
    local_index: HashMap<StatsId, usize>,

    /// Every person owned by this conflux, keyed by id.  Lane deques and
    /// role lists hold ids into this map.
    persons: HashMap<PersonId, Person>,
    activity_performers: VecDeque<PersonId>,
    pedestrians: VecDeque<PersonId>,
    mrt: VecDeque<PersonId>,
    car_sharing: VecDeque<PersonId>,
    /// Unrouted fresh persons; populated only on the loader conflux.
    loading_queue: VecDeque<Person>,

    /// Per-link (sum travel ms, trips) accumulated on trip-chain switches.
    link_travel_times: HashMap<LinkId, (f64, u32)>,
    /// Persons whose chains completed this tick.
    completed: Vec<PersonId>,

    rng: ConfluxRng,
    last_updated_frame: i64,
    is_boundary: bool,
    is_multiple_receiver: bool,
}

fn remove_from(list: &mut VecDeque<PersonId>, id: PersonId) -> bool {
    match list.iter().position(|&p| p == id) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

fn push_unique(list: &mut VecDeque<PersonId>, id: PersonId) {
    if !list.contains(&id) {
        list.push_back(id);
    }
}

/// The boundary of the conflux a cross-link operation targets.  A stats
/// meta naming a conflux with no boundary means the network graph is
/// inconsistent — fatal per the error taxonomy.
fn downstream_boundary<'a>(
    ctx: &EngineCtx<'a>,
    stats: StatsId,
    conflux: ConfluxId,
) -> EngineResult<&'a ConfluxBoundary> {
    ctx.boundaries
        .get(conflux.index())
        .ok_or(EngineError::MissingDownstreamConflux { stats, conflux })
}

impl Conflux {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ConfluxId,
        node: NodeId,
        is_loader: bool,
        upstream: Vec<(LinkId, Vec<usize>)>,
        stats: Vec<SegmentStats>,
        seed: u64,
        tick_seconds: f64,
    ) -> Self {
        let local_index = stats
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();
        Self {
            id,
            node,
            is_loader,
            tick_seconds,
            upstream,
            stats,
            local_index,
            persons: HashMap::new(),
            activity_performers: VecDeque::new(),
            pedestrians: VecDeque::new(),
            mrt: VecDeque::new(),
            car_sharing: VecDeque::new(),
            loading_queue: VecDeque::new(),
            link_travel_times: HashMap::new(),
            completed: Vec::new(),
            rng: ConfluxRng::new(seed, id),
            last_updated_frame: -1,
            is_boundary: false,
            is_multiple_receiver: false,
        }
    }

    // ── Identity and queries ──────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> ConfluxId {
        self.id
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn is_loader(&self) -> bool {
        self.is_loader
    }

    #[inline]
    pub fn last_updated_frame(&self) -> i64 {
        self.last_updated_frame
    }

    pub fn is_boundary(&self) -> bool {
        self.is_boundary
    }

    pub fn is_multiple_receiver(&self) -> bool {
        self.is_multiple_receiver
    }

    pub(crate) fn set_boundary_flags(&mut self, boundary: bool, multiple: bool) {
        self.is_boundary = boundary;
        self.is_multiple_receiver = multiple;
    }

    /// Read-only view of the local stats arena.
    pub fn stats(&self) -> &[SegmentStats] {
        &self.stats
    }

    /// The stats slice for `(segment, stats_number)` if this conflux owns
    /// it.  `stats_number` is 1-based.
    pub fn find_seg_stats(&self, segment: SegmentId, stats_number: u16) -> Option<&SegmentStats> {
        self.stats
            .iter()
            .find(|s| s.segment() == segment && s.stats_number() == stats_number)
    }

    /// Persons on this conflux's road space (lanes plus lane-infinity).
    pub fn count_persons(&self) -> usize {
        self.stats.iter().map(|s| s.num_persons()).sum()
    }

    /// Every person owned by this conflux right now, including off-road
    /// lists and the loading queue.
    pub fn population(&self) -> usize {
        self.persons.len() + self.loading_queue.len()
    }

    pub fn num_remaining_in_lane_infinity(&self) -> usize {
        self.stats.iter().map(|s| s.num_in_lane_infinity()).sum()
    }

    pub fn contains_person(&self, id: PersonId) -> bool {
        self.persons.contains_key(&id) || self.loading_queue.iter().any(|p| p.id == id)
    }

    /// Every person currently owned by this conflux, ascending by id.
    pub fn all_person_ids(&self) -> Vec<PersonId> {
        let mut ids: Vec<PersonId> = self.persons.keys().copied().collect();
        ids.extend(self.loading_queue.iter().map(|p| p.id));
        ids.sort_unstable();
        ids
    }

    /// Read-only view of an owned person (tests and diagnostics).
    pub fn person(&self, id: PersonId) -> Option<&Person> {
        self.persons.get(&id)
    }

    pub fn in_activity_list(&self, id: PersonId) -> bool {
        self.activity_performers.contains(&id)
    }

    pub fn in_pedestrian_list(&self, id: PersonId) -> bool {
        self.pedestrians.contains(&id)
    }

    pub fn in_mrt_list(&self, id: PersonId) -> bool {
        self.mrt.contains(&id)
    }

    pub fn in_car_sharing_list(&self, id: PersonId) -> bool {
        self.car_sharing.contains(&id)
    }

    /// Average travel time on `link` collected this tick window, in ms.
    pub fn link_travel_time_ms(&self, link: LinkId) -> Option<f64> {
        self.link_travel_times
            .get(&link)
            .map(|(sum, count)| sum / (*count as f64))
    }

    pub(crate) fn take_completed(&mut self) -> Vec<PersonId> {
        std::mem::take(&mut self.completed)
    }

    pub(crate) fn push_loading(&mut self, person: Person) {
        self.loading_queue.push_back(person);
    }

    fn local_stats_mut(&mut self, stats: StatsId) -> EngineResult<&mut SegmentStats> {
        match self.local_index.get(&stats) {
            Some(&i) => Ok(&mut self.stats[i]),
            None => Err(EngineError::NotOwned {
                stats,
                conflux: self.id,
            }),
        }
    }

    fn view<'a>(&'a self, directory: &'a StatsDirectory) -> ConfluxStatsView<'a> {
        ConfluxStatsView {
            stats: &self.stats,
            index: &self.local_index,
            directory,
        }
    }

    // ── Incidents and flows ───────────────────────────────────────────────

    /// Override the outflow rate of every lane of `stats`.  Unknown stats
    /// are ignored with a warning — an incident on a segment this conflux
    /// does not own has no effect.
    pub fn insert_incident(&mut self, stats: StatsId, flow_veh_s: f64) {
        match self.local_index.get(&stats) {
            Some(&i) => self.stats[i].override_flow_rate(flow_veh_s),
            None => warn!(
                conflux = self.id.0,
                stats = stats.0,
                "incident insertion on unknown segment stats ignored"
            ),
        }
    }

    /// Restore the configured outflow rate of every lane of `stats`.
    pub fn remove_incident(&mut self, stats: StatsId) {
        match self.local_index.get(&stats) {
            Some(&i) => self.stats[i].restore_flow_rate(),
            None => warn!(
                conflux = self.id.0,
                stats = stats.0,
                "incident removal on unknown segment stats ignored"
            ),
        }
    }

    /// Count one vehicle exiting `(segment, stats_number)`.
    pub fn increment_segment_flow(&mut self, segment: SegmentId, stats_number: u16) {
        if let Some(i) = self
            .stats
            .iter()
            .position(|s| s.segment() == segment && s.stats_number() == stats_number)
        {
            self.stats[i].increment_flow();
        }
    }

    // ── Tick phases ───────────────────────────────────────────────────────

    /// Phase A: integrate cross-worker arrivals from the previous tick,
    /// refresh lane output counters, and publish this tick's VQ admission
    /// bounds.  Runs before any conflux starts its main pass.
    pub fn pre_tick(&mut self, _now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        if self.is_loader {
            return Ok(());
        }
        self.integrate_arrivals(ctx)?;
        self.link_travel_times.clear();
        for stats in &mut self.stats {
            stats.update_lane_params(self.tick_seconds);
        }
        self.reset_output_bounds(ctx);
        Ok(())
    }

    /// Phase B: the main pass.  Advances every person owned by this conflux
    /// by at most one tick of simulated time.  Not reentrant; called once
    /// per tick by the owning worker.
    pub fn update(&mut self, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        self.handle_messages(now, ctx)?;
        if self.is_loader {
            return self.load_persons(now, ctx);
        }
        self.reset_position_of_last_updated_agents();
        self.reset_person_remaining_times(now, ctx);
        self.process_agents(now, ctx)?;
        self.last_updated_frame = now.frame();
        ctx.boundaries[self.id.index()].set_last_updated_frame(now.frame());
        Ok(())
    }

    /// Phase C: the VQ flush.  Runs only after every conflux has completed
    /// `update(now)` for this tick.  Admits the persons parked on each
    /// inbound link's queue, most remaining time first; persons denied by
    /// the downstream stats re-enqueue themselves for the next tick.
    pub fn process_virtual_queues(&mut self, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        if self.is_loader {
            return Ok(());
        }
        self.integrate_arrivals(ctx)?;

        let drained: Vec<Person> = {
            let mut state = ctx.boundaries[self.id.index()].lock();
            let mut links: Vec<LinkId> = state.links().collect();
            links.sort();
            links
                .into_iter()
                .flat_map(|l| state.drain_sorted(l))
                .collect()
        };
        for person in drained {
            self.update_person(person, now, ctx)?;
        }
        Ok(())
    }

    fn reset_position_of_last_updated_agents(&mut self) {
        for stats in &mut self.stats {
            stats.reset_position_of_last_updated_agents();
        }
    }

    /// Give a full budget to persons parked in lane-infinity or a virtual
    /// queue that were not moved last tick (denied admission or congestion
    /// kept them waiting).
    fn reset_person_remaining_times(&mut self, now: Tick, ctx: &EngineCtx<'_>) {
        let frame = now.frame();
        let tick_seconds = self.tick_seconds;

        let ids: Vec<PersonId> = self
            .stats
            .iter()
            .flat_map(|s| s.lane_infinity_ids())
            .collect();
        for id in ids {
            if let Some(p) = self.persons.get_mut(&id) {
                if p.last_updated_frame < frame {
                    p.motion.remaining_secs = tick_seconds;
                }
            }
        }

        let mut state = ctx.boundaries[self.id.index()].lock();
        for p in state.persons_mut() {
            if p.last_updated_frame < frame {
                p.motion.remaining_secs = tick_seconds;
            }
        }
    }

    /// Compute this tick's per-link admission budget from the free space on
    /// the link's first stats, discounting the space already promised to
    /// the vehicles staged in lane-infinity.
    fn reset_output_bounds(&mut self, ctx: &EngineCtx<'_>) {
        let mut state = ctx.boundaries[self.id.index()].lock();
        for (link, idxs) in &self.upstream {
            let first = &self.stats[idxs[0]];
            let estimate = first.capacity_pcu() as i64
                - first.num_moving() as i64
                - first.num_queuing() as i64
                - first.num_in_lane_infinity() as i64;
            state.set_bound(*link, estimate.max(0) as u32);
        }
    }

    /// Fold in persons a remote worker moved into this conflux's stats
    /// after our last main pass.
    fn integrate_arrivals(&mut self, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        let arrivals = ctx.boundaries[self.id.index()].lock().take_arrivals();
        for p in arrivals {
            if let (Some(stats), Some(lane)) = (p.motion.curr_stats, p.motion.curr_lane) {
                let is_queuing = p.motion.is_queuing;
                let length = p.vehicle_length_cm();
                self.local_stats_mut(stats)?
                    .add_person(lane, p.id, is_queuing, length);
            }
            self.persons.insert(p.id, p);
        }
        Ok(())
    }

    // ── Loader ────────────────────────────────────────────────────────────

    /// Drain the loading queue: dispatch each fresh person to its starting
    /// conflux, dropping persons with no viable first role.
    fn load_persons(&mut self, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        let start_ms =
            ctx.settings.tick_ms(now + ctx.settings.person_load_lookahead_ticks);
        while let Some(mut person) = self.loading_queue.pop_front() {
            match self.find_starting_conflux(&mut person, start_ms, now, ctx)? {
                Some(conflux) => {
                    debug!(person = person.id.0, conflux = conflux.0, "person load");
                    ctx.bus.post(conflux, EngineMsg::PersonLoad(Box::new(person)));
                }
                None => self.completed.push(person.id),
            }
        }
        Ok(())
    }

    /// Resolve where a fresh person enters the simulation.
    ///
    /// Advances the chain onto its first item; an activity dispatches to
    /// the conflux of its location node, a leg initialises its role and
    /// dispatches to the conflux owning the movement's starting stats.
    fn find_starting_conflux(
        &self,
        p: &mut Person,
        start_ms: u64,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<Option<ConfluxId>> {
        if p.chain.advance() == ChainStatus::Done {
            return Ok(None);
        }
        p.start_time_ms = start_ms;

        let Some(item) = p.chain.current().cloned() else {
            return Ok(None);
        };
        match item {
            ChainItem::Activity(act) => {
                let start = start_ms + ctx.settings.base_gran_ms();
                let end = start + act.duration_ms();
                p.role = Some(Role::new(
                    RoleKind::ActivityPerformer,
                    None,
                    Box::new(ActivityMovement::new(act.location, start, end)),
                ));
                p.initialized = true;
                Ok(ctx.directory.conflux_for_node(act.location))
            }
            ChainItem::Leg(leg) => {
                if leg.role == RoleKind::Passenger {
                    return Err(EngineError::StartsAsPassenger { person: p.id });
                }
                let Some(role) = ctx.factory.make_role(p.id, &leg) else {
                    return Ok(None);
                };
                p.role = Some(role);
                if !self.run_frame_init(p, now, start_ms, ctx)? || p.motion.to_be_removed {
                    return Ok(None);
                }
                p.initialized = true;
                let starting = p
                    .role
                    .as_ref()
                    .and_then(|r| r.movement.starting_stats())
                    .and_then(|s| ctx.directory.conflux_of(s));
                Ok(starting.or_else(|| ctx.directory.conflux_for_node(leg.origin)))
            }
        }
    }

    // ── Messages ──────────────────────────────────────────────────────────

    fn handle_messages(&mut self, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        for msg in ctx.bus.drain(self.id) {
            match msg {
                EngineMsg::PersonLoad(p) => self.add_person(*p, now, ctx)?,
                EngineMsg::PedestrianTransfer(p) => {
                    push_unique(&mut self.pedestrians, p.id);
                    self.persons.insert(p.id, *p);
                }
                EngineMsg::MrtTeleport(p) => self.park_teleported(*p, now, ctx)?,
                EngineMsg::WakeUp(id) => {
                    if !remove_from(&mut self.mrt, id) {
                        return Err(EngineError::NotInList {
                            person: id,
                            list: "mrt",
                            conflux: self.id,
                        });
                    }
                    self.wake_person(id, now, ctx)?;
                }
                EngineMsg::WakeUpCarPassenger(id) => {
                    if !remove_from(&mut self.car_sharing, id) {
                        return Err(EngineError::NotInList {
                            person: id,
                            list: "car-sharing",
                            conflux: self.id,
                        });
                    }
                    self.wake_person(id, now, ctx)?;
                }
                EngineMsg::InsertIncident { stats, flow_veh_s } => {
                    for s in stats {
                        self.insert_incident(s, flow_veh_s);
                    }
                }
                EngineMsg::RemoveIncident { stats } => {
                    for s in stats {
                        self.remove_incident(s);
                    }
                }
            }
        }
        Ok(())
    }

    /// Place a person delivered by `MSG_PERSON_LOAD` (or equivalent) into
    /// the right starting container for its role.
    fn add_person(&mut self, mut p: Person, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        if self.is_loader {
            self.loading_queue.push_back(p);
            return Ok(());
        }
        let Some(kind) = p.role_kind() else {
            // A person arriving without a role has nothing to do here.
            self.completed.push(p.id);
            return Ok(());
        };
        match kind {
            RoleKind::Driver | RoleKind::BusDriver | RoleKind::Biker => {
                let Some(stats_id) = p.motion.curr_stats else {
                    return Err(EngineError::NoStartingStats { person: p.id });
                };
                if ctx.directory.conflux_of(stats_id) != Some(self.id) {
                    return Err(EngineError::NotOwned {
                        stats: stats_id,
                        conflux: self.id,
                    });
                }
                let length = p.vehicle_length_cm();
                let tick_seconds = self.tick_seconds;
                let stats = self.local_stats_mut(stats_id)?;
                p.motion.curr_lane = Some(LaneSlot::Infinity);
                p.motion.distance_to_stats_end_cm = stats.length_cm();
                p.motion.remaining_secs = tick_seconds;
                stats.add_person(LaneSlot::Infinity, p.id, false, length);
                self.persons.insert(p.id, p);
            }
            RoleKind::Pedestrian => {
                push_unique(&mut self.pedestrians, p.id);
                self.persons.insert(p.id, p);
            }
            RoleKind::WaitBusActivity => {
                let stop = Self::current_leg_origin(&p).unwrap_or(self.node);
                ctx.transit.waiting_person_arrival(stop, p);
            }
            RoleKind::TrainPassenger | RoleKind::CarPassenger => {
                self.park_teleported(p, now, ctx)?;
            }
            RoleKind::ActivityPerformer => {
                push_unique(&mut self.activity_performers, p.id);
                self.persons.insert(p.id, p);
            }
            RoleKind::Passenger => {
                return Err(EngineError::StartsAsPassenger { person: p.id });
            }
            _ => unreachable!("RoleKind is non_exhaustive but all known variants are handled"),
        }
        Ok(())
    }

    /// Park a teleported passenger in the matching list and schedule their
    /// wake-up `leg.duration / base_gran` ticks out.
    fn park_teleported(
        &mut self,
        mut p: Person,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<()> {
        let duration_ms = match p.chain.current() {
            Some(ChainItem::Leg(leg)) => leg.duration_ms,
            _ => 0,
        };
        if let Some(role) = p.role.as_mut() {
            role.set_travel_time(duration_ms);
        }
        let offset = ctx.settings.ticks_for_ms(duration_ms);
        let (list, msg) = match p.role_kind() {
            Some(RoleKind::CarPassenger) => (
                &mut self.car_sharing,
                EngineMsg::WakeUpCarPassenger(p.id),
            ),
            _ => (&mut self.mrt, EngineMsg::WakeUp(p.id)),
        };
        push_unique(list, p.id);
        ctx.bus.post_delayed(self.id, msg, now + offset);
        p.initialized = true;
        self.persons.insert(p.id, p);
        Ok(())
    }

    /// A teleported passenger's wake-up fired: advance the trip chain and
    /// re-place the person.
    fn wake_person(&mut self, id: PersonId, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        let Some(mut p) = self.persons.remove(&id) else {
            return Err(EngineError::NotInList {
                person: id,
                list: "persons",
                conflux: self.id,
            });
        };
        let before = PersonSnapshot::capture(&p, ctx.directory, self.id);
        match self.switch_trip_chain_item(&mut p, now, ctx)? {
            SwitchOutcome::Done => self.kill_person(p, &before),
            SwitchOutcome::TransitHandoff(stop) => {
                ctx.transit.waiting_person_arrival(stop, p);
                Ok(())
            }
            SwitchOutcome::Stay => self.integrate_person(p, now, ctx),
        }
    }

    /// Put a person whose role just changed outside the main pass into the
    /// right container, routing to another conflux when the new role starts
    /// elsewhere.
    fn integrate_person(&mut self, p: Person, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        match p.role_kind() {
            Some(kind) if kind.is_on_road() => {
                match p.motion.curr_stats.and_then(|s| ctx.directory.conflux_of(s)) {
                    Some(cfx) if cfx == self.id => self.add_person(p, now, ctx),
                    Some(cfx) => {
                        let id = p.id;
                        ctx.bus.post(cfx, EngineMsg::PersonLoad(Box::new(p)));
                        ctx.bus.reregister(id, cfx);
                        Ok(())
                    }
                    None => Err(EngineError::NoStartingStats { person: p.id }),
                }
            }
            _ => self.add_person(p, now, ctx),
        }
    }

    fn current_leg_origin(p: &Person) -> Option<NodeId> {
        match p.chain.current() {
            Some(ChainItem::Leg(leg)) => Some(leg.origin),
            _ => None,
        }
    }

    // ── Main pass ─────────────────────────────────────────────────────────

    /// Build the tick's processing order (TopCMerge over on-road persons,
    /// then activity performers, then pedestrians) and update everyone.
    fn process_agents(&mut self, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        let mut ordered = Vec::new();
        self.merge_order(&mut ordered);
        ordered.extend(self.activity_performers.iter().copied());
        ordered.extend(self.pedestrians.iter().copied());

        for id in ordered {
            if let Some(person) = self.persons.remove(&id) {
                self.update_person(person, now, ctx)?;
            }
        }
        ctx.transit.update_stops(self.id, now);
        Ok(())
    }

    /// TopCMerge: per link, walk stats downstream-first accumulating
    /// time-to-link-end, set each person's predicted driving time, and
    /// interleave lanes; across links, k-way merge the per-link deques up
    /// to the downstream capacity sum, seeded-random on ties.
    fn merge_order(&mut self, out: &mut Vec<PersonId>) {
        let Conflux {
            upstream,
            stats,
            persons,
            rng,
            ..
        } = self;

        let mut per_link: Vec<Vec<PersonId>> = Vec::with_capacity(upstream.len());
        let mut sum_capacity = 0usize;

        for (_, idxs) in upstream.iter() {
            let downstream_most = idxs[idxs.len() - 1];
            sum_capacity += stats[downstream_most].capacity_pcu().ceil() as usize;

            let mut total_time_to_link_end = 0.0;
            let mut one_link = Vec::new();
            for &si in idxs.iter().rev() {
                let st = &stats[si];
                let speed = st.seg_speed_cm_s().max(MIN_SPEED_CM_S);
                for pid in st.person_ids() {
                    if let Some(p) = persons.get_mut(&pid) {
                        p.motion.driving_time_to_link_end_s =
                            total_time_to_link_end + p.motion.distance_to_stats_end_cm / speed;
                    }
                }
                let mut tmp = Vec::new();
                st.top_c_merge_lanes(
                    |pid| {
                        persons
                            .get(&pid)
                            .map_or(f64::MAX, |p| p.motion.driving_time_to_link_end_s)
                    },
                    &mut tmp,
                );
                total_time_to_link_end += st.length_cm() / speed;
                one_link.extend(tmp);
            }
            per_link.push(one_link);
        }

        merge::top_c_merge_links(
            &per_link,
            sum_capacity,
            |pid| {
                persons
                    .get(&pid)
                    .map_or(f64::MAX, |p| p.motion.driving_time_to_link_end_s)
            },
            rng,
            out,
        );
    }

    /// Advance one person for this tick: drive the role, then repair
    /// container membership from the before/after snapshots.
    pub(crate) fn update_person(
        &mut self,
        mut p: Person,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<()> {
        if p.last_updated_frame < now.frame() {
            p.motion.remaining_secs = self.tick_seconds;
        }
        let before = PersonSnapshot::capture(&p, ctx.directory, self.id);

        match self.move_person(&mut p, now, ctx)? {
            MoveOutcome::Done => self.kill_person(p, &before),
            MoveOutcome::PedestrianHandoff(link) => {
                remove_from(&mut self.pedestrians, p.id);
                let first = ctx
                    .directory
                    .try_stats_of_link(link)
                    .and_then(|stats| stats.first().copied())
                    .ok_or(EngineError::UnknownVqLink {
                        link,
                        conflux: self.id,
                    })?;
                let dest = ctx
                    .directory
                    .conflux_of(first)
                    .ok_or(EngineError::UnknownStats { stats: first })?;
                downstream_boundary(ctx, first, dest)?;
                let id = p.id;
                ctx.bus.post(dest, EngineMsg::PedestrianTransfer(Box::new(p)));
                ctx.bus.reregister(id, dest);
                Ok(())
            }
            MoveOutcome::TransitHandoff(stop) => {
                ctx.transit.waiting_person_arrival(stop, p);
                Ok(())
            }
            MoveOutcome::Continue => {
                let after = PersonSnapshot::capture(&p, ctx.directory, self.id);
                let id = p.id;
                let moved_conflux = before.conflux != after.conflux;
                let dest = after.conflux;
                self.housekeep(&before, &after, p, now, ctx)?;
                if moved_conflux {
                    ctx.bus.reregister(id, dest);
                }
                Ok(())
            }
        }
    }

    // ── move_person: the per-tick budget loop ─────────────────────────────

    fn move_person(
        &mut self,
        p: &mut Person,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<MoveOutcome> {
        if !p.initialized {
            let now_ms = ctx.settings.tick_ms(now);
            if p.role.is_none() {
                if p.chain.current().is_none() && p.chain.advance() == ChainStatus::Done {
                    return Ok(MoveOutcome::Done);
                }
                if !self.assign_role_for_current_item(p, now_ms, ctx) {
                    return Ok(MoveOutcome::Done);
                }
                p.start_time_ms = now_ms;
            }
            if !self.run_frame_init(p, now, now_ms, ctx)? || p.motion.to_be_removed {
                return Ok(MoveOutcome::Done);
            }
            p.initialized = true;
        }

        if p.motion.reset_params_required {
            p.motion.reset_params_required = false;
        }
        p.last_updated_frame = now.frame();

        while p.motion.remaining_secs > 0.0 {
            if !p.motion.to_be_removed {
                self.role_frame_tick(p, now, ctx)?;
            }

            if p.motion.to_be_removed {
                match self.switch_trip_chain_item(p, now, ctx)? {
                    SwitchOutcome::Done => return Ok(MoveOutcome::Done),
                    SwitchOutcome::TransitHandoff(stop) => {
                        return Ok(MoveOutcome::TransitHandoff(stop))
                    }
                    SwitchOutcome::Stay => {}
                }
            }

            if let Some(link) = p.motion.next_link_required.take() {
                return Ok(MoveOutcome::PedestrianHandoff(link));
            }

            if let Some(next) = p.motion.requested_next_stats {
                if self.apply_admission(p, next, now, ctx)? {
                    break; // parked toward the downstream virtual queue
                }
            }
        }

        if p.motion.remaining_secs <= 0.0 {
            p.motion.reset_params_required = true;
        }
        self.role_frame_output(p, now, ctx)?;
        Ok(MoveOutcome::Continue)
    }

    /// One `frame_tick` of the person's movement role.
    fn role_frame_tick(&self, p: &mut Person, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        let view = self.view(ctx.directory);
        let Some(role) = p.role.as_mut() else {
            return Err(EngineError::NoRole { person: p.id });
        };
        let movement = &mut role.movement;
        let resource = &mut role.resource;
        let mut mc = MoveCtx {
            now,
            now_ms: ctx.settings.tick_ms(now),
            tick_seconds: self.tick_seconds,
            person: p.id,
            state: &mut p.motion,
            vehicle: resource,
            stats: &view,
        };
        movement.frame_tick(&mut mc);
        Ok(())
    }

    /// Let the role emit its per-tick output record.
    fn role_frame_output(&self, p: &mut Person, now: Tick, ctx: &EngineCtx<'_>) -> EngineResult<()> {
        let view = self.view(ctx.directory);
        let Some(role) = p.role.as_mut() else {
            return Err(EngineError::NoRole { person: p.id });
        };
        let movement = &mut role.movement;
        let resource = &mut role.resource;
        let mc = MoveCtx {
            now,
            now_ms: ctx.settings.tick_ms(now),
            tick_seconds: self.tick_seconds,
            person: p.id,
            state: &mut p.motion,
            vehicle: resource,
            stats: &view,
        };
        movement.frame_tick_output(&mc);
        Ok(())
    }

    fn run_frame_init(
        &self,
        p: &mut Person,
        now: Tick,
        now_ms: u64,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<bool> {
        let view = self.view(ctx.directory);
        let Some(role) = p.role.as_mut() else {
            return Err(EngineError::NoRole { person: p.id });
        };
        let movement = &mut role.movement;
        let resource = &mut role.resource;
        let mut mc = MoveCtx {
            now,
            now_ms,
            tick_seconds: self.tick_seconds,
            person: p.id,
            state: &mut p.motion,
            vehicle: resource,
            stats: &view,
        };
        Ok(movement.frame_init(&mut mc))
    }

    // ── Cross-link admission protocol ─────────────────────────────────────

    /// Evaluate the person's pending boundary request.  Returns `true` when
    /// the person was granted toward a not-yet-updated conflux and must
    /// break out of the per-tick loop (housekeeping will park it on that
    /// conflux's virtual queue).
    fn apply_admission(
        &mut self,
        p: &mut Person,
        next: StatsId,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<bool> {
        let meta = ctx
            .directory
            .meta(next)
            .ok_or(EngineError::UnknownStats { stats: next })?;
        let next_conflux = meta.conflux;
        let next_link = meta.link;

        let Some(cur_stats) = p.motion.curr_stats else {
            return Err(EngineError::AdmissionWithoutStats {
                person: p.id,
                tick: now,
            });
        };
        if !self.local_index.contains_key(&cur_stats) {
            // The person already crossed into another conflux's stats this
            // tick; a second crossing must wait until that conflux owns it.
            debug!(person = p.id.0, "second cross-conflux request deferred");
            p.motion.grant = AdmissionGrant::Denied;
            p.motion.requested_next_stats = None;
            return Ok(false);
        }
        let lane = p.motion.curr_lane.and_then(LaneSlot::real).unwrap_or(0);
        let frame = now.frame();

        p.motion.grant = AdmissionGrant::Granted;

        // A request into this conflux's own stats behaves as "downstream
        // already updated": this conflux is being updated right now.
        let downstream_frame = if next_conflux == self.id {
            frame
        } else {
            downstream_boundary(ctx, next, next_conflux)?.last_updated_frame()
        };

        if downstream_frame == frame {
            // Downstream ran (or is running) this tick: grant on outflow
            // budget alone and let the role step across immediately.
            let stats = self.local_stats_mut(cur_stats)?;
            let params = stats.lane_params_mut(lane);
            if params.output_counter() > 0 {
                params.decrement_output_counter();
                stats.increment_flow();
            } else {
                p.motion.grant = AdmissionGrant::Denied;
            }
            p.motion.requested_next_stats = None;
            Ok(false)
        } else if downstream_frame < frame {
            // Downstream still pending this tick: also need space on its
            // virtual queue.  On grant the person is parked toward that
            // queue and resumes during the downstream VQ flush.
            let has_space = downstream_boundary(ctx, next, next_conflux)?
                .has_space_in_virtual_queue(next_link)?;
            let stats = self.local_stats_mut(cur_stats)?;
            let params = stats.lane_params_mut(lane);
            if has_space && params.output_counter() > 0 {
                params.decrement_output_counter();
                stats.increment_flow();
                p.motion.curr_stats = Some(next);
                p.motion.curr_lane = None;
                p.motion.requested_next_stats = None;
                Ok(true)
            } else {
                debug!(person = p.id.0, link = next_link.0, "admission denied");
                p.motion.grant = AdmissionGrant::Denied;
                p.motion.requested_next_stats = None;
                Ok(false)
            }
        } else {
            Err(EngineError::FrameBookkeeping {
                conflux: next_conflux,
                tick: now,
            })
        }
    }

    // ── Trip-chain switching ──────────────────────────────────────────────

    /// Collect the finished item's travel time, advance the chain, build
    /// the next role, and move the person into the matching off-road list
    /// when the new role requires one.
    fn switch_trip_chain_item(
        &mut self,
        p: &mut Person,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<SwitchOutcome> {
        let now_ms = ctx.settings.tick_ms(now);
        self.collect_travel_time(p, now_ms, ctx);

        let old_kind = p.role_kind();
        let old_vehicle_len = p.vehicle_length_cm();
        let old_placement = (p.motion.curr_stats, p.motion.curr_lane, p.motion.is_queuing);

        if p.chain.advance() == ChainStatus::Done {
            return Ok(SwitchOutcome::Done);
        }
        p.motion.to_be_removed = false;
        p.motion.requested_next_stats = None;
        p.motion.grant = AdmissionGrant::None;
        p.motion.next_link_required = None;
        p.start_time_ms = now_ms;

        if !self.assign_role_for_current_item(p, now_ms, ctx) {
            return Ok(SwitchOutcome::Done);
        }
        let kind = p.role_kind().ok_or(EngineError::NoRole { person: p.id })?;

        match kind {
            RoleKind::WaitBusActivity => {
                remove_from(&mut self.pedestrians, p.id);
                self.detach_from_road(p, old_kind, old_placement, old_vehicle_len)?;
                p.initialized = true;
                let stop = Self::current_leg_origin(p).unwrap_or(self.node);
                Ok(SwitchOutcome::TransitHandoff(stop))
            }
            RoleKind::TrainPassenger | RoleKind::CarPassenger => {
                remove_from(&mut self.pedestrians, p.id);
                self.detach_from_road(p, old_kind, old_placement, old_vehicle_len)?;
                let duration_ms = match p.chain.current() {
                    Some(ChainItem::Leg(leg)) => leg.duration_ms,
                    _ => 0,
                };
                if let Some(role) = p.role.as_mut() {
                    role.set_travel_time(duration_ms);
                }
                let offset = ctx.settings.ticks_for_ms(duration_ms);
                let msg = if kind == RoleKind::CarPassenger {
                    push_unique(&mut self.car_sharing, p.id);
                    EngineMsg::WakeUpCarPassenger(p.id)
                } else {
                    push_unique(&mut self.mrt, p.id);
                    EngineMsg::WakeUp(p.id)
                };
                ctx.bus.post_delayed(self.id, msg, now + offset);
                p.initialized = true;
                Ok(SwitchOutcome::Stay)
            }
            RoleKind::Pedestrian => {
                push_unique(&mut self.pedestrians, p.id);
                self.detach_from_road(p, old_kind, old_placement, old_vehicle_len)?;
                p.initialized = true;
                Ok(SwitchOutcome::Stay)
            }
            _ => {
                // Activity or an on-road role: initialise the movement; the
                // container shuffle is housekeeping's job, driven by the
                // before/after snapshots.
                remove_from(&mut self.pedestrians, p.id);
                if !self.run_frame_init(p, now, now_ms, ctx)? || p.motion.to_be_removed {
                    return Ok(SwitchOutcome::Done);
                }
                p.initialized = true;
                Ok(SwitchOutcome::Stay)
            }
        }
    }

    /// Build the role for the chain item under the cursor.  Activities get
    /// an `ActivityMovement` with the window re-anchored to the next tick
    /// boundary; legs go through the application's role factory.  Returns
    /// `false` when no role could be built.
    fn assign_role_for_current_item(
        &self,
        p: &mut Person,
        anchor_ms: u64,
        ctx: &EngineCtx<'_>,
    ) -> bool {
        let Some(item) = p.chain.current().cloned() else {
            return false;
        };
        match item {
            ChainItem::Activity(act) => {
                let start = anchor_ms + ctx.settings.base_gran_ms();
                let end = start + act.duration_ms();
                p.role = Some(Role::new(
                    RoleKind::ActivityPerformer,
                    None,
                    Box::new(ActivityMovement::new(act.location, start, end)),
                ));
                p.initialized = false;
                true
            }
            ChainItem::Leg(leg) => match ctx.factory.make_role(p.id, &leg) {
                Some(role) => {
                    p.role = Some(role);
                    p.initialized = false;
                    true
                }
                None => false,
            },
        }
    }

    /// Pull a previously on-road person off the carriageway when their new
    /// role does not live on it.
    fn detach_from_road(
        &mut self,
        p: &mut Person,
        old_kind: Option<RoleKind>,
        old_placement: (Option<StatsId>, Option<LaneSlot>, bool),
        old_vehicle_len: f64,
    ) -> EngineResult<()> {
        let (stats, lane, was_queuing) = old_placement;
        if let (Some(stats), Some(lane)) = (stats, lane) {
            if old_kind.is_some_and(RoleKind::is_on_road) {
                let id = self.id;
                self.local_stats_mut(stats)?
                    .dequeue(p.id, lane, was_queuing, old_vehicle_len, id)?;
            }
        }
        p.motion.curr_stats = None;
        p.motion.curr_lane = None;
        p.motion.distance_to_stats_end_cm = 0.0;
        p.motion.is_queuing = false;
        Ok(())
    }

    fn collect_travel_time(&mut self, p: &mut Person, now_ms: u64, ctx: &EngineCtx<'_>) {
        let elapsed = now_ms.saturating_sub(p.start_time_ms);
        let travel_ms = p
            .role
            .as_mut()
            .and_then(Role::collect_travel_time)
            .unwrap_or(elapsed);
        if let Some(link) = p
            .motion
            .curr_stats
            .and_then(|s| ctx.directory.link_of(s))
        {
            let entry = self.link_travel_times.entry(link).or_insert((0.0, 0));
            entry.0 += travel_ms as f64;
            entry.1 += 1;
        }
    }

    // ── Housekeeping ──────────────────────────────────────────────────────

    /// Repair container membership after a role tick.  Rules match the
    /// design's top-to-bottom order; the first matching rule wins.
    fn housekeep(
        &mut self,
        before: &PersonSnapshot,
        after: &PersonSnapshot,
        p: Person,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<()> {
        use RoleKind::*;
        let id = p.id;

        // Activity ended and a trip item began.
        if before.role_kind == Some(ActivityPerformer) && after.role_kind != Some(ActivityPerformer)
        {
            remove_from(&mut self.activity_performers, id);
            if after.role_kind == Some(Pedestrian) {
                push_unique(&mut self.pedestrians, id);
                self.persons.insert(id, p);
                return Ok(());
            }
            // Fall through to on-road placement for the new trip.
        }

        match after.role_kind {
            // Already placed by the trip-chain assignment path.
            Some(WaitBusActivity) | Some(TrainPassenger) | Some(CarPassenger) => {
                self.persons.insert(id, p);
                return Ok(());
            }
            Some(ActivityPerformer) => {
                if before.role_kind != Some(ActivityPerformer) {
                    if before.role_kind == Some(Pedestrian) {
                        remove_from(&mut self.pedestrians, id);
                    } else if let (Some(stats), Some(lane)) = (before.stats, before.lane) {
                        let cfx = self.id;
                        self.local_stats_mut(stats)?.dequeue(
                            id,
                            lane,
                            before.is_queuing,
                            before.vehicle_length_cm,
                            cfx,
                        )?;
                    }
                    push_unique(&mut self.activity_performers, id);
                }
                self.persons.insert(id, p);
                return Ok(());
            }
            // The trip-chain switch already parked pedestrians and pulled
            // any vehicle off the road.
            Some(Pedestrian) => {
                self.persons.insert(id, p);
                return Ok(());
            }
            Some(BusDriver) => {
                if before.is_moving && !after.is_moving {
                    // Bus pulled into a stop: off the segment stats; the
                    // bus-stop agent holds the driver until departure.
                    if let (Some(stats), Some(lane)) = (before.stats, before.lane) {
                        let cfx = self.id;
                        self.local_stats_mut(stats)?.dequeue(
                            id,
                            lane,
                            before.is_queuing,
                            before.vehicle_length_cm,
                            cfx,
                        )?;
                    }
                    self.persons.insert(id, p);
                    return Ok(());
                } else if !before.is_moving && after.is_moving {
                    // Bus leaving a stop re-enters the road network.
                    if after.lane.is_some() {
                        return self.add_to_after_stats(after, p, ctx);
                    }
                    return self.push_to_vq(after, p, ctx);
                } else if !before.is_moving && !after.is_moving && before.stats != after.stats {
                    // Hopped between stops within one tick; still off-road.
                    self.persons.insert(id, p);
                    return Ok(());
                }
                // moving -> moving: ordinary on-road rules below.
            }
            _ => {}
        }

        self.place_on_road(before, after, p, now, ctx)
    }

    /// The general on-road placement rules.
    fn place_on_road(
        &mut self,
        before: &PersonSnapshot,
        after: &PersonSnapshot,
        p: Person,
        now: Tick,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<()> {
        let id = p.id;

        if before.lane.is_none() {
            // Was in a virtual queue or performing an activity.
            if after.lane.is_some() {
                return self.add_to_after_stats(after, p, ctx);
            }
            if before.stats == after.stats {
                // Not accepted downstream: back onto the same queue for the
                // next tick.
                return self.push_to_vq(after, p, ctx);
            }
            return Err(EngineError::VqToVqTraversal {
                person: id,
                tick: now,
                conflux: self.id,
                from: before.stats.unwrap_or_default(),
                to: after.stats.unwrap_or_default(),
            });
        }

        let left_infinity =
            before.lane == Some(LaneSlot::Infinity) && before.lane != after.lane;

        if before.stats != after.stats || left_infinity {
            if before.role_kind != Some(RoleKind::ActivityPerformer) {
                if let (Some(stats), Some(lane)) = (before.stats, before.lane) {
                    let cfx = self.id;
                    self.local_stats_mut(stats)?.dequeue(
                        id,
                        lane,
                        before.is_queuing,
                        before.vehicle_length_cm,
                        cfx,
                    )?;
                }
            }
            if after.lane.is_some() {
                return self.add_to_after_stats(after, p, ctx);
            }
            return self.push_to_vq(after, p, ctx);
        }

        if before.stats == after.stats && after.lane == Some(LaneSlot::Infinity) {
            // A new trip starting on the segment where the last one ended.
            if let (Some(stats), Some(lane)) = (before.stats, before.lane) {
                let cfx = self.id;
                self.local_stats_mut(stats)?.dequeue(
                    id,
                    lane,
                    before.is_queuing,
                    before.vehicle_length_cm,
                    cfx,
                )?;
            }
            return self.add_to_after_stats(after, p, ctx);
        }

        if before.is_queuing != after.is_queuing {
            if let (Some(stats), Some(lane)) = (after.stats, after.lane) {
                self.local_stats_mut(stats)?
                    .update_queue_status(lane, after.is_queuing);
            }
        }

        self.record_tail_and_store(after, p)
    }

    /// Add the person to `after.stats` at `after.lane`, depositing on the
    /// owning conflux's arrival buffer when the stats lives elsewhere.
    fn add_to_after_stats(
        &mut self,
        after: &PersonSnapshot,
        p: Person,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<()> {
        let (Some(stats), Some(lane)) = (after.stats, after.lane) else {
            return Err(EngineError::UnknownStats {
                stats: after.stats.unwrap_or_default(),
            });
        };
        let owner = ctx
            .directory
            .conflux_of(stats)
            .ok_or(EngineError::UnknownStats { stats })?;
        if owner != self.id {
            downstream_boundary(ctx, stats, owner)?.push_arrival(p);
            return Ok(());
        }
        self.local_stats_mut(stats)?
            .add_person(lane, p.id, after.is_queuing, after.vehicle_length_cm);
        self.record_tail_and_store(after, p)
    }

    /// Park the person on the virtual queue of `after`'s link at its owning
    /// conflux, with the distance reset to the full stats length.
    fn push_to_vq(
        &mut self,
        after: &PersonSnapshot,
        mut p: Person,
        ctx: &EngineCtx<'_>,
    ) -> EngineResult<()> {
        let stats = after.stats.ok_or(EngineError::UnknownStats {
            stats: StatsId::default(),
        })?;
        let meta = ctx
            .directory
            .meta(stats)
            .ok_or(EngineError::UnknownStats { stats })?;
        p.motion.distance_to_stats_end_cm = meta.length_cm;
        downstream_boundary(ctx, stats, meta.conflux)?.push_back_onto_virtual_queue(meta.link, p)
    }

    /// Record the person's trailing edge for headway computation, then
    /// store the person back in the owned map.
    fn record_tail_and_store(&mut self, after: &PersonSnapshot, p: Person) -> EngineResult<()> {
        if let (Some(stats), Some(LaneSlot::Lane(l))) = (after.stats, after.lane) {
            if let Ok(st) = self.local_stats_mut(stats) {
                st.set_position_of_last_updated_agent(
                    p.motion.distance_to_stats_end_cm + after.vehicle_length_cm,
                    LaneSlot::Lane(l),
                );
            }
        }
        self.persons.insert(p.id, p);
        Ok(())
    }

    // ── Removal ───────────────────────────────────────────────────────────

    /// Remove a person whose chain is complete (or whose role failed to
    /// initialise).  Absence from the expected lane is an error for every
    /// role except `BusDriver`, whose vehicle was already pulled out at its
    /// final stop.
    fn kill_person(&mut self, p: Person, before: &PersonSnapshot) -> EngineResult<()> {
        let id = p.id;
        match p.role_kind() {
            Some(RoleKind::ActivityPerformer) => {
                remove_from(&mut self.activity_performers, id);
            }
            Some(RoleKind::Pedestrian) => {
                remove_from(&mut self.pedestrians, id);
            }
            Some(RoleKind::Driver) => {
                // A driver whose path could never be built may still sit in
                // the activity list from the previous chain item.
                if !remove_from(&mut self.activity_performers, id) {
                    if let (Some(stats), Some(lane)) = (before.stats, before.lane) {
                        let cfx = self.id;
                        self.local_stats_mut(stats)?.dequeue(
                            id,
                            lane,
                            before.is_queuing,
                            before.vehicle_length_cm,
                            cfx,
                        )?;
                    }
                }
            }
            _ => {
                if let (Some(stats), Some(lane)) = (before.stats, before.lane) {
                    let removed = self.local_stats_mut(stats)?.remove_person(
                        id,
                        lane,
                        before.is_queuing,
                        before.vehicle_length_cm,
                    );
                    if !removed && p.role_kind() != Some(RoleKind::BusDriver) {
                        return Err(EngineError::RemoveMissingPerson {
                            person: id,
                            conflux: self.id,
                            stats,
                        });
                    }
                }
            }
        }
        self.completed.push(id);
        Ok(())
    }
}
