//! Simulation assembly and the two-phase tick driver.
//!
//! # Tick protocol
//!
//! ```text
//! for each tick T:
//!   ⓪ deliver   — promote staged and due-delayed messages to inboxes
//!   ① pre-tick  — per conflux: integrate arrivals, refresh output
//!                 counters, publish VQ admission bounds
//!   ② main pass — per conflux: Conflux::update(T)
//!   ③ VQ flush  — per conflux: Conflux::process_virtual_queues(T)
//! ```
//!
//! Phases are separated by barriers: a phase starts only after every
//! conflux finished the previous one, so when a conflux flushes its
//! virtual queues every sibling has already published `last_updated_frame`.
//! Within a phase, confluxes are independent; with the `parallel` feature
//! they run on Rayon's pool, mutating only their own state and their
//! siblings' mutex-guarded boundaries.

use std::sync::Arc;

use meso_core::{ConfluxId, NodeId, PersonId, SimSettings, StatsId, Tick};
use meso_net::RoadGraph;
use meso_role::RoleFactory;
use meso_trip::TripChain;

use crate::directory::StatsMeta;
use crate::{
    Conflux, ConfluxBoundary, EngineCtx, EngineObserver, EngineResult, MessageBus, NoTransit,
    Person, SegmentStats, StatsDirectory, TransitDirectory,
};

// ── SimulationBuilder ─────────────────────────────────────────────────────────

/// Assemble a [`Simulation`] from a frozen road graph, settings, and the
/// application's role factory.
///
/// One conflux is created per node with inbound links, plus one *loader*
/// conflux that dispatches freshly spawned persons to their starting
/// conflux.
///
/// # Example
///
/// ```rust,ignore
/// let sim = SimulationBuilder::new(settings, graph, MyRoleFactory)
///     .transit(MyTransitDirectory)
///     .build();
/// ```
pub struct SimulationBuilder {
    settings: SimSettings,
    graph: RoadGraph,
    factory: Arc<dyn RoleFactory>,
    transit: Arc<dyn TransitDirectory>,
}

impl SimulationBuilder {
    pub fn new(
        settings: SimSettings,
        graph: RoadGraph,
        factory: impl RoleFactory + 'static,
    ) -> Self {
        Self {
            settings,
            graph,
            factory: Arc::new(factory),
            transit: Arc::new(NoTransit),
        }
    }

    /// Supply the bus-stop agent directory.  Defaults to [`NoTransit`].
    pub fn transit(mut self, transit: impl TransitDirectory + 'static) -> Self {
        self.transit = Arc::new(transit);
        self
    }

    /// Partition the network into confluxes, build the stats arenas and
    /// directory, and wire up boundaries and the message bus.
    pub fn build(self) -> Simulation {
        let settings = self.settings;
        let graph = self.graph;

        // ── Conflux per node with inbound links ───────────────────────────
        let mut conflux_of_node: Vec<Option<ConfluxId>> = vec![None; graph.node_count()];
        let mut conflux_nodes: Vec<NodeId> = Vec::new();
        for node in graph.nodes() {
            if !graph.in_links(node).is_empty() {
                conflux_of_node[node.index()] = Some(ConfluxId(conflux_nodes.len() as u32));
                conflux_nodes.push(node);
            }
        }
        let loader = ConfluxId(conflux_nodes.len() as u32);
        let total_confluxes = conflux_nodes.len() + 1;

        // ── Stats arenas, upstream-first per link ─────────────────────────
        let mut metas: Vec<StatsMeta> = Vec::new();
        let mut link_stats: Vec<Vec<StatsId>> = vec![Vec::new(); graph.link_count()];
        let mut per_conflux_stats: Vec<Vec<SegmentStats>> = Vec::with_capacity(conflux_nodes.len());
        let mut per_conflux_upstream: Vec<Vec<(meso_core::LinkId, Vec<usize>)>> =
            Vec::with_capacity(conflux_nodes.len());

        for (ci, &node) in conflux_nodes.iter().enumerate() {
            let cid = ConfluxId(ci as u32);
            let mut stats_vec: Vec<SegmentStats> = Vec::new();
            let mut upstream = Vec::new();
            for &link in graph.in_links(node) {
                let mut idxs = Vec::new();
                for &seg_id in &graph.link(link).segments {
                    let seg = graph.segment(seg_id);
                    let parts = seg.stats_parts.max(1);
                    let part_len = seg.length_cm / parts as f64;
                    for part in 0..parts {
                        let sid = StatsId(metas.len() as u32);
                        let local_index = stats_vec.len();
                        metas.push(StatsMeta {
                            segment: seg_id,
                            link,
                            conflux: cid,
                            stats_number: part + 1,
                            local_index,
                            length_cm: part_len,
                            lanes: seg.lanes,
                            free_speed_cm_s: seg.free_speed_cm_s,
                        });
                        link_stats[link.index()].push(sid);
                        idxs.push(local_index);
                        stats_vec.push(SegmentStats::new(
                            sid,
                            seg_id,
                            link,
                            part + 1,
                            part_len,
                            seg.lanes,
                            seg.free_speed_cm_s,
                            seg.output_flow_veh_s,
                        ));
                    }
                }
                upstream.push((link, idxs));
            }
            per_conflux_stats.push(stats_vec);
            per_conflux_upstream.push(upstream);
        }

        let directory = StatsDirectory::new(metas, link_stats, conflux_of_node.clone());

        // ── Confluxes and boundaries ──────────────────────────────────────
        let mut confluxes: Vec<Conflux> = Vec::with_capacity(total_confluxes);
        let mut boundaries: Vec<ConfluxBoundary> = Vec::with_capacity(total_confluxes);
        let mut upstream_iter = per_conflux_upstream.into_iter();
        let mut stats_iter = per_conflux_stats.into_iter();
        for (ci, &node) in conflux_nodes.iter().enumerate() {
            let cid = ConfluxId(ci as u32);
            let upstream = upstream_iter.next().unwrap_or_default();
            let stats = stats_iter.next().unwrap_or_default();
            let inbound: Vec<meso_core::LinkId> = upstream.iter().map(|(l, _)| *l).collect();
            confluxes.push(Conflux::new(
                cid,
                node,
                false,
                upstream,
                stats,
                settings.seed,
                settings.tick_seconds,
            ));
            boundaries.push(ConfluxBoundary::new(cid, &inbound));
        }
        confluxes.push(Conflux::new(
            loader,
            NodeId::INVALID,
            true,
            Vec::new(),
            Vec::new(),
            settings.seed,
            settings.tick_seconds,
        ));
        boundaries.push(ConfluxBoundary::new(loader, &[]));

        // ── Worker partition and boundary flags ───────────────────────────
        let workers = settings.num_workers.unwrap_or(1).max(1);
        for (ci, &node) in conflux_nodes.iter().enumerate() {
            let own_worker = ci % workers;
            let mut foreign_workers: Vec<usize> = Vec::new();
            for &link in graph.in_links(node) {
                let from = graph.link(link).from;
                if let Some(up_cfx) = conflux_of_node[from.index()] {
                    let w = up_cfx.index() % workers;
                    if w != own_worker && !foreign_workers.contains(&w) {
                        foreign_workers.push(w);
                    }
                }
            }
            confluxes[ci]
                .set_boundary_flags(!foreign_workers.is_empty(), foreign_workers.len() > 1);
        }

        let bus = MessageBus::new(total_confluxes);

        Simulation {
            settings,
            graph,
            directory,
            confluxes,
            boundaries,
            bus,
            factory: self.factory,
            transit: self.transit,
            loader,
            now: Tick::ZERO,
            next_person: 0,
        }
    }
}

// ── Simulation ────────────────────────────────────────────────────────────────

/// The assembled simulation: confluxes, boundaries, bus, and the clock.
pub struct Simulation {
    settings: SimSettings,
    graph: RoadGraph,
    directory: StatsDirectory,
    confluxes: Vec<Conflux>,
    boundaries: Vec<ConfluxBoundary>,
    bus: MessageBus,
    factory: Arc<dyn RoleFactory>,
    transit: Arc<dyn TransitDirectory>,
    loader: ConfluxId,
    now: Tick,
    next_person: u32,
}

impl Simulation {
    // ── Population ────────────────────────────────────────────────────────

    /// Hand a fresh person to the loader conflux; it will be dispatched to
    /// its starting conflux on the next tick.
    pub fn spawn(&mut self, chain: TripChain) -> PersonId {
        let id = PersonId(self.next_person);
        self.next_person += 1;
        self.confluxes[self.loader.index()].push_loading(Person::new(id, chain));
        id
    }

    /// Persons currently owned anywhere in the engine (conflux maps,
    /// loading queue, virtual queues).
    pub fn total_population(&self) -> usize {
        let owned: usize = self.confluxes.iter().map(Conflux::population).sum();
        let queued: usize = self.boundaries.iter().map(ConfluxBoundary::total_queued).sum();
        owned + queued
    }

    /// The conflux currently owning `person`, if any (linear scan; for
    /// tests and diagnostics).
    pub fn owner_of(&self, person: PersonId) -> Option<ConfluxId> {
        self.confluxes
            .iter()
            .find(|c| c.contains_person(person))
            .map(Conflux::id)
    }

    // ── Tick driver ───────────────────────────────────────────────────────

    /// Run one full tick: message delivery, pre-tick, main pass, VQ flush.
    pub fn tick(&mut self) -> EngineResult<()> {
        let now = self.now;
        self.bus.deliver_due(now);

        let Simulation {
            settings,
            directory,
            confluxes,
            boundaries,
            bus,
            factory,
            transit,
            ..
        } = self;
        let ctx = EngineCtx {
            settings: &*settings,
            directory: &*directory,
            boundaries: boundaries.as_slice(),
            bus: &*bus,
            factory: &**factory,
            transit: &**transit,
        };

        run_phase(confluxes, settings, |c| c.pre_tick(now, &ctx))?;
        run_phase(confluxes, settings, |c| c.update(now, &ctx))?;
        run_phase(confluxes, settings, |c| c.process_virtual_queues(now, &ctx))?;

        self.now = now + 1;
        Ok(())
    }

    /// Run to `settings.end_tick()`, reporting through `observer`.
    pub fn run<O: EngineObserver>(&mut self, observer: &mut O) -> EngineResult<()> {
        while self.now < self.settings.end_tick() {
            let now = self.now;
            observer.on_tick_start(now);
            self.tick()?;
            for person in self.take_completed() {
                observer.on_person_done(person, now);
            }
            observer.on_tick_end(now, self.total_population());
        }
        observer.on_sim_end(self.now);
        Ok(())
    }

    /// Run exactly `n` ticks from the current position (ignores
    /// `end_tick`).  Useful for tests and incremental stepping.
    pub fn run_ticks<O: EngineObserver>(&mut self, n: u64, observer: &mut O) -> EngineResult<()> {
        for _ in 0..n {
            let now = self.now;
            observer.on_tick_start(now);
            self.tick()?;
            for person in self.take_completed() {
                observer.on_person_done(person, now);
            }
            observer.on_tick_end(now, self.total_population());
        }
        Ok(())
    }

    /// Drain the persons whose chains completed since the last call.
    pub fn take_completed(&mut self) -> Vec<PersonId> {
        let mut done = Vec::new();
        for conflux in &mut self.confluxes {
            done.append(&mut conflux.take_completed());
        }
        done
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    pub fn directory(&self) -> &StatsDirectory {
        &self.directory
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn loader_id(&self) -> ConfluxId {
        self.loader
    }

    pub fn conflux(&self, id: ConfluxId) -> &Conflux {
        &self.confluxes[id.index()]
    }

    pub fn conflux_mut(&mut self, id: ConfluxId) -> &mut Conflux {
        &mut self.confluxes[id.index()]
    }

    pub fn confluxes(&self) -> &[Conflux] {
        &self.confluxes
    }

    pub fn boundary(&self, id: ConfluxId) -> &ConfluxBoundary {
        &self.boundaries[id.index()]
    }

    /// The conflux hosted at `node`, if any.
    pub fn conflux_at_node(&self, node: NodeId) -> Option<&Conflux> {
        self.directory
            .conflux_for_node(node)
            .map(|id| self.conflux(id))
    }
}

// ── Phase runner ──────────────────────────────────────────────────────────────

#[cfg(feature = "parallel")]
fn run_phase<F>(confluxes: &mut [Conflux], settings: &SimSettings, f: F) -> EngineResult<()>
where
    F: Fn(&mut Conflux) -> EngineResult<()> + Send + Sync,
{
    use rayon::prelude::*;
    if settings.num_workers == Some(1) {
        confluxes.iter_mut().try_for_each(f)
    } else {
        confluxes.par_iter_mut().try_for_each(f)
    }
}

#[cfg(not(feature = "parallel"))]
fn run_phase<F>(confluxes: &mut [Conflux], _settings: &SimSettings, f: F) -> EngineResult<()>
where
    F: Fn(&mut Conflux) -> EngineResult<()> + Send + Sync,
{
    confluxes.iter_mut().try_for_each(f)
}
