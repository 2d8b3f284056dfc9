//! End-to-end scenarios for the conflux tick engine.
//!
//! Each test wires a tiny road graph, a scripted role factory, and a
//! single-worker simulation, then drives whole ticks and asserts on
//! container membership, flow counters, and virtual-queue traffic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meso_core::{LinkId, NodeId, PersonId, RoleKind, SimSettings, StatsId, Tick};
use meso_engine::{EngineMsg, NoopObserver, Simulation, SimulationBuilder};
use meso_net::GraphBuilder;
use meso_role::{
    CruiseMovement, IdleMovement, MoveCtx, Movement, Role, RoleFactory, VehicleResource,
};
use meso_trip::{Activity, ChainItem, Leg, TripChain};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn settings(total_ticks: u64) -> SimSettings {
    SimSettings {
        tick_seconds: 1.0,
        total_ticks,
        seed: 42,
        num_workers: Some(1),
        person_load_lookahead_ticks: 1,
    }
}

fn drive(origin: NodeId, destination: NodeId) -> ChainItem {
    ChainItem::Leg(Leg {
        role: RoleKind::Driver,
        origin,
        destination,
        duration_ms: 0,
    })
}

fn activity(location: NodeId, duration_ms: u64) -> ChainItem {
    ChainItem::Activity(Activity {
        location,
        start_ms: 0,
        end_ms: duration_ms,
    })
}

/// Role factory with routes registered after the simulation is built (the
/// directory assigns stats ids at build time).
#[derive(Clone, Default)]
struct RouteFactory {
    routes: Arc<Mutex<HashMap<(u32, u32), (Vec<StatsId>, f64)>>>,
}

impl RouteFactory {
    fn set_route(&self, origin: NodeId, destination: NodeId, path: Vec<StatsId>, speed_cm_s: f64) {
        self.routes
            .lock()
            .unwrap()
            .insert((origin.0, destination.0), (path, speed_cm_s));
    }
}

impl RoleFactory for RouteFactory {
    fn make_role(&self, _person: PersonId, leg: &Leg) -> Option<Role> {
        match leg.role {
            RoleKind::Driver | RoleKind::Biker | RoleKind::BusDriver => {
                let routes = self.routes.lock().unwrap();
                let (path, speed) = routes.get(&(leg.origin.0, leg.destination.0))?.clone();
                let resource = if leg.role == RoleKind::BusDriver {
                    VehicleResource::bus()
                } else {
                    VehicleResource::car()
                };
                Some(Role::new(
                    leg.role,
                    Some(resource),
                    Box::new(CruiseMovement::new(path, speed)),
                ))
            }
            RoleKind::Pedestrian
            | RoleKind::WaitBusActivity
            | RoleKind::TrainPassenger
            | RoleKind::CarPassenger => Some(Role::new(leg.role, None, Box::new(IdleMovement))),
            _ => None,
        }
    }
}

// ── S1: crossing stats within one link, no VQ traffic ─────────────────────────

/// One link split into two stats on the same conflux: the boundary request
/// is granted against the output counter alone and never touches a virtual
/// queue.
#[test]
fn driver_crosses_stats_within_link_without_vq() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let link = b.add_link(a, nb);
    let seg = b.add_segment(link, 50_000.0, 1, 25_000.0, 1.0);
    b.split_segment(seg, 2);
    let graph = b.build().unwrap();

    let factory = RouteFactory::default();
    let mut sim = SimulationBuilder::new(settings(10), graph, factory.clone()).build();
    let stats = sim.directory().stats_of_link(link).to_vec();
    assert_eq!(stats.len(), 2);
    factory.set_route(a, nb, stats, 25_000.0);

    let chain =
        TripChain::new(vec![drive(a, nb), activity(nb, 10_000)]).unwrap();
    let p = sim.spawn(chain);
    let c0 = sim.directory().conflux_for_node(nb).unwrap();

    // T0 dispatches; T1 the driver enters stats 1 and reaches its end.
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert_eq!(sim.owner_of(p), Some(c0));
    assert_eq!(
        sim.conflux(c0).find_seg_stats(seg, 1).unwrap().num_persons(),
        1
    );

    // T2: the crossing is granted (same conflux == already updated), the
    // driver traverses stats 2 and switches into the activity at the end.
    sim.run_ticks(1, &mut NoopObserver).unwrap();
    let cfx = sim.conflux(c0);
    assert!(cfx.in_activity_list(p));
    let first = cfx.find_seg_stats(seg, 1).unwrap();
    assert_eq!(first.flow_count(), 1, "exactly one granted crossing");
    assert_eq!(first.num_persons(), 0);
    assert_eq!(sim.boundary(c0).total_queued(), 0, "no VQ traffic");
}

// ── S2: downstream conflux not yet updated → VQ then flush ───────────────────

#[test]
fn crossing_into_pending_conflux_goes_through_virtual_queue() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let nc = b.add_node();
    let l1 = b.add_link(a, nb);
    let l2 = b.add_link(nb, nc);
    let s1 = b.add_segment(l1, 25_000.0, 1, 25_000.0, 1.0);
    let s2 = b.add_segment(l2, 50_000.0, 1, 25_000.0, 1.0);
    let graph = b.build().unwrap();

    let factory = RouteFactory::default();
    let mut sim = SimulationBuilder::new(settings(10), graph, factory.clone()).build();
    let mut path = sim.directory().stats_of_link(l1).to_vec();
    path.extend_from_slice(sim.directory().stats_of_link(l2));
    factory.set_route(a, nc, path, 50_000.0);

    let chain = TripChain::new(vec![drive(a, nc), activity(nc, 10_000)]).unwrap();
    let p = sim.spawn(chain);
    let c0 = sim.directory().conflux_for_node(nb).unwrap();
    let c1 = sim.directory().conflux_for_node(nc).unwrap();

    // T1: the driver clears link 1 mid-tick; conflux c1 has not updated
    // yet, so the grant parks the driver on c1's VQ, and c1's flush admits
    // it into s2 with the leftover half-tick.
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert_eq!(sim.owner_of(p), Some(c1));
    assert_eq!(
        sim.conflux(c1).find_seg_stats(s2, 1).unwrap().num_persons(),
        1
    );
    let upstream = sim.conflux(c0).find_seg_stats(s1, 1).unwrap();
    assert_eq!(upstream.flow_count(), 1, "output counter consumed once");
    assert_eq!(upstream.num_persons(), 0);
    assert_eq!(sim.conflux(c0).num_remaining_in_lane_infinity(), 0);
    assert_eq!(sim.boundary(c1).total_queued(), 0, "queue flushed");

    // Remaining-time budget stays within the tick bounds throughout.
    let person = sim.conflux(c1).person(p).unwrap();
    assert!(person.motion.remaining_secs >= 0.0 && person.motion.remaining_secs <= 1.0);

    // T2: the driver finishes s2 and enters the activity at nc.
    sim.run_ticks(1, &mut NoopObserver).unwrap();
    assert!(sim.conflux(c1).in_activity_list(p));
}

// ── S3: VQ full → denial, retry next tick ────────────────────────────────────

fn vq_contention_sim() -> (Simulation, PersonId, PersonId, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let nc = b.add_node();
    let l1 = b.add_link(a, nb);
    let l2 = b.add_link(nb, nc);
    // Downstream segment holds exactly one car unit, so the VQ bound is 1.
    b.add_segment(l1, 25_000.0, 1, 25_000.0, 5.0);
    b.add_segment(l2, 400.0, 1, 25_000.0, 5.0);
    let graph = b.build().unwrap();

    let factory = RouteFactory::default();
    let mut sim = SimulationBuilder::new(settings(10), graph, factory.clone()).build();
    let mut path = sim.directory().stats_of_link(l1).to_vec();
    path.extend_from_slice(sim.directory().stats_of_link(l2));
    factory.set_route(a, nc, path, 50_000.0);

    let chain = TripChain::new(vec![drive(a, nc), activity(nc, 60_000)]).unwrap();
    let p1 = sim.spawn(chain.clone());
    let p2 = sim.spawn(chain);
    (sim, p1, p2, nb, nc)
}

#[test]
fn full_virtual_queue_denies_admission_until_next_tick() {
    let (mut sim, p1, p2, nb, nc) = vq_contention_sim();
    let c0 = sim.directory().conflux_for_node(nb).unwrap();
    let c1 = sim.directory().conflux_for_node(nc).unwrap();

    // T1: both drivers hit the link end.  The VQ bound downstream is 1, so
    // one is admitted and the other is denied and queues locally.
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    let stuck: Vec<PersonId> = [p1, p2]
        .into_iter()
        .filter(|&p| sim.conflux(c0).contains_person(p))
        .collect();
    assert_eq!(stuck.len(), 1, "exactly one driver denied");
    let person = sim.conflux(c0).person(stuck[0]).unwrap();
    assert!(person.motion.is_queuing, "denied driver queues locally");

    let through: PersonId = if stuck[0] == p1 { p2 } else { p1 };
    assert!(sim.conflux(c1).in_activity_list(through));

    // Next ticks: the downstream space frees up and the stuck driver
    // retries successfully.
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert!(sim.conflux(c1).in_activity_list(p1));
    assert!(sim.conflux(c1).in_activity_list(p2));
    assert_eq!(sim.conflux(c0).population(), 0);
}

// ── L1: fixed-seed replay determinism ────────────────────────────────────────

fn contention_trace() -> Vec<(u64, Option<u32>, Option<u32>)> {
    let (mut sim, p1, p2, _, _) = vq_contention_sim();
    let mut trace = Vec::new();
    for _ in 0..6 {
        sim.tick().unwrap();
        for p in [p1, p2] {
            let owner = sim.owner_of(p);
            let stats = owner
                .and_then(|c| sim.conflux(c).person(p))
                .and_then(|person| person.motion.curr_stats)
                .map(|s| s.0);
            trace.push((sim.now().0, owner.map(|c| c.0), stats));
        }
    }
    trace
}

#[test]
fn replay_with_fixed_seed_is_identical() {
    assert_eq!(contention_trace(), contention_trace());
}

// ── S4: activity → driver transition ─────────────────────────────────────────

#[test]
fn activity_end_starts_next_trip_on_neighbour_conflux() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let nc = b.add_node();
    let l1 = b.add_link(a, nb);
    let l2 = b.add_link(nb, nc);
    b.add_segment(l1, 25_000.0, 1, 25_000.0, 1.0);
    let s2 = b.add_segment(l2, 50_000.0, 1, 25_000.0, 1.0);
    let graph = b.build().unwrap();

    let factory = RouteFactory::default();
    let mut sim = SimulationBuilder::new(settings(10), graph, factory.clone()).build();
    factory.set_route(nb, nc, sim.directory().stats_of_link(l2).to_vec(), 1_000.0);

    let chain = TripChain::new(vec![
        activity(nb, 2_000),
        drive(nb, nc),
        activity(nc, 10_000),
    ])
    .unwrap();
    let p = sim.spawn(chain);
    let c0 = sim.directory().conflux_for_node(nb).unwrap();
    let c1 = sim.directory().conflux_for_node(nc).unwrap();

    // T1: dispatched into c0's activity list (window anchored to end at
    // 4000 ms = tick 4).
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert!(sim.conflux(c0).in_activity_list(p));

    // T4: activity over; the new driver role starts on l2, whose stats
    // belong to c1 — the person leaves the activity list and appears on
    // the neighbour conflux the same tick.
    sim.run_ticks(3, &mut NoopObserver).unwrap();
    assert!(!sim.conflux(c0).in_activity_list(p));
    assert_eq!(sim.owner_of(p), Some(c1));
    assert_eq!(
        sim.conflux(c1).find_seg_stats(s2, 1).unwrap().num_persons(),
        1
    );
    assert_eq!(
        sim.conflux(c1).person(p).unwrap().last_updated_frame,
        4,
        "switch happened on the tick the window closed"
    );
}

// ── S5: pedestrian cross-conflux hand-off ────────────────────────────────────

/// Scripted pedestrian that immediately asks to cross into `link`.
struct WalkAcross {
    link: LinkId,
    fired: bool,
}

impl Movement for WalkAcross {
    fn frame_init(&mut self, _ctx: &mut MoveCtx<'_>) -> bool {
        true
    }

    fn frame_tick(&mut self, ctx: &mut MoveCtx<'_>) {
        if !self.fired {
            self.fired = true;
            ctx.state.next_link_required = Some(self.link);
        }
        ctx.state.remaining_secs = 0.0;
    }
}

struct WalkFactory {
    link: LinkId,
}

impl RoleFactory for WalkFactory {
    fn make_role(&self, _person: PersonId, leg: &Leg) -> Option<Role> {
        (leg.role == RoleKind::Pedestrian).then(|| {
            Role::new(
                RoleKind::Pedestrian,
                None,
                Box::new(WalkAcross {
                    link: self.link,
                    fired: false,
                }),
            )
        })
    }
}

#[test]
fn pedestrian_transfer_moves_person_to_link_conflux() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let nc = b.add_node();
    let l1 = b.add_link(a, nb);
    let l2 = b.add_link(nb, nc);
    b.add_segment(l1, 25_000.0, 1, 25_000.0, 1.0);
    b.add_segment(l2, 25_000.0, 1, 25_000.0, 1.0);
    let graph = b.build().unwrap();

    let mut sim =
        SimulationBuilder::new(settings(10), graph, WalkFactory { link: l2 }).build();
    let chain = TripChain::new(vec![ChainItem::Leg(Leg {
        role: RoleKind::Pedestrian,
        origin: nb,
        destination: nc,
        duration_ms: 0,
    })])
    .unwrap();
    let p = sim.spawn(chain);
    let c0 = sim.directory().conflux_for_node(nb).unwrap();
    let c1 = sim.directory().conflux_for_node(nc).unwrap();

    // T1: the pedestrian is processed on c0, requests the crossing, and is
    // gone from c0's list on return — the person now travels by message.
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert!(!sim.conflux(c0).in_pedestrian_list(p));
    assert!(!sim.conflux(c0).contains_person(p));

    // T2: the transfer message lands and c1 takes ownership.
    sim.run_ticks(1, &mut NoopObserver).unwrap();
    assert_eq!(sim.owner_of(p), Some(c1));
    assert!(sim.conflux(c1).in_pedestrian_list(p));
}

// ── S6: teleported transit passenger ─────────────────────────────────────────

#[test]
fn train_passenger_wakes_after_leg_duration() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let l1 = b.add_link(a, nb);
    b.add_segment(l1, 25_000.0, 1, 25_000.0, 1.0);
    let graph = b.build().unwrap();

    let factory = RouteFactory::default();
    let mut sim = SimulationBuilder::new(settings(200), graph, factory).build();
    let chain = TripChain::new(vec![
        ChainItem::Leg(Leg {
            role: RoleKind::TrainPassenger,
            origin: nb,
            destination: nb,
            duration_ms: 120_000,
        }),
        activity(nb, 10_000),
    ])
    .unwrap();
    let p = sim.spawn(chain);
    let c0 = sim.directory().conflux_for_node(nb).unwrap();

    // T1: parked in the MRT list with a wake-up 120 ticks out.
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert!(sim.conflux(c0).in_mrt_list(p));
    assert_eq!(sim.bus().delayed_count(), 1);
    assert_eq!(sim.bus().next_delayed_tick(), Some(Tick(121)));

    // T121: the wake-up fires, the chain advances, and the person becomes
    // an activity performer.
    sim.run_ticks(120, &mut NoopObserver).unwrap();
    assert!(!sim.conflux(c0).in_mrt_list(p));
    assert!(sim.conflux(c0).in_activity_list(p));
}

// ── Incidents ────────────────────────────────────────────────────────────────

#[test]
fn incident_blocks_outflow_until_removed() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let link = b.add_link(a, nb);
    let seg = b.add_segment(link, 25_000.0, 1, 25_000.0, 1.0);
    b.split_segment(seg, 2);
    let graph = b.build().unwrap();

    let factory = RouteFactory::default();
    let mut sim = SimulationBuilder::new(settings(20), graph, factory.clone()).build();
    let stats = sim.directory().stats_of_link(link).to_vec();
    factory.set_route(a, nb, stats.clone(), 25_000.0);

    let chain = TripChain::new(vec![drive(a, nb), activity(nb, 60_000)]).unwrap();
    let p = sim.spawn(chain);
    let c0 = sim.directory().conflux_for_node(nb).unwrap();

    // Zero outflow before the driver reaches the segment end.
    sim.conflux_mut(c0).insert_incident(stats[0], 0.0);

    sim.run_ticks(4, &mut NoopObserver).unwrap();
    assert!(sim.conflux(c0).contains_person(p), "stuck behind incident");
    assert!(!sim.conflux(c0).in_activity_list(p));

    sim.conflux_mut(c0).remove_incident(stats[0]);
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    assert!(sim.conflux(c0).in_activity_list(p), "flows again");
}

#[test]
fn incident_on_unknown_stats_is_ignored() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let link = b.add_link(a, nb);
    b.add_segment(link, 25_000.0, 1, 25_000.0, 1.0);
    let graph = b.build().unwrap();

    let mut sim = SimulationBuilder::new(settings(5), graph, RouteFactory::default()).build();
    let c0 = sim.directory().conflux_for_node(nb).unwrap();
    sim.conflux_mut(c0).insert_incident(StatsId(999), 0.0);
    sim.run(&mut NoopObserver).unwrap();
}

#[test]
fn incident_message_overrides_flow_rate() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let nb = b.add_node();
    let link = b.add_link(a, nb);
    let seg = b.add_segment(link, 25_000.0, 1, 25_000.0, 1.0);
    let graph = b.build().unwrap();

    let mut sim = SimulationBuilder::new(settings(5), graph, RouteFactory::default()).build();
    let c0 = sim.directory().conflux_for_node(nb).unwrap();
    let stats = sim.directory().stats_of_link(link).to_vec();

    sim.bus().post(
        c0,
        EngineMsg::InsertIncident {
            stats: stats.clone(),
            flow_veh_s: 0.0,
        },
    );
    sim.run_ticks(2, &mut NoopObserver).unwrap();
    let lane = sim
        .conflux(c0)
        .find_seg_stats(seg, 1)
        .unwrap()
        .lane_params(0);
    assert_eq!(lane.output_flow_veh_s(), 0.0);
}
