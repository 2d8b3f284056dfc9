//! Unit tests for trip chains.

use meso_core::{NodeId, RoleKind};

use crate::{Activity, ChainItem, ChainStatus, Leg, TripChain, TripError};

fn drive_leg(from: u32, to: u32) -> ChainItem {
    ChainItem::Leg(Leg {
        role: RoleKind::Driver,
        origin: NodeId(from),
        destination: NodeId(to),
        duration_ms: 0,
    })
}

fn activity(node: u32, start_ms: u64, end_ms: u64) -> ChainItem {
    ChainItem::Activity(Activity {
        location: NodeId(node),
        start_ms,
        end_ms,
    })
}

#[test]
fn fresh_chain_has_no_current_item() {
    let chain = TripChain::new(vec![drive_leg(0, 1)]).unwrap();
    assert!(chain.current().is_none());
}

#[test]
fn first_advance_lands_on_first_item() {
    let mut chain = TripChain::new(vec![drive_leg(0, 1), activity(1, 0, 60_000)]).unwrap();
    assert_eq!(chain.advance(), ChainStatus::Continue);
    assert_eq!(chain.current(), Some(&drive_leg(0, 1)));
}

#[test]
fn advance_walks_items_then_reports_done() {
    let mut chain =
        TripChain::new(vec![drive_leg(0, 1), activity(1, 0, 60_000), drive_leg(1, 0)]).unwrap();
    assert_eq!(chain.advance(), ChainStatus::Continue);
    assert_eq!(chain.advance(), ChainStatus::Continue);
    assert_eq!(chain.advance(), ChainStatus::Continue);
    assert_eq!(chain.advance(), ChainStatus::Done);
    assert!(chain.current().is_none());
}

#[test]
fn empty_chain_done_immediately() {
    let mut chain = TripChain::empty();
    assert_eq!(chain.advance(), ChainStatus::Done);
}

#[test]
fn inverted_activity_window_rejected() {
    let result = TripChain::new(vec![activity(0, 60_000, 0)]);
    assert!(matches!(
        result,
        Err(TripError::BadActivityWindow { item: 0 })
    ));
}

#[test]
fn activity_duration() {
    let ChainItem::Activity(act) = activity(0, 30_000, 90_000) else {
        unreachable!()
    };
    assert_eq!(act.duration_ms(), 60_000);
}
