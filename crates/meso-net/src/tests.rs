//! Unit tests for the road graph builder.

use meso_core::{LinkId, NodeId};

use crate::{GraphBuilder, NetError};

fn two_node_graph() -> crate::RoadGraph {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let c = b.add_node();
    let link = b.add_link(a, c);
    b.add_segment(link, 100_000.0, 2, 1_000.0, 0.5);
    b.build().unwrap()
}

#[test]
fn build_computes_inbound_adjacency() {
    let g = two_node_graph();
    assert_eq!(g.in_links(NodeId(0)), &[] as &[LinkId]);
    assert_eq!(g.in_links(NodeId(1)), &[LinkId(0)]);
}

#[test]
fn first_segment_is_upstream_most() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let c = b.add_node();
    let link = b.add_link(a, c);
    let s0 = b.add_segment(link, 50_000.0, 1, 1_000.0, 0.5);
    let s1 = b.add_segment(link, 50_000.0, 1, 1_000.0, 0.5);
    let g = b.build().unwrap();
    assert_eq!(g.first_segment(link), s0);
    assert_eq!(g.link(link).segments, vec![s0, s1]);
}

#[test]
fn empty_link_rejected() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let c = b.add_node();
    b.add_link(a, c);
    assert!(matches!(b.build(), Err(NetError::EmptyLink(_))));
}

#[test]
fn bad_endpoint_rejected() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let link = b.add_link(a, NodeId(5)); // node 5 never added
    b.add_segment(link, 1_000.0, 1, 1_000.0, 0.5);
    assert!(matches!(b.build(), Err(NetError::UnknownNode(NodeId(5)))));
}

#[test]
fn zero_lane_segment_rejected() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let c = b.add_node();
    let link = b.add_link(a, c);
    b.add_segment(link, 1_000.0, 0, 1_000.0, 0.5);
    assert!(matches!(b.build(), Err(NetError::BadSegment { .. })));
}

#[test]
fn split_segment_records_parts() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let c = b.add_node();
    let link = b.add_link(a, c);
    let seg = b.add_segment(link, 100_000.0, 1, 1_000.0, 0.5);
    b.split_segment(seg, 2);
    let g = b.build().unwrap();
    assert_eq!(g.segment(seg).stats_parts, 2);
}

#[test]
fn split_to_zero_clamps_to_one() {
    let mut b = GraphBuilder::new();
    let a = b.add_node();
    let c = b.add_node();
    let link = b.add_link(a, c);
    let seg = b.add_segment(link, 100_000.0, 1, 1_000.0, 0.5);
    b.split_segment(seg, 0);
    let g = b.build().unwrap();
    assert_eq!(g.segment(seg).stats_parts, 1);
}
