//! Road network representation and builder.

use meso_core::{LinkId, NodeId, SegmentId};

use crate::{NetError, NetResult};

// ── Link ──────────────────────────────────────────────────────────────────────

/// A directed link: an ordered run of segments from `from` to `to`.
///
/// `segments` is upstream-first: `segments[0]` touches `from`, the last
/// segment touches `to`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    pub from: NodeId,
    pub to: NodeId,
    pub segments: Vec<SegmentId>,
}

// ── Segment ───────────────────────────────────────────────────────────────────

/// Static properties of one road segment.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// The link this segment belongs to.
    pub link: LinkId,

    /// Polyline length in centimetres.
    pub length_cm: f64,

    /// Number of real lanes (lane-infinity is not counted here).
    pub lanes: u8,

    /// Free-flow speed in cm/s.
    pub free_speed_cm_s: f64,

    /// Saturation outflow in vehicles per second, per lane.  Seeds each
    /// lane's per-tick output counter.
    pub output_flow_veh_s: f64,

    /// How many segment-stats slices this segment is split into.  Default 1;
    /// the engine materialises `stats_parts` equal-length stats.
    pub stats_parts: u16,
}

// ── RoadGraph ─────────────────────────────────────────────────────────────────

/// Immutable directed road graph.
///
/// All fields are reachable through accessors only; construct via
/// [`GraphBuilder`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadGraph {
    node_count: usize,
    links: Vec<Link>,
    segments: Vec<Segment>,
    /// Inbound links per node, in insertion order.  A node with a non-empty
    /// entry hosts a conflux.
    node_in_links: Vec<Vec<LinkId>>,
}

impl RoadGraph {
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.index()]
    }

    #[inline]
    pub fn segment(&self, id: SegmentId) -> &Segment {
        &self.segments[id.index()]
    }

    /// Links flowing into `node` (the upstream links of the node's conflux).
    #[inline]
    pub fn in_links(&self, node: NodeId) -> &[LinkId] {
        &self.node_in_links[node.index()]
    }

    /// The upstream-most segment of `link`.
    #[inline]
    pub fn first_segment(&self, link: LinkId) -> SegmentId {
        self.links[link.index()].segments[0]
    }

    /// Iterator over all node ids.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.node_count as u32).map(NodeId)
    }

    /// Iterator over all link ids.
    pub fn links(&self) -> impl Iterator<Item = LinkId> {
        (0..self.links.len() as u32).map(LinkId)
    }
}

// ── GraphBuilder ──────────────────────────────────────────────────────────────

/// Construct a [`RoadGraph`] incrementally, then call [`build`](Self::build).
///
/// Nodes, links, and segments are added in any order relative to one
/// another, except that a segment's link must already exist.  `build()`
/// validates the topology and computes the inbound-link adjacency.
///
/// # Example
///
/// ```
/// use meso_net::GraphBuilder;
///
/// let mut b = GraphBuilder::new();
/// let a = b.add_node();
/// let c = b.add_node();
/// let link = b.add_link(a, c);
/// // 1 km, 2 lanes, 10 m/s free flow, 0.5 veh/s/lane outflow
/// b.add_segment(link, 100_000.0, 2, 1_000.0, 0.5);
/// let graph = b.build().unwrap();
/// assert_eq!(graph.in_links(c), &[link]);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    node_count: usize,
    links: Vec<Link>,
    segments: Vec<Segment>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its `NodeId` (sequential from 0).
    pub fn add_node(&mut self) -> NodeId {
        let id = NodeId(self.node_count as u32);
        self.node_count += 1;
        id
    }

    /// Add a directed link from `from` to `to` with no segments yet.
    pub fn add_link(&mut self, from: NodeId, to: NodeId) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(Link {
            from,
            to,
            segments: Vec::new(),
        });
        id
    }

    /// Append a segment to `link` (segments are upstream-first in insertion
    /// order).
    ///
    /// # Panics
    /// Panics if `link` was not returned by a prior `add_link` call.
    pub fn add_segment(
        &mut self,
        link: LinkId,
        length_cm: f64,
        lanes: u8,
        free_speed_cm_s: f64,
        output_flow_veh_s: f64,
    ) -> SegmentId {
        let id = SegmentId(self.segments.len() as u32);
        self.segments.push(Segment {
            link,
            length_cm,
            lanes,
            free_speed_cm_s,
            output_flow_veh_s,
            stats_parts: 1,
        });
        self.links[link.index()].segments.push(id);
        id
    }

    /// Split `segment` into `parts` equal-length stats slices.
    ///
    /// # Panics
    /// Panics if `segment` does not exist.
    pub fn split_segment(&mut self, segment: SegmentId, parts: u16) {
        self.segments[segment.index()].stats_parts = parts.max(1);
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    ///
    /// - [`NetError::UnknownNode`] if a link endpoint is out of range.
    /// - [`NetError::EmptyLink`] if a link has no segments.
    /// - [`NetError::BadSegment`] for non-positive length or speed, or zero
    ///   lanes.
    pub fn build(self) -> NetResult<RoadGraph> {
        for (i, link) in self.links.iter().enumerate() {
            let id = LinkId(i as u32);
            if link.from.index() >= self.node_count {
                return Err(NetError::UnknownNode(link.from));
            }
            if link.to.index() >= self.node_count {
                return Err(NetError::UnknownNode(link.to));
            }
            if link.segments.is_empty() {
                return Err(NetError::EmptyLink(id));
            }
        }
        for (i, seg) in self.segments.iter().enumerate() {
            let id = SegmentId(i as u32);
            if seg.length_cm <= 0.0 {
                return Err(NetError::BadSegment {
                    segment: id,
                    reason: "length must be positive",
                });
            }
            if seg.lanes == 0 {
                return Err(NetError::BadSegment {
                    segment: id,
                    reason: "segment needs at least one lane",
                });
            }
            if seg.free_speed_cm_s <= 0.0 {
                return Err(NetError::BadSegment {
                    segment: id,
                    reason: "free speed must be positive",
                });
            }
        }

        let mut node_in_links = vec![Vec::new(); self.node_count];
        for (i, link) in self.links.iter().enumerate() {
            node_in_links[link.to.index()].push(LinkId(i as u32));
        }

        Ok(RoadGraph {
            node_count: self.node_count,
            links: self.links,
            segments: self.segments,
            node_in_links,
        })
    }
}
