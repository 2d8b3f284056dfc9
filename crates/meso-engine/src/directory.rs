//! Read-only directory of every segment-stats slice in the network.
//!
//! Built once when the simulation is assembled and shared by all workers.
//! Cross-conflux references are always `StatsId`s resolved here — a person
//! never holds a pointer into another conflux's mutable state.

use meso_core::{ConfluxId, LinkId, NodeId, SegmentId, StatsId};

/// Static facts about one stats slice.
#[derive(Clone, Debug)]
pub struct StatsMeta {
    pub segment: SegmentId,
    pub link: LinkId,
    pub conflux: ConfluxId,
    /// 1-based position of this slice within its segment.
    pub stats_number: u16,
    /// Index into the owning conflux's local stats arena.
    pub local_index: usize,
    pub length_cm: f64,
    pub lanes: u8,
    pub free_speed_cm_s: f64,
}

/// Immutable lookup tables for stats, links, and conflux placement.
pub struct StatsDirectory {
    metas: Vec<StatsMeta>,
    /// Stats of each link, upstream-first across segments and splits.
    link_stats: Vec<Vec<StatsId>>,
    /// Conflux hosted at each node, if the node has inbound links.
    conflux_of_node: Vec<Option<ConfluxId>>,
}

impl StatsDirectory {
    pub(crate) fn new(
        metas: Vec<StatsMeta>,
        link_stats: Vec<Vec<StatsId>>,
        conflux_of_node: Vec<Option<ConfluxId>>,
    ) -> Self {
        Self {
            metas,
            link_stats,
            conflux_of_node,
        }
    }

    pub fn stats_count(&self) -> usize {
        self.metas.len()
    }

    /// Static facts about `stats`, or `None` for an id outside the network.
    #[inline]
    pub fn meta(&self, stats: StatsId) -> Option<&StatsMeta> {
        self.metas.get(stats.index())
    }

    /// The conflux owning `stats`.
    #[inline]
    pub fn conflux_of(&self, stats: StatsId) -> Option<ConfluxId> {
        self.meta(stats).map(|m| m.conflux)
    }

    /// The link `stats` lies on.
    #[inline]
    pub fn link_of(&self, stats: StatsId) -> Option<LinkId> {
        self.meta(stats).map(|m| m.link)
    }

    /// All stats of `link`, upstream-first.
    #[inline]
    pub fn stats_of_link(&self, link: LinkId) -> &[StatsId] {
        &self.link_stats[link.index()]
    }

    /// Like [`stats_of_link`](Self::stats_of_link) but `None` for a link
    /// outside the network (untrusted input from a movement).
    #[inline]
    pub fn try_stats_of_link(&self, link: LinkId) -> Option<&[StatsId]> {
        self.link_stats.get(link.index()).map(Vec::as_slice)
    }

    /// The upstream-most stats of `link`.
    #[inline]
    pub fn first_stats_of_link(&self, link: LinkId) -> StatsId {
        self.link_stats[link.index()][0]
    }

    /// The conflux hosted at `node`, if any (nodes without inbound links
    /// host none).
    #[inline]
    pub fn conflux_for_node(&self, node: NodeId) -> Option<ConfluxId> {
        self.conflux_of_node
            .get(node.index())
            .copied()
            .flatten()
    }
}
