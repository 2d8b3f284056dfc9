//! `meso-net` — the read-only road network consumed by the conflux engine.
//!
//! # Data layout
//!
//! The network is a directed multigraph: **nodes** joined by **links**, each
//! link an ordered, upstream-first run of **segments**.  Confluxes are keyed
//! by sink node, so the graph additionally carries an inbound-link adjacency
//! list per node (`in_links`), built once at `GraphBuilder::build` time.
//!
//! Everything here is immutable after `build()`; the engine shares one
//! `Arc<RoadGraph>` across all workers.  Per-segment *dynamic* state
//! (occupancy, queues, flow counters) lives in the engine's segment stats,
//! not here.
//!
//! Units: lengths in centimetres, speeds in cm/s, flow rates in vehicles
//! per second per lane.

pub mod error;
pub mod graph;

#[cfg(test)]
mod tests;

pub use error::{NetError, NetResult};
pub use graph::{GraphBuilder, Link, RoadGraph, Segment};
