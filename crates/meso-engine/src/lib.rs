//! `meso-engine` — the conflux tick engine.
//!
//! The road network is partitioned into *confluxes*, one per node with
//! inbound links; each conflux advances the persons on its upstream links
//! one tick at a time, under a per-person time budget, and exchanges
//! persons with its neighbours through bounded virtual queues and a message
//! bus.  See [`sim`] for the tick protocol and [`conflux`] for the
//! per-person state machine.
//!
//! # Crate layout
//!
//! | Module        | Contents                                              |
//! |---------------|-------------------------------------------------------|
//! | [`seg_stats`] | `SegmentStats`, `LaneParams` — per-lane occupancy     |
//! | [`conflux`]   | `Conflux`, `EngineCtx` — the per-tick state machine   |
//! | [`boundary`]  | `ConfluxBoundary` — virtual queues, admission bounds  |
//! | [`merge`]     | cross-link TopC ordering                              |
//! | [`messages`]  | `MessageBus`, `EngineMsg`                             |
//! | [`person`]    | `Person`, `PersonSnapshot`                            |
//! | [`directory`] | `StatsDirectory` — read-only stats lookup             |
//! | [`transit`]   | `TransitDirectory` — bus-stop agent seam              |
//! | [`sim`]       | `Simulation`, `SimulationBuilder` — the tick driver   |
//! | [`observer`]  | `EngineObserver`                                      |
//! | [`error`]     | `EngineError`, `EngineResult`                         |
//!
//! # Cargo features
//!
//! | Feature    | Effect                                                 |
//! |------------|--------------------------------------------------------|
//! | `parallel` | Runs each tick phase on Rayon's thread pool.           |

pub mod boundary;
pub mod conflux;
pub mod directory;
pub mod error;
pub mod merge;
pub mod messages;
pub mod observer;
pub mod person;
pub mod seg_stats;
pub mod sim;
pub mod transit;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use boundary::{ConfluxBoundary, VqState};
pub use conflux::{Conflux, EngineCtx};
pub use directory::{StatsDirectory, StatsMeta};
pub use error::{EngineError, EngineResult};
pub use messages::{EngineMsg, MessageBus};
pub use observer::{EngineObserver, NoopObserver};
pub use person::{Person, PersonSnapshot};
pub use seg_stats::{LaneParams, SegmentStats};
pub use sim::{Simulation, SimulationBuilder};
pub use transit::{NoTransit, TransitDirectory};
