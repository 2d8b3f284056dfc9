//! `meso-core` — foundational types for the mesosim conflux traffic engine.
//!
//! This crate is a dependency of every other `meso-*` crate.  It intentionally
//! has no `meso-*` dependencies and minimal external ones (only `rand` and
//! `thiserror`, plus optional `serde`).
//!
//! # What lives here
//!
//! | Module        | Contents                                                |
//! |---------------|---------------------------------------------------------|
//! | [`ids`]       | `PersonId`, `NodeId`, `LinkId`, `SegmentId`, `StatsId`, `ConfluxId` |
//! | [`time`]      | `Tick`                                                  |
//! | [`rng`]       | `ConfluxRng` (per-conflux, deterministic)               |
//! | [`role_kind`] | `RoleKind` enum                                         |
//! | [`settings`]  | `SimSettings`, `PASSENGER_CAR_UNIT_CM`                  |
//! | [`error`]     | `CoreError`, `CoreResult`                               |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public data types.   |

pub mod error;
pub mod ids;
pub mod rng;
pub mod role_kind;
pub mod settings;
pub mod time;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use error::{CoreError, CoreResult};
pub use ids::{ConfluxId, LinkId, NodeId, PersonId, SegmentId, StatsId};
pub use rng::ConfluxRng;
pub use role_kind::RoleKind;
pub use settings::{SimSettings, PASSENGER_CAR_UNIT_CM};
pub use time::Tick;
