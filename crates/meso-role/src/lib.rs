//! `meso-role` — the seam between the conflux engine and role behaviour.
//!
//! The engine does not know how a driver follows the car ahead or how a
//! pedestrian picks a crossing; it only drives a per-tick time budget
//! through the [`Movement`] trait and reads the person's [`MotionState`]
//! afterwards.  Full role implementations live outside the core; this crate
//! ships the trait, the shared state they mutate, and two reference
//! implementations ([`CruiseMovement`], [`ActivityMovement`]) that the
//! engine's tests and demos plug in.
//!
//! # The movement contract
//!
//! A `frame_tick` call is expected to consume some of
//! `MotionState::remaining_secs` and exit in one of four ways:
//!
//! 1. remaining time is zero (budget spent mid-segment);
//! 2. remaining time positive, `requested_next_stats` set (arrived at a
//!    stats boundary and needs admission downstream);
//! 3. `to_be_removed` set (sub-trip complete);
//! 4. `next_link_required` set (pedestrian cross-conflux hand-off).
//!
//! The engine owns the loop and the budget; the movement owns the in-stats
//! physics.  See [`Movement::frame_tick`] for the admission-grant contract.

pub mod motion;
pub mod movement;
pub mod reference;
pub mod role;

#[cfg(test)]
mod tests;

pub use motion::{AdmissionGrant, LaneSlot, MotionState};
pub use movement::{MoveCtx, Movement, StatsAccess};
pub use reference::{ActivityMovement, CruiseMovement, IdleMovement};
pub use role::{Role, RoleFactory, VehicleResource};
