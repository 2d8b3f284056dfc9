//! `meso-trip` — the daily trip chain a person executes.
//!
//! A trip chain is an ordered list of items, each either an **activity**
//! (wait at a node for a time window) or a travel **leg** (play a role from
//! an origin to a destination).  The engine advances the chain cursor when a
//! role reports its sub-trip complete; the chain answers with
//! [`ChainStatus::Done`] once exhausted and the person leaves the
//! simulation.
//!
//! Chains are data, not behaviour: which role object executes a leg is
//! decided by the engine's role factory, keyed on [`Leg::role`].

pub mod chain;
pub mod error;

#[cfg(test)]
mod tests;

pub use chain::{Activity, ChainItem, ChainStatus, Leg, TripChain};
pub use error::{TripError, TripResult};
