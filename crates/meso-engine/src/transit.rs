//! Seam to the bus-stop agent subsystem.
//!
//! Bus stops and their agents live outside the core.  The engine hands a
//! waiting person over by value when their chain switches to a
//! wait-for-bus activity, and pokes the stops on each conflux once per
//! tick after the main pass.

use meso_core::{ConfluxId, NodeId, Tick};

use crate::Person;

/// The bus-stop agent directory.
///
/// Implementations take ownership of waiting persons; the collaborating
/// subsystem returns them to the engine later (e.g. as bus passengers) via
/// the message bus.
pub trait TransitDirectory: Send + Sync {
    /// A person has started waiting for a bus at `stop`.
    fn waiting_person_arrival(&self, stop: NodeId, person: Person);

    /// Per-tick hook for the bus-stop agents on `conflux`, invoked after
    /// the conflux's main pass.
    fn update_stops(&self, _conflux: ConfluxId, _now: Tick) {}
}

/// A [`TransitDirectory`] for networks without transit: waiting persons
/// leave the simulation.
pub struct NoTransit;

impl TransitDirectory for NoTransit {
    fn waiting_person_arrival(&self, _stop: NodeId, _person: Person) {}
}
