//! The `Role` wrapper and the factory seam.

use meso_core::{PersonId, RoleKind};
use meso_trip::Leg;

use crate::Movement;

// ── VehicleResource ───────────────────────────────────────────────────────────

/// The physical vehicle a role controls, if any.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VehicleResource {
    /// Bumper-to-bumper length in centimetres.
    pub length_cm: f64,
    /// `false` while the vehicle is off the carriageway (e.g. a bus serving
    /// a stop).
    pub is_moving: bool,
}

impl VehicleResource {
    /// A standard passenger car, moving.
    pub fn car() -> Self {
        Self {
            length_cm: 400.0,
            is_moving: true,
        }
    }

    /// A standard 12 m bus, moving.
    pub fn bus() -> Self {
        Self {
            length_cm: 1_200.0,
            is_moving: true,
        }
    }
}

// ── Role ──────────────────────────────────────────────────────────────────────

/// A tagged role: the kind the engine dispatches on, the vehicle resource,
/// the movement implementation, and the travel-time accumulator the engine
/// collects on trip-chain switches.
pub struct Role {
    pub kind: RoleKind,
    pub resource: Option<VehicleResource>,
    pub movement: Box<dyn Movement>,
    travel_time_ms: Option<u64>,
}

impl Role {
    pub fn new(kind: RoleKind, resource: Option<VehicleResource>, movement: Box<dyn Movement>) -> Self {
        Self {
            kind,
            resource,
            movement,
            travel_time_ms: None,
        }
    }

    /// `true` unless the role's vehicle is parked off the carriageway.
    /// Roles without a vehicle count as moving.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.resource.map_or(true, |r| r.is_moving)
    }

    /// Vehicle length for capacity accounting; 0 for roles with no vehicle.
    #[inline]
    pub fn vehicle_length_cm(&self) -> f64 {
        self.resource.map_or(0.0, |r| r.length_cm)
    }

    /// Record the travel time of the current trip-chain item.
    pub fn set_travel_time(&mut self, ms: u64) {
        self.travel_time_ms = Some(ms);
    }

    /// Take the recorded travel time (the engine aggregates it per link on
    /// trip-chain switches).
    pub fn collect_travel_time(&mut self) -> Option<u64> {
        self.travel_time_ms.take()
    }
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Role")
            .field("kind", &self.kind)
            .field("resource", &self.resource)
            .field("travel_time_ms", &self.travel_time_ms)
            .finish_non_exhaustive()
    }
}

// ── RoleFactory ───────────────────────────────────────────────────────────────

/// Builds the role for a travel leg.
///
/// This is the application's extension point: the demand model decides what
/// kind of leg a person takes; the factory supplies the matching movement
/// implementation (routed path, vehicle, parameters).  Returning `None`
/// means no viable role could be built — the engine treats the person as
/// done, per the role-init-failure rule.
///
/// Called from conflux workers, so implementations must be `Send + Sync`.
pub trait RoleFactory: Send + Sync {
    fn make_role(&self, person: PersonId, leg: &Leg) -> Option<Role>;
}
