//! The role tag shared across all engine crates.
//!
//! The engine never inherits from roles; it reads this tag plus a minimal
//! movement trait.  Full role behaviour (car-following, lane choice,
//! pedestrian physics) lives outside the core.

/// What a person is currently doing in their trip chain.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum RoleKind {
    /// Private car driver, advancing through segment stats.
    Driver,
    /// Bus driver; may be off the road while serving a stop.
    BusDriver,
    /// Cyclist; on-road like a driver, different vehicle length.
    Biker,
    /// On foot; owned via the conflux pedestrian list.
    Pedestrian,
    /// Waiting at a bus stop; held by the bus-stop agent.
    WaitBusActivity,
    /// Rail passenger; teleported, parked in the conflux MRT list.
    TrainPassenger,
    /// Passenger in someone else's car; teleported via the car-sharing list.
    CarPassenger,
    /// Performing an activity at a node.
    ActivityPerformer,
    /// Bus passenger riding a bus (carried by the bus driver's vehicle).
    Passenger,
}

impl RoleKind {
    /// `true` for roles that occupy a lane of some segment stats.
    #[inline]
    pub fn is_on_road(self) -> bool {
        matches!(self, RoleKind::Driver | RoleKind::BusDriver | RoleKind::Biker)
    }

    /// `true` for roles parked in an off-road conflux list during their
    /// whole trip-chain item.
    #[inline]
    pub fn is_teleported(self) -> bool {
        matches!(self, RoleKind::TrainPassenger | RoleKind::CarPassenger)
    }

    /// Human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::Driver => "driver",
            RoleKind::BusDriver => "bus_driver",
            RoleKind::Biker => "biker",
            RoleKind::Pedestrian => "pedestrian",
            RoleKind::WaitBusActivity => "wait_bus_activity",
            RoleKind::TrainPassenger => "train_passenger",
            RoleKind::CarPassenger => "car_passenger",
            RoleKind::ActivityPerformer => "activity_performer",
            RoleKind::Passenger => "passenger",
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
