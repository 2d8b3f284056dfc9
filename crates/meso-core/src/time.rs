//! Simulation time model.
//!
//! Time is a monotonically increasing `Tick` counter.  One tick represents
//! `SimSettings::tick_seconds` of simulated time (typically 5 s for meso
//! supply simulation); the millisecond mapping used by trip chains and
//! delayed messages is `tick.0 * SimSettings::base_gran_ms()`.
//!
//! Using an integer tick as the canonical time unit keeps all schedule
//! arithmetic exact and comparisons O(1); fractional seconds only exist
//! *inside* a tick, as the per-person remaining-time budget.

use std::fmt;

/// An absolute simulation tick counter.
///
/// Stored as `u64`: at 10 ticks per simulated second a u64 still lasts
/// billions of simulated years, so overflow is not a practical concern.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Return the tick `n` steps after `self`.
    #[inline]
    pub fn offset(self, n: u64) -> Tick {
        Tick(self.0 + n)
    }

    /// Ticks elapsed from `earlier` to `self`.
    ///
    /// # Panics
    /// Panics in debug mode if `earlier > self`.
    #[inline]
    pub fn since(self, earlier: Tick) -> u64 {
        self.0 - earlier.0
    }

    /// The tick as a signed frame number, for comparison against the
    /// "never updated" sentinel (`-1`) used in conflux bookkeeping.
    #[inline]
    pub fn frame(self) -> i64 {
        self.0 as i64
    }
}

impl std::ops::Add<u64> for Tick {
    type Output = Tick;
    #[inline]
    fn add(self, rhs: u64) -> Tick {
        Tick(self.0 + rhs)
    }
}

impl std::ops::Sub for Tick {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Tick) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
