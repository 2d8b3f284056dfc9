//! Top-level simulation settings.
//!
//! Typically filled in by the application (config file, test harness) and
//! passed by handle to every conflux at construction — the engine never
//! consults a process-wide singleton on the hot path.

use crate::Tick;

/// Fixed passenger-car-unit length, in centimetres (4 m).
///
/// Used as the vehicle-length proxy in all segment capacity accounting:
/// a segment of polyline length `L` cm with `n` lanes holds
/// `ceil(L / PASSENGER_CAR_UNIT_CM) * n` car units.
pub const PASSENGER_CAR_UNIT_CM: f64 = 400.0;

/// Simulation-wide configuration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimSettings {
    /// Simulated seconds per tick.  The per-person time budget each tick.
    pub tick_seconds: f64,

    /// Total ticks to simulate.
    pub total_ticks: u64,

    /// Master RNG seed.  The same seed always produces identical TopCMerge
    /// tie-breaking.
    pub seed: u64,

    /// Worker count for conflux dispatch.  `None` uses all logical cores
    /// (with the `parallel` feature); `Some(1)` forces sequential updates.
    pub num_workers: Option<usize>,

    /// How many ticks ahead of `now` a freshly loaded person is stamped to
    /// start.  Mirrors the person-loading granularity of the demand side.
    pub person_load_lookahead_ticks: u64,
}

impl SimSettings {
    /// One tick expressed in milliseconds (the base granularity used by trip
    /// chains, activity windows, and delayed messages).
    #[inline]
    pub fn base_gran_ms(&self) -> u64 {
        (self.tick_seconds * 1000.0).round() as u64
    }

    /// Millisecond timestamp of the start of `tick`.
    #[inline]
    pub fn tick_ms(&self, tick: Tick) -> u64 {
        tick.0 * self.base_gran_ms()
    }

    /// Whole ticks spanned by `ms` milliseconds (truncating, matching the
    /// teleportation wake-up offset arithmetic).
    #[inline]
    pub fn ticks_for_ms(&self, ms: u64) -> u64 {
        ms / self.base_gran_ms()
    }

    /// The tick at which the simulation ends (exclusive upper bound).
    #[inline]
    pub fn end_tick(&self) -> Tick {
        Tick(self.total_ticks)
    }
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tick_seconds: 5.0,
            total_ticks: 0,
            seed: 0,
            num_workers: Some(1),
            person_load_lookahead_ticks: 1,
        }
    }
}
