//! Engine observer trait for progress reporting and data collection.

use meso_core::{PersonId, Tick};

/// Callbacks invoked by [`Simulation::run`][crate::Simulation::run] at key
/// points in the tick loop.
///
/// All methods have default no-op implementations so implementors only need
/// to override what they care about.  Output formats live entirely behind
/// this seam — the engine never writes files.
pub trait EngineObserver {
    /// Called at the very start of each tick, before any phase.
    fn on_tick_start(&mut self, _tick: Tick) {}

    /// Called after the VQ flush of each tick.  `population` is the number
    /// of persons the engine still owns.
    fn on_tick_end(&mut self, _tick: Tick, _population: usize) {}

    /// Called once for every person whose trip chain completed this tick.
    fn on_person_done(&mut self, _person: PersonId, _tick: Tick) {}

    /// Called once after the final tick completes.
    fn on_sim_end(&mut self, _final_tick: Tick) {}
}

/// An [`EngineObserver`] that does nothing.
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}
