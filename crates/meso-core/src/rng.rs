//! Deterministic per-conflux RNG.
//!
//! # Determinism strategy
//!
//! Each conflux gets its own independent `SmallRng` seeded by:
//!
//!   seed = global_seed XOR (conflux_id * MIXING_CONSTANT)
//!
//! The mixing constant is the 64-bit fractional part of the golden ratio,
//! which spreads consecutive conflux IDs uniformly across the seed space.
//! This means:
//!
//! - Confluxes never share RNG state (no contention, no ordering dependency
//!   between workers).
//! - The only randomness in the engine — TopCMerge tie-breaking between
//!   persons with equal predicted time-to-link-end — is reproducible run to
//!   run for a fixed master seed, regardless of worker scheduling.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::ConfluxId;

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Per-conflux deterministic RNG.
///
/// Create one per conflux at network load; the type is `Send` but not
/// `Sync` — each worker mutates only the RNGs of the confluxes it owns.
pub struct ConfluxRng(SmallRng);

impl ConfluxRng {
    /// Seed deterministically from the run's master seed and a conflux ID.
    pub fn new(global_seed: u64, conflux: ConfluxId) -> Self {
        let seed = global_seed ^ (conflux.0 as u64).wrapping_mul(MIXING_CONSTANT);
        ConfluxRng(SmallRng::seed_from_u64(seed))
    }

    /// Uniformly choose an index in `0..n`.
    ///
    /// # Panics
    /// Panics if `n == 0`.
    #[inline]
    pub fn pick(&mut self, n: usize) -> usize {
        self.0.gen_range(0..n)
    }
}
