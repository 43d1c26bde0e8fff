//! Deterministic splittable random stream.
//!
//! The layer carries one master stream seeded at construction. Every
//! stochastic site (winner tie-breaking, synapse source sampling, receptive
//! field initialization) splits off a fresh child stream instead of consuming
//! the master directly: the master advances by exactly one seed draw per
//! split, so results do not depend on how much randomness each site consumes.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// A splittable wrapper around the standard seedable generator.
#[derive(Debug, Clone)]
pub struct SplitRng {
    rng: StdRng,
}

impl SplitRng {
    /// Creates a master stream from a 64-bit seed.
    #[inline]
    pub fn seed_from(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Splits a fresh sub-stream off the master stream.
    #[inline]
    pub fn split(&mut self) -> StdRng {
        let mut seed = [0u8; 32];
        self.rng.fill(&mut seed[..]);
        StdRng::from_seed(seed)
    }
}
