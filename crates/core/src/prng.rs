//! Deterministic PRNGs for reproducible flow fields.
//!
//! Two generators live here:
//!
//! - [`Xorshift32`] drives the permutation-table shuffle of the simplex noise.
//!   Its (13, 17, 5) shift triple and `state / 2^32` float mapping are fixed:
//!   changing either reshuffles every noise field ever rendered from a seed.
//! - [`Xorshift64`] drives the particle system (spawn positions, hue jitter,
//!   life spans).
//!
//! Both are pure integer state machines, so the same seed produces the same
//! sequence on every platform.

use serde::{Deserialize, Serialize};

/// 32-bit xorshift generator used to shuffle noise permutation tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    /// Replaces a zero seed, which is a fixed point of xorshift.
    const FALLBACK_SEED: u32 = 0x9E37_79B9;

    /// Creates a generator from `seed` (0 is replaced by a non-zero fallback).
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { Self::FALLBACK_SEED } else { seed },
        }
    }

    /// Advances the state with shifts (13, 17, 5) and returns it.
    pub fn next_u32(&mut self) -> u32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 17;
        self.state ^= self.state << 5;
        self.state
    }

    /// Returns `state / 2^32`, uniformly distributed in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }
}

/// Xorshift64 deterministic PRNG for particle randomness.
///
/// Uses the standard shift parameters (13, 7, 17). Seed 0 is replaced with a
/// non-zero fallback to avoid the all-zeros fixed point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    const FALLBACK_SEED: u64 = 0x5EED_DEAD_BEEF_CAFE;

    /// Creates a new PRNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { Self::FALLBACK_SEED } else { seed },
        }
    }

    /// Advances the state and returns the next 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns a uniformly distributed f64 in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Returns a uniformly distributed f64 in [min, max).
    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    /// Returns a uniformly distributed u32 in [min, max).
    ///
    /// # Panics
    ///
    /// Panics if `max <= min`.
    pub fn next_u32_range(&mut self, min: u32, max: u32) -> u32 {
        assert!(max > min, "empty range {min}..{max}");
        min + (self.next_u64() % u64::from(max - min)) as u32
    }
}
