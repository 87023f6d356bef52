//! Reproducible description of a rendered run.
//!
//! A [`Seed`] captures everything needed to recreate a frame sequence without
//! live sensors: surface size, the two PRNG seeds, control overrides, and how
//! many frames to advance.

use crate::controls::ControlValues;
use crate::error::FlowError;
use crate::noise::DEFAULT_NOISE_SEED;
use serde::{Deserialize, Serialize};

/// Reproducible run description.
///
/// Two identical `Seed` values rendered by the same binary with sensors off
/// produce identical frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seed {
    pub width: usize,
    pub height: usize,
    /// Control overrides, read with [`ControlValues::from_json`].
    #[serde(default = "empty_object")]
    pub params: serde_json::Value,
    /// Seeds particle spawning.
    pub seed: u64,
    /// Seeds the noise permutation table.
    #[serde(default = "default_noise_seed")]
    pub noise_seed: u32,
    #[serde(default)]
    pub frames: usize,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_noise_seed() -> u32 {
    DEFAULT_NOISE_SEED
}

impl Seed {
    /// Creates a Seed with no overrides, the default noise seed, and zero frames.
    pub fn new(width: usize, height: usize, seed: u64) -> Self {
        Self {
            width,
            height,
            params: empty_object(),
            seed,
            noise_seed: DEFAULT_NOISE_SEED,
            frames: 0,
        }
    }

    /// Validates that the surface is non-empty and `width * height` does not overflow.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.width == 0 || self.height == 0 {
            return Err(FlowError::InvalidDimensions);
        }
        self.width
            .checked_mul(self.height)
            .ok_or(FlowError::InvalidDimensions)?;
        Ok(())
    }

    /// The clamped control values this run uses.
    pub fn controls(&self) -> ControlValues {
        ControlValues::from_json(&self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RenderMode;

    #[test]
    fn new_has_empty_params_and_default_noise_seed() {
        let s = Seed::new(640, 480, 42);
        assert_eq!(s.noise_seed, 1337);
        assert_eq!(s.frames, 0);
        assert_eq!(s.params, serde_json::json!({}));
        assert_eq!(s.controls(), ControlValues::default());
    }

    #[test]
    fn json_round_trip_with_params() {
        let mut s = Seed::new(800, 600, 99);
        s.params = serde_json::json!({"mode": "arrows", "speed": 2.5});
        s.frames = 240;
        let json = serde_json::to_string_pretty(&s).unwrap();
        let restored: Seed = serde_json::from_str(&json).unwrap();
        assert_eq!(s, restored);
        assert_eq!(restored.controls().mode, RenderMode::Arrows);
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let s: Seed = serde_json::from_str(r#"{"width": 10, "height": 20, "seed": 3}"#).unwrap();
        assert_eq!(s.noise_seed, DEFAULT_NOISE_SEED);
        assert_eq!(s.frames, 0);
        assert!(s.params.is_object());
    }

    #[test]
    fn controls_are_clamped() {
        let mut s = Seed::new(10, 10, 1);
        s.params = serde_json::json!({"count": 1});
        assert_eq!(s.controls().count, 100);
    }

    #[test]
    fn validate_accepts_valid_sizes() {
        assert!(Seed::new(512, 512, 42).validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_width_height_and_overflow() {
        assert!(Seed::new(0, 512, 42).validate().is_err());
        assert!(Seed::new(512, 0, 42).validate().is_err());
        assert!(Seed::new(usize::MAX, 2, 42).validate().is_err());
    }
}
