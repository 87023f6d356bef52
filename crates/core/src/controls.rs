//! Externally owned control values, read once per frame.
//!
//! Out-of-range or malformed values are never rejected: every field is
//! clamped into its documented range, and anything unparseable falls back to
//! the default. The engine only reads controls; it never writes them back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::color::wrap_degrees;
use crate::field::{FieldVariant, RenderMode};
use crate::particle::{clamp_count, DEFAULT_PARTICLES};

pub const SCALE_RANGE: (f64, f64) = (0.0005, 0.02);
pub const STRENGTH_RANGE: (f64, f64) = (0.0, 4.0);
pub const FADE_RANGE: (f64, f64) = (0.0, 0.5);
pub const SPEED_RANGE: (f64, f64) = (0.0, 5.0);

/// The user-facing knobs of the visualizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlValues {
    /// Particle population, clamped to [100, 5000].
    pub count: usize,
    /// Surface pixels to noise-domain units.
    pub scale: f64,
    /// Base particle acceleration.
    pub strength: f64,
    /// Alpha of the black overlay painted before trails each frame.
    pub fade: f64,
    /// Field time rate multiplier.
    pub speed: f64,
    /// Base hue in degrees, wrapped into [0, 360).
    pub hue: f64,
    pub mode: RenderMode,
    pub variant: FieldVariant,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            count: DEFAULT_PARTICLES,
            scale: 0.0025,
            strength: 0.6,
            fade: 0.08,
            speed: 1.0,
            hue: 200.0,
            mode: RenderMode::default(),
            variant: FieldVariant::default(),
        }
    }
}

impl ControlValues {
    /// Reads controls from a JSON object, clamping every value.
    ///
    /// Missing keys, wrong types and unknown mode or variant names all fall
    /// back to the default for that key.
    pub fn from_json(params: &Value) -> Self {
        let d = Self::default();
        Self {
            count: param_usize(params, "count", d.count),
            scale: param_f64(params, "scale", d.scale),
            strength: param_f64(params, "strength", d.strength),
            fade: param_f64(params, "fade", d.fade),
            speed: param_f64(params, "speed", d.speed),
            hue: param_f64(params, "hue", d.hue),
            mode: param_parsed(params, "mode", d.mode),
            variant: param_parsed(params, "variant", d.variant),
        }
        .clamped()
    }

    /// Returns a copy with every numeric field forced into range.
    ///
    /// Non-finite numbers are replaced by the default.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        let range = |v: f64, (lo, hi): (f64, f64), default: f64| {
            if v.is_finite() {
                v.clamp(lo, hi)
            } else {
                default
            }
        };
        Self {
            count: clamp_count(self.count),
            scale: range(self.scale, SCALE_RANGE, d.scale),
            strength: range(self.strength, STRENGTH_RANGE, d.strength),
            fade: range(self.fade, FADE_RANGE, d.fade),
            speed: range(self.speed, SPEED_RANGE, d.speed),
            hue: if self.hue.is_finite() {
                wrap_degrees(self.hue)
            } else {
                d.hue
            },
            mode: self.mode,
            variant: self.variant,
        }
    }
}

fn param_f64(params: &Value, name: &str, default: f64) -> f64 {
    params.get(name).and_then(Value::as_f64).unwrap_or(default)
}

/// Non-negative integers only; floats are truncated toward zero.
fn param_usize(params: &Value, name: &str, default: usize) -> usize {
    match params.get(name) {
        Some(v) => v
            .as_u64()
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize))
            .unwrap_or(default),
        None => default,
    }
}

fn param_parsed<T: std::str::FromStr>(params: &Value, name: &str, default: T) -> T {
    params
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_gives_defaults() {
        assert_eq!(ControlValues::from_json(&json!({})), ControlValues::default());
    }

    #[test]
    fn non_object_gives_defaults() {
        assert_eq!(
            ControlValues::from_json(&json!("not an object")),
            ControlValues::default()
        );
    }

    #[test]
    fn values_within_range_pass_through() {
        let c = ControlValues::from_json(&json!({
            "count": 1200,
            "scale": 0.004,
            "strength": 1.5,
            "fade": 0.2,
            "speed": 2.0,
            "hue": 45,
            "mode": "ribbons",
            "variant": "warp"
        }));
        assert_eq!(c.count, 1200);
        assert_eq!(c.scale, 0.004);
        assert_eq!(c.strength, 1.5);
        assert_eq!(c.fade, 0.2);
        assert_eq!(c.speed, 2.0);
        assert_eq!(c.hue, 45.0);
        assert_eq!(c.mode, RenderMode::Ribbons);
        assert_eq!(c.variant, FieldVariant::Warp);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let c = ControlValues::from_json(&json!({
            "count": 50,
            "scale": 1.0,
            "strength": -3,
            "fade": 0.9,
            "speed": 100,
            "hue": 400
        }));
        assert_eq!(c.count, 100);
        assert_eq!(c.scale, 0.02);
        assert_eq!(c.strength, 0.0);
        assert_eq!(c.fade, 0.5);
        assert_eq!(c.speed, 5.0);
        assert_eq!(c.hue, 40.0);
    }

    #[test]
    fn huge_count_clamps_to_max() {
        let c = ControlValues::from_json(&json!({"count": 1_000_000}));
        assert_eq!(c.count, 5000);
    }

    #[test]
    fn fractional_count_is_truncated() {
        let c = ControlValues::from_json(&json!({"count": 950.7}));
        assert_eq!(c.count, 950);
    }

    #[test]
    fn wrong_types_and_unknown_names_fall_back() {
        let c = ControlValues::from_json(&json!({
            "count": "lots",
            "speed": "fast",
            "mode": "spirals",
            "variant": 3
        }));
        assert_eq!(c.count, DEFAULT_PARTICLES);
        assert_eq!(c.speed, 1.0);
        assert_eq!(c.mode, RenderMode::Particles);
        assert_eq!(c.variant, FieldVariant::Fbm);
    }

    #[test]
    fn negative_hue_wraps() {
        let c = ControlValues::from_json(&json!({"hue": -30}));
        assert_eq!(c.hue, 330.0);
    }

    #[test]
    fn clamped_replaces_non_finite_numbers() {
        let c = ControlValues {
            fade: f64::NAN,
            hue: f64::INFINITY,
            ..ControlValues::default()
        }
        .clamped();
        assert_eq!(c.fade, 0.08);
        assert_eq!(c.hue, 200.0);
    }

    #[test]
    fn serde_round_trip_uses_snake_case_names() {
        let c = ControlValues {
            mode: RenderMode::Heightmap,
            variant: FieldVariant::Curl,
            ..ControlValues::default()
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["mode"], "heightmap");
        assert_eq!(v["variant"], "curl");
        let back: ControlValues = serde_json::from_value(v).unwrap();
        assert_eq!(back, c);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn clamped_is_always_in_range(
                count: usize,
                scale in -1.0_f64..1.0,
                strength in -10.0_f64..10.0,
                fade in -2.0_f64..2.0,
                speed in -10.0_f64..10.0,
                hue in -1000.0_f64..1000.0,
            ) {
                let c = ControlValues { count, scale, strength, fade, speed, hue, ..Default::default() }
                    .clamped();
                prop_assert!((100..=5000).contains(&c.count));
                prop_assert!((SCALE_RANGE.0..=SCALE_RANGE.1).contains(&c.scale));
                prop_assert!((STRENGTH_RANGE.0..=STRENGTH_RANGE.1).contains(&c.strength));
                prop_assert!((FADE_RANGE.0..=FADE_RANGE.1).contains(&c.fade));
                prop_assert!((SPEED_RANGE.0..=SPEED_RANGE.1).contains(&c.speed));
                prop_assert!((0.0..360.0).contains(&c.hue));
            }
        }
    }
}
