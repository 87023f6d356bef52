//! Direction field derived from seeded noise, plus the per-run field state.
//!
//! [`FlowField`] turns noise-domain coordinates into an angle in radians using
//! one of three [`FieldVariant`]s. [`FieldState`] carries everything that
//! changes frame to frame: elapsed field time, the domain offset and the target
//! it eases toward, and the selected variant and render mode.

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::noise::SimplexNoise;

/// Constant added to both domain axes so sampled coordinates stay well away
/// from the noise lattice origin.
pub const DOMAIN_ORIGIN: f64 = 1000.0;

/// Field time added per frame before speed and audio modulation.
const TIME_STEP: f64 = 0.005;

/// Smallest finite-difference step accepted for the curl variant.
const MIN_CURL_EPSILON: f64 = 1e-9;

/// Angle computation used to steer particles and arrows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldVariant {
    /// `2π · fractal_sum`.
    #[default]
    Fbm,
    /// Gradient of the fractal sum rotated by 90°.
    Curl,
    /// Fractal sum sampled through a time-varying domain warp.
    Warp,
}

impl FieldVariant {
    pub const ALL: [FieldVariant; 3] = [FieldVariant::Fbm, FieldVariant::Curl, FieldVariant::Warp];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldVariant::Fbm => "fbm",
            FieldVariant::Curl => "curl",
            FieldVariant::Warp => "warp",
        }
    }
}

impl fmt::Display for FieldVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldVariant {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldVariant::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FlowError::UnknownFieldVariant(s.to_string()))
    }
}

/// How the field is drawn onto the surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Thin additive trails, one integration step per frame.
    #[default]
    Particles,
    /// Thicker trails, three integration steps per frame.
    Ribbons,
    /// A grid of dots displaced along the field direction.
    Arrows,
    /// Colored fractal-sum height, rendered low-res and upscaled.
    Heightmap,
}

impl RenderMode {
    pub const ALL: [RenderMode; 4] = [
        RenderMode::Particles,
        RenderMode::Ribbons,
        RenderMode::Arrows,
        RenderMode::Heightmap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Particles => "particles",
            RenderMode::Ribbons => "ribbons",
            RenderMode::Arrows => "arrows",
            RenderMode::Heightmap => "heightmap",
        }
    }

    /// Whether this mode draws particle trails.
    pub fn uses_particles(self) -> bool {
        matches!(self, RenderMode::Particles | RenderMode::Ribbons)
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RenderMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FlowError::UnknownRenderMode(s.to_string()))
    }
}

/// Tunable constants of the field model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Octaves summed for the flow angle.
    pub octaves: u32,
    /// Finite-difference step of the curl variant.
    pub curl_epsilon: f64,
    /// Frequency multiplier of the warp offsets.
    pub warp_frequency: f64,
    /// Amplitude of the warp offsets.
    pub warp_amplitude: f64,
    /// Time rates of the two warp samples: `[x1, y1, x2, y2]`.
    pub warp_phase_rates: [f64; 4],
    /// Per-unit-time diagonal drift of the flow sampling point.
    pub drift: f64,
    /// Octaves summed for the heightmap.
    pub heightmap_octaves: u32,
    /// Per-unit-time diagonal drift of the heightmap sampling point.
    pub heightmap_drift: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            octaves: 4,
            curl_epsilon: 0.0015,
            warp_frequency: 0.8,
            warp_amplitude: 0.9,
            warp_phase_rates: [0.15, 0.12, 0.11, 0.13],
            drift: 0.2,
            heightmap_octaves: 5,
            heightmap_drift: 0.15,
        }
    }
}

/// Noise-derived direction field.
#[derive(Debug, Clone)]
pub struct FlowField {
    noise: SimplexNoise,
    config: FieldConfig,
}

impl FlowField {
    pub fn new(noise: SimplexNoise, config: FieldConfig) -> Self {
        Self { noise, config }
    }

    pub fn noise(&self) -> &SimplexNoise {
        &self.noise
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Fractal sum at the configured flow octave count.
    pub fn fractal_sum(&self, x: f64, y: f64) -> f64 {
        self.noise.fractal_sum(x, y, self.config.octaves)
    }

    pub fn fbm_angle(&self, x: f64, y: f64) -> f64 {
        TAU * self.fractal_sum(x, y)
    }

    /// Angle perpendicular to the fractal-sum gradient, `atan2(∂x, −∂y)`.
    pub fn curl_like_angle(&self, x: f64, y: f64) -> f64 {
        let e = self.config.curl_epsilon.max(MIN_CURL_EPSILON);
        let dx = (self.fractal_sum(x + e, y) - self.fractal_sum(x - e, y)) / (2.0 * e);
        let dy = (self.fractal_sum(x, y + e) - self.fractal_sum(x, y - e)) / (2.0 * e);
        dx.atan2(-dy)
    }

    pub fn warped_angle(&self, x: f64, y: f64, t: f64) -> f64 {
        let c = &self.config;
        let [rx1, ry1, rx2, ry2] = c.warp_phase_rates;
        let wf = c.warp_frequency;
        let wx = self.noise.get(x * wf + t * rx1, y * wf - t * ry1) * c.warp_amplitude;
        let wy = self.noise.get(x * wf - t * rx2, y * wf + t * ry2) * c.warp_amplitude;
        TAU * self.fractal_sum(x + wx, y + wy)
    }

    /// Flow angle in radians at noise-domain point (x, y).
    pub fn angle(&self, variant: FieldVariant, x: f64, y: f64, t: f64) -> f64 {
        match variant {
            FieldVariant::Fbm => self.fbm_angle(x, y),
            FieldVariant::Curl => self.curl_like_angle(x, y),
            FieldVariant::Warp => self.warped_angle(x, y, t),
        }
    }

    /// Flow angle under a surface pixel for the current state.
    pub fn angle_at(&self, state: &FieldState, px: f64, py: f64, scale: f64) -> f64 {
        let p = state.sample_point(px, py, scale, self.config.drift);
        self.angle(state.variant, p.x, p.y, state.time)
    }

    /// Heightmap value in [0, 1] at noise-domain point `p`.
    pub fn height(&self, p: DVec2, t: f64) -> f64 {
        let d = t * self.config.heightmap_drift;
        self.noise
            .fractal_sum(p.x + d, p.y - d, self.config.heightmap_octaves)
            .clamp(0.0, 1.0)
    }
}

/// Mutable field state advanced once per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    /// Elapsed field time. Never decreases.
    pub time: f64,
    /// Current domain offset.
    pub offset: DVec2,
    /// Offset the domain eases toward.
    pub target_offset: DVec2,
    pub variant: FieldVariant,
    pub mode: RenderMode,
}

impl Default for FieldState {
    fn default() -> Self {
        Self {
            time: 0.0,
            offset: DVec2::splat(DOMAIN_ORIGIN),
            target_offset: DVec2::splat(DOMAIN_ORIGIN),
            variant: FieldVariant::default(),
            mode: RenderMode::default(),
        }
    }
}

impl FieldState {
    /// Advances field time by `0.005 · (0.2 + speed · (1 + 1.2 · mid))`.
    ///
    /// Negative speed and band values are treated as zero so time stays monotone.
    pub fn advance(&mut self, speed: f64, mid: f64) {
        let speed = speed.max(0.0);
        let mid = mid.max(0.0);
        self.time += TIME_STEP * (0.2 + speed * (1.0 + 1.2 * mid));
    }

    /// Moves the offset `factor` of the way toward the target.
    pub fn ease_offset(&mut self, factor: f64) {
        self.offset += (self.target_offset - self.offset) * factor.clamp(0.0, 1.0);
    }

    pub fn set_target_offset(&mut self, target: DVec2) {
        self.target_offset = target;
    }

    /// Noise-domain coordinate of surface pixel (px, py) without time drift.
    pub fn domain_point(&self, px: f64, py: f64, scale: f64) -> DVec2 {
        DVec2::new(
            px * scale + DOMAIN_ORIGIN + self.offset.x,
            py * scale + DOMAIN_ORIGIN + self.offset.y,
        )
    }

    /// Noise-domain coordinate of surface pixel (px, py), drifting diagonally with time.
    pub fn sample_point(&self, px: f64, py: f64, scale: f64, drift: f64) -> DVec2 {
        let d = self.time * drift;
        self.domain_point(px, py, scale) + DVec2::new(d, -d)
    }
}
