//! Engine construction settings.
//!
//! Everything here is fixed for the lifetime of a [`FlowEngine`](crate::FlowEngine);
//! per-frame knobs live in [`ControlValues`](flowfield_core::ControlValues).

use std::path::PathBuf;

use flowfield_core::error::FlowError;
use flowfield_core::field::FieldConfig;
use flowfield_core::noise::DEFAULT_NOISE_SEED;
use flowfield_core::seed::Seed;
use flowfield_render::heightmap::DEFAULT_RESOLUTION;
use flowfield_sensors::motion::MotionConfig;
use flowfield_sensors::spectrum::SpectrumConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::capture::DEFAULT_CODECS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames per second sampled from the render loop.
    pub fps: u32,
    /// Codec preference list, most preferred first.
    pub codecs: Vec<String>,
    /// Frames queued for the encoder before new ones are dropped.
    pub queue_depth: usize,
    /// Directory capture artifacts are written into.
    pub output_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            codecs: DEFAULT_CODECS.iter().map(|c| c.to_string()).collect(),
            queue_depth: 8,
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub width: usize,
    pub height: usize,
    /// Seeds particle spawning.
    pub seed: u64,
    /// Seeds the noise permutation table.
    pub noise_seed: u32,
    /// Offscreen buffer size of the heightmap mode.
    pub heightmap_resolution: (usize, usize),
    pub field: FieldConfig,
    pub motion: MotionConfig,
    pub spectrum: SpectrumConfig,
    pub capture: CaptureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 900,
            height: 900,
            seed: 42,
            noise_seed: DEFAULT_NOISE_SEED,
            heightmap_resolution: DEFAULT_RESOLUTION,
            field: FieldConfig::default(),
            motion: MotionConfig::default(),
            spectrum: SpectrumConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a config from a JSON object.
    ///
    /// Missing or mistyped top-level keys fall back to their defaults. A
    /// section (`field`, `motion`, `spectrum`, `capture`) that fails to
    /// deserialize is replaced by its default and logged.
    pub fn from_json(params: &Value) -> Self {
        let d = Self::default();
        Self {
            width: param_usize(params, "width", d.width),
            height: param_usize(params, "height", d.height),
            seed: param_u64(params, "seed", d.seed),
            noise_seed: param_u64(params, "noise_seed", u64::from(d.noise_seed))
                .try_into()
                .unwrap_or(d.noise_seed),
            heightmap_resolution: section(params, "heightmap_resolution", d.heightmap_resolution),
            field: section(params, "field", d.field),
            motion: section(params, "motion", d.motion),
            spectrum: section(params, "spectrum", d.spectrum),
            capture: section(params, "capture", d.capture),
        }
    }

    /// Config for replaying a [`Seed`]: its size and seeds, defaults elsewhere.
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            width: seed.width,
            height: seed.height,
            seed: seed.seed,
            noise_seed: seed.noise_seed,
            ..Self::default()
        }
    }

    /// Rejects empty or overflowing surface sizes.
    pub fn validate(&self) -> Result<(), FlowError> {
        let (hw, hh) = self.heightmap_resolution;
        if self.width == 0 || self.height == 0 || hw == 0 || hh == 0 {
            return Err(FlowError::InvalidDimensions);
        }
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(4))
            .ok_or(FlowError::InvalidDimensions)?;
        Ok(())
    }
}

fn param_u64(params: &Value, name: &str, default: u64) -> u64 {
    params.get(name).and_then(Value::as_u64).unwrap_or(default)
}

fn param_usize(params: &Value, name: &str, default: usize) -> usize {
    params
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

fn section<T: DeserializeOwned>(params: &Value, name: &str, default: T) -> T {
    match params.get(name) {
        Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|e| {
            warn!(section = name, error = %e, "ignoring malformed config section");
            default
        }),
        None => default,
    }
}
