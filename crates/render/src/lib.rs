#![deny(unsafe_code)]
//! Render mode dispatcher: draws one frame of the flow field onto a
//! [`Surface`] using the selected [`RenderMode`].
//!
//! All modes share one field model. Trail modes (particles, ribbons) advance the
//! [`ParticleSystem`]; arrows and heightmap sample the field on their own grids
//! and leave the particles untouched.

pub mod arrows;
pub mod heightmap;
pub mod trails;

#[cfg(feature = "png")]
pub mod snapshot;

use flowfield_core::color::Srgb;
use flowfield_core::controls::ControlValues;
use flowfield_core::field::{FieldState, FlowField, RenderMode};
use flowfield_core::particle::{ParticleSystem, MAX_ACCELERATION, MIN_ACCELERATION};
use flowfield_core::surface::{Composite, Surface};
use tracing::debug;

pub use heightmap::HeightmapRenderer;
pub use trails::TrailStyle;

/// Canvas color behind every mode.
pub const BACKGROUND: Srgb = Srgb::BLACK;

/// Sensor-derived adjustments applied to one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulation {
    /// Particle acceleration, already clamped.
    pub acceleration: f64,
    /// Degrees added to every trail hue.
    pub hue_shift: f64,
}

impl Modulation {
    /// `acceleration = clamp(strength · (1 + 0.6·motion + 0.8·low), 0.05, 4)`
    /// and `hue_shift = floor(high · 90)`.
    pub fn new(strength: f64, motion: f64, low: f64, high: f64) -> Self {
        let raw = strength * (1.0 + 0.6 * motion + 0.8 * low);
        let acceleration = if raw.is_finite() {
            raw.clamp(MIN_ACCELERATION, MAX_ACCELERATION)
        } else {
            MIN_ACCELERATION
        };
        let hue_shift = if high.is_finite() {
            (high * 90.0).floor()
        } else {
            0.0
        };
        Self {
            acceleration,
            hue_shift,
        }
    }

    /// Modulation with no sensor input.
    pub fn unmodulated(strength: f64) -> Self {
        Self::new(strength, 0.0, 0.0, 0.0)
    }
}

/// Everything a mode reads while drawing a frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub field: &'a FlowField,
    pub state: &'a FieldState,
    pub controls: &'a ControlValues,
    pub modulation: Modulation,
}

/// Paints the background over the whole surface.
pub fn clear(surface: &mut dyn Surface) {
    surface.set_composite(Composite::SourceOver);
    surface.fill(BACKGROUND, 1.0);
}

/// Selects and runs the active render mode.
#[derive(Debug)]
pub struct Dispatcher {
    mode: RenderMode,
    heightmap: HeightmapRenderer,
}

impl Dispatcher {
    pub fn new(mode: RenderMode, heightmap: HeightmapRenderer) -> Self {
        Self { mode, heightmap }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Switches modes. Clears the surface and returns `true` when the mode
    /// actually changed.
    pub fn set_mode(&mut self, mode: RenderMode, surface: &mut dyn Surface) -> bool {
        if mode == self.mode {
            return false;
        }
        debug!(from = %self.mode, to = %mode, "render mode switched");
        self.mode = mode;
        clear(surface);
        true
    }

    /// Draws one frame.
    pub fn render(
        &mut self,
        ctx: &RenderContext<'_>,
        particles: &mut ParticleSystem,
        surface: &mut dyn Surface,
    ) {
        match self.mode {
            RenderMode::Particles => {
                trails::render(ctx, particles, surface, TrailStyle::PARTICLES)
            }
            RenderMode::Ribbons => trails::render(ctx, particles, surface, TrailStyle::RIBBONS),
            RenderMode::Arrows => arrows::render(ctx, surface),
            RenderMode::Heightmap => self.heightmap.render(ctx, surface),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(RenderMode::default(), HeightmapRenderer::default())
    }
}
