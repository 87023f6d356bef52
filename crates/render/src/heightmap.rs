//! Fractal-sum height rendered into a low-resolution offscreen buffer and
//! upscaled without smoothing.

use flowfield_core::color::{hsl_to_srgb, Hsl};
use flowfield_core::surface::{Composite, Raster, Surface};
use tracing::warn;

use crate::{RenderContext, BACKGROUND};

/// Offscreen resolution used when none is configured.
pub const DEFAULT_RESOLUTION: (usize, usize) = (225, 225);

const HUE_SPAN: f64 = 120.0;
const SATURATION: f64 = 0.6;

#[derive(Debug)]
pub struct HeightmapRenderer {
    resolution: (usize, usize),
    buffer: Option<Raster>,
    warned: bool,
}

impl Default for HeightmapRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}

impl HeightmapRenderer {
    /// The buffer is allocated on first use.
    pub fn new(resolution: (usize, usize)) -> Self {
        Self {
            resolution,
            buffer: None,
            warned: false,
        }
    }

    pub fn resolution(&self) -> (usize, usize) {
        self.resolution
    }

    /// Draws one frame. If the offscreen buffer cannot be created the surface
    /// keeps its previous contents.
    pub fn render(&mut self, ctx: &RenderContext<'_>, surface: &mut dyn Surface) {
        if self.buffer.is_none() {
            let (w, h) = self.resolution;
            match Raster::new(w, h, BACKGROUND) {
                Ok(raster) => self.buffer = Some(raster),
                Err(e) => {
                    if !self.warned {
                        warn!(width = w, height = h, error = %e, "heightmap buffer unavailable, skipping frame");
                        self.warned = true;
                    }
                    return;
                }
            }
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        let (bw, bh) = (buffer.width() as f64, buffer.height() as f64);
        let (sw, sh) = (surface.width() as f64, surface.height() as f64);
        let scale = ctx.controls.scale;
        let t = ctx.state.time;
        let base_hue = ctx.controls.hue;
        for j in 0..buffer.height() {
            let py = (j as f64 + 0.5) / bh * sh;
            for i in 0..buffer.width() {
                let px = (i as f64 + 0.5) / bw * sw;
                let c = ctx.field.height(ctx.state.domain_point(px, py, scale), t);
                let color = hsl_to_srgb(Hsl::new(base_hue + HUE_SPAN * c, SATURATION, 0.5 * c + 0.2));
                buffer.set_pixel(i, j, color);
            }
        }
        surface.set_composite(Composite::SourceOver);
        surface.draw_scaled(buffer, false);
    }
}
