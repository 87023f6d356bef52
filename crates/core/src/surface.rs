//! Raster drawing target.
//!
//! [`Surface`] is the boundary the render modes draw through: opaque and
//! translucent fills, stroked segments, filled dots, per-pixel access, a
//! compositing mode, and a scaled blit with a smoothing flag. [`Raster`] is the
//! in-memory implementation used by the engine, the PNG export, and capture.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::color::Srgb;
use crate::error::FlowError;

/// How new paint combines with what is already on the surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composite {
    /// Alpha blend over the destination.
    #[default]
    SourceOver,
    /// Add source × alpha to the destination, saturating at white. Never darkens.
    Lighter,
}

/// A 2D drawing target with fixed pixel dimensions.
pub trait Surface {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Current compositing mode.
    fn composite(&self) -> Composite;

    fn set_composite(&mut self, op: Composite);

    /// Paints the whole surface with `color` at `alpha`.
    fn fill(&mut self, color: Srgb, alpha: f64);

    /// Strokes a straight segment of the given width.
    fn stroke_line(&mut self, from: DVec2, to: DVec2, color: Srgb, alpha: f64, width: f64);

    /// Fills a disc.
    fn fill_circle(&mut self, center: DVec2, radius: f64, color: Srgb, alpha: f64);

    /// Reads one pixel, `None` outside the surface.
    fn pixel(&self, x: usize, y: usize) -> Option<Srgb>;

    /// Overwrites one pixel, ignoring the compositing mode. Out-of-range writes are dropped.
    fn set_pixel(&mut self, x: usize, y: usize, color: Srgb);

    /// Stretches `source` over the whole surface, opaque.
    ///
    /// With `smoothing` off every destination pixel copies its nearest source
    /// pixel, so upscaled images stay blocky.
    fn draw_scaled(&mut self, source: &Raster, smoothing: bool);
}

/// In-memory RGB surface with `f32` channels in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: usize,
    height: usize,
    background: Srgb,
    composite: Composite,
    data: Vec<[f32; 3]>,
}

impl Raster {
    /// Creates a surface painted with `background`.
    ///
    /// Returns `FlowError::InvalidDimensions` if either dimension is zero or
    /// `width * height` overflows.
    pub fn new(width: usize, height: usize, background: Srgb) -> Result<Self, FlowError> {
        if width == 0 || height == 0 {
            return Err(FlowError::InvalidDimensions);
        }
        let len = width
            .checked_mul(height)
            .ok_or(FlowError::InvalidDimensions)?;
        Ok(Self {
            width,
            height,
            background,
            composite: Composite::SourceOver,
            data: vec![to_f32(background); len],
        })
    }

    pub fn background(&self) -> Srgb {
        self.background
    }

    /// Paints the background opaquely over everything, whatever the compositing mode.
    pub fn clear(&mut self) {
        let bg = to_f32(self.background);
        self.data.iter_mut().for_each(|px| *px = bg);
    }

    /// Row-major RGBA8 copy of the surface (alpha is always 255).
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.data
            .iter()
            .flat_map(|&[r, g, b]| {
                let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
                [q(r), q(g), q(b), 255]
            })
            .collect()
    }

    #[inline]
    fn blend(&mut self, x: usize, y: usize, src: [f32; 3], alpha: f32) {
        let px = &mut self.data[y * self.width + x];
        match self.composite {
            Composite::SourceOver => {
                for (d, s) in px.iter_mut().zip(src) {
                    *d = *d * (1.0 - alpha) + s * alpha;
                }
            }
            Composite::Lighter => {
                for (d, s) in px.iter_mut().zip(src) {
                    *d = (*d + s * alpha).min(1.0);
                }
            }
        }
    }

    /// Integer pixel range covering `[lo, hi]` in surface coordinates, clipped.
    fn span(lo: f64, hi: f64, limit: usize) -> std::ops::Range<usize> {
        let start = lo.floor().max(0.0);
        let end = (hi.ceil() + 1.0).min(limit as f64);
        if !(start < end) {
            return 0..0;
        }
        start as usize..end as usize
    }
}

impl Surface for Raster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn composite(&self) -> Composite {
        self.composite
    }

    fn set_composite(&mut self, op: Composite) {
        self.composite = op;
    }

    fn fill(&mut self, color: Srgb, alpha: f64) {
        let alpha = alpha.clamp(0.0, 1.0) as f32;
        if alpha == 0.0 {
            return;
        }
        let src = to_f32(color);
        for y in 0..self.height {
            for x in 0..self.width {
                self.blend(x, y, src, alpha);
            }
        }
    }

    fn stroke_line(&mut self, from: DVec2, to: DVec2, color: Srgb, alpha: f64, width: f64) {
        let alpha = alpha.clamp(0.0, 1.0) as f32;
        if alpha == 0.0 || !from.is_finite() || !to.is_finite() {
            return;
        }
        let half = (width * 0.5).max(0.5);
        let src = to_f32(color);
        let seg = to - from;
        let len_sq = seg.length_squared();

        let xs = Self::span(from.x.min(to.x) - half, from.x.max(to.x) + half, self.width);
        let ys = Self::span(from.y.min(to.y) - half, from.y.max(to.y) + half, self.height);
        for y in ys {
            for x in xs.clone() {
                let center = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                let t = if len_sq > 0.0 {
                    ((center - from).dot(seg) / len_sq).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                if center.distance_squared(from + seg * t) <= half * half {
                    self.blend(x, y, src, alpha);
                }
            }
        }
    }

    fn fill_circle(&mut self, center: DVec2, radius: f64, color: Srgb, alpha: f64) {
        let alpha = alpha.clamp(0.0, 1.0) as f32;
        if alpha == 0.0 || radius <= 0.0 || !center.is_finite() {
            return;
        }
        let src = to_f32(color);
        let xs = Self::span(center.x - radius, center.x + radius, self.width);
        let ys = Self::span(center.y - radius, center.y + radius, self.height);
        for y in ys {
            for x in xs.clone() {
                let p = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                if p.distance_squared(center) <= radius * radius {
                    self.blend(x, y, src, alpha);
                }
            }
        }
    }

    fn pixel(&self, x: usize, y: usize) -> Option<Srgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let [r, g, b] = self.data[y * self.width + x];
        Some(Srgb {
            r: f64::from(r),
            g: f64::from(g),
            b: f64::from(b),
        })
    }

    fn set_pixel(&mut self, x: usize, y: usize, color: Srgb) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = to_f32(color);
        }
    }

    fn draw_scaled(&mut self, source: &Raster, smoothing: bool) {
        let sx_scale = source.width as f64 / self.width as f64;
        let sy_scale = source.height as f64 / self.height as f64;
        for y in 0..self.height {
            let fy = (y as f64 + 0.5) * sy_scale;
            for x in 0..self.width {
                let fx = (x as f64 + 0.5) * sx_scale;
                let px = if smoothing {
                    source.bilinear(fx - 0.5, fy - 0.5)
                } else {
                    let sx = (fx as usize).min(source.width - 1);
                    let sy = (fy as usize).min(source.height - 1);
                    source.data[sy * source.width + sx]
                };
                self.data[y * self.width + x] = px;
            }
        }
    }
}

impl Raster {
    fn bilinear(&self, fx: f64, fy: f64) -> [f32; 3] {
        let x0 = fx.floor().clamp(0.0, (self.width - 1) as f64) as usize;
        let y0 = fy.floor().clamp(0.0, (self.height - 1) as f64) as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = (fx - x0 as f64).clamp(0.0, 1.0) as f32;
        let ty = (fy - y0 as f64).clamp(0.0, 1.0) as f32;
        let at = |x: usize, y: usize| self.data[y * self.width + x];
        let (a, b, c, d) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));
        std::array::from_fn(|i| {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            top + (bottom - top) * ty
        })
    }
}

fn to_f32(c: Srgb) -> [f32; 3] {
    [
        c.r.clamp(0.0, 1.0) as f32,
        c.g.clamp(0.0, 1.0) as f32,
        c.b.clamp(0.0, 1.0) as f32,
    ]
}
