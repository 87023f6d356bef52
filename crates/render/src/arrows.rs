//! Grid of dots nudged along the local flow direction.

use glam::DVec2;

use flowfield_core::color::Srgb;
use flowfield_core::surface::Surface;

use crate::RenderContext;

const GRID_ORIGIN: f64 = 15.0;
const GRID_PITCH: f64 = 30.0;
const DOT_RADIUS: f64 = 2.2;
const DOT_ALPHA: f64 = 0.85;
const AMPLITUDE: f64 = 6.0;

/// Displacement of the dot at grid point (x, y) at field time `t`.
pub fn displacement(x: f64, y: f64, t: f64) -> f64 {
    AMPLITUDE * (0.6 + 0.4 * (2.0 * t + (x + y) * 0.01).sin())
}

/// Grid point coordinates along one axis of length `len`.
fn grid(len: usize) -> impl Iterator<Item = f64> {
    let len = len as f64;
    (0..)
        .map(|i| GRID_ORIGIN + i as f64 * GRID_PITCH)
        .take_while(move |&v| v < len)
}

/// Clears to black and draws one dot per grid point.
pub fn render(ctx: &RenderContext<'_>, surface: &mut dyn Surface) {
    crate::clear(surface);
    let t = ctx.state.time;
    let scale = ctx.controls.scale;
    let (w, h) = (surface.width(), surface.height());
    for y in grid(h) {
        for x in grid(w) {
            let a = ctx.field.angle_at(ctx.state, x, y, scale);
            let center = DVec2::new(x, y) + DVec2::from_angle(a) * displacement(x, y, t);
            surface.fill_circle(center, DOT_RADIUS, Srgb::WHITE, DOT_ALPHA);
        }
    }
}
