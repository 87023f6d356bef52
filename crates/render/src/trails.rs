//! Particle and ribbon trails.
//!
//! Each frame optionally darkens the surface with a translucent black
//! overlay, then advances the particles and strokes every travelled segment
//! additively, so overlapping trails brighten instead of occluding.

use flowfield_core::color::{hsl_to_srgb, Hsl, Srgb};
use flowfield_core::particle::{ParticleSystem, DEFAULT_DAMPING};
use flowfield_core::surface::{Composite, Surface};

use crate::RenderContext;

const SATURATION: f64 = 0.7;
const LIGHTNESS: f64 = 0.6;
const STROKE_ALPHA: f64 = 0.25;
const MAX_FADE: f64 = 0.5;

/// Sub-step count and stroke width of a trail mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailStyle {
    pub substeps: usize,
    pub line_width: f64,
}

impl TrailStyle {
    pub const PARTICLES: TrailStyle = TrailStyle {
        substeps: 1,
        line_width: 1.0,
    };
    pub const RIBBONS: TrailStyle = TrailStyle {
        substeps: 3,
        line_width: 1.6,
    };
}

/// Draws one frame of trails.
pub fn render(
    ctx: &RenderContext<'_>,
    particles: &mut ParticleSystem,
    surface: &mut dyn Surface,
    style: TrailStyle,
) {
    surface.set_composite(Composite::SourceOver);
    let fade = if ctx.controls.fade.is_finite() {
        ctx.controls.fade.clamp(0.0, MAX_FADE)
    } else {
        0.0
    };
    if fade > 0.0 {
        surface.fill(Srgb::BLACK, fade);
    }

    let scale = ctx.controls.scale;
    particles.step_substeps(
        |p| ctx.field.angle_at(ctx.state, p.x, p.y, scale),
        ctx.modulation.acceleration,
        DEFAULT_DAMPING,
        style.substeps,
    );

    surface.set_composite(Composite::Lighter);
    let shift = ctx.modulation.hue_shift;
    for seg in particles.segments() {
        // Edge crossings would streak across the whole surface.
        if seg.wrapped {
            continue;
        }
        let color = hsl_to_srgb(Hsl::new(seg.hue + shift, SATURATION, LIGHTNESS));
        surface.stroke_line(seg.from, seg.to, color, STROKE_ALPHA, style.line_width);
    }
    surface.set_composite(Composite::SourceOver);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Scene;
    use crate::Modulation;

    fn frame(scene: &mut Scene, style: TrailStyle) {
        let m = Modulation::unmodulated(scene.controls.strength);
        scene.draw(m, |ctx, particles, surface| render(ctx, particles, surface, style));
    }

    #[test]
    fn trails_light_up_a_black_surface() {
        let mut scene = Scene::new(80, 60);
        frame(&mut scene, TrailStyle::PARTICLES);
        assert!(scene.lit_pixels() > 0);
    }

    #[test]
    fn composite_is_restored_after_drawing() {
        let mut scene = Scene::new(40, 40);
        frame(&mut scene, TrailStyle::RIBBONS);
        assert_eq!(scene.surface.composite(), Composite::SourceOver);
    }

    #[test]
    fn ribbons_record_three_segments_per_particle() {
        let mut scene = Scene::new(40, 40);
        frame(&mut scene, TrailStyle::RIBBONS);
        assert_eq!(scene.particles.segments().len(), 3 * scene.particles.len());
    }

    #[test]
    fn fade_darkens_previous_frame() {
        let mut scene = Scene::new(30, 30);
        scene.surface.fill(Srgb::WHITE, 1.0);
        scene.controls.fade = 0.5;
        frame(&mut scene, TrailStyle::PARTICLES);
        let darkened = scene
            .surface
            .to_rgba8()
            .chunks_exact(4)
            .filter(|p| p[0] < 255)
            .count();
        assert!(darkened > 30 * 30 / 2, "only {darkened} pixels darkened");
    }

    #[test]
    fn zero_fade_leaves_background_alone() {
        let mut scene = Scene::new(30, 30);
        scene.surface.fill(Srgb::WHITE, 1.0);
        scene.controls.fade = 0.0;
        frame(&mut scene, TrailStyle::PARTICLES);
        // Additive strokes can only keep white pixels white.
        assert!(scene.surface.to_rgba8().iter().all(|&c| c == 255));
    }

    #[test]
    fn hue_shift_changes_stroke_colors() {
        let mut a = Scene::new(50, 50);
        let mut b = Scene::new(50, 50);
        a.draw(Modulation::new(0.6, 0.0, 0.0, 0.0), |ctx, p, s| {
            render(ctx, p, s, TrailStyle::PARTICLES)
        });
        b.draw(Modulation::new(0.6, 0.0, 0.0, 1.0), |ctx, p, s| {
            render(ctx, p, s, TrailStyle::PARTICLES)
        });
        assert_eq!(a.particles.particles(), b.particles.particles());
        assert_ne!(a.surface.to_rgba8(), b.surface.to_rgba8());
    }
}
