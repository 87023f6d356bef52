//! Field-advected particle population with toroidal wrap and recycling.
//!
//! Every particle has a finite life counter. A step integrates each living
//! particle through the flow angle at its position and decrements its life;
//! a particle found with zero life at the start of a step is respawned
//! instead. The population size never changes between calls to
//! [`ParticleSystem::initialize`].

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::color::wrap_degrees;
use crate::error::FlowError;
use crate::prng::Xorshift64;

pub const MIN_PARTICLES: usize = 100;
pub const MAX_PARTICLES: usize = 5000;
pub const DEFAULT_PARTICLES: usize = 800;

/// Velocity retained per step.
pub const DEFAULT_DAMPING: f64 = 0.95;

pub const MIN_ACCELERATION: f64 = 0.05;
pub const MAX_ACCELERATION: f64 = 4.0;

const HUE_JITTER: f64 = 30.0;
const LIFE_RANGE: (u32, u32) = (100, 400);

/// Clamps a requested population size to [`MIN_PARTICLES`, `MAX_PARTICLES`].
pub fn clamp_count(count: usize) -> usize {
    count.clamp(MIN_PARTICLES, MAX_PARTICLES)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: DVec2,
    pub velocity: DVec2,
    /// Degrees in [0, 360).
    pub hue: f64,
    /// Steps left before the particle is recycled.
    pub life: u32,
}

/// The path one particle travelled during the last step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: DVec2,
    /// Position after wrapping.
    pub to: DVec2,
    pub hue: f64,
    /// The particle crossed an edge; `from` and `to` are on opposite sides.
    pub wrapped: bool,
}

/// Fixed-size particle population on a `width × height` torus.
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    width: f64,
    height: f64,
    base_hue: f64,
    rng: Xorshift64,
    particles: Vec<Particle>,
    segments: Vec<Segment>,
    dead: Vec<usize>,
}

impl ParticleSystem {
    /// Creates an empty system for a surface of the given size.
    ///
    /// Returns `FlowError::InvalidDimensions` unless both sides are finite and positive.
    pub fn new(width: f64, height: f64, seed: u64) -> Result<Self, FlowError> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(FlowError::InvalidDimensions);
        }
        Ok(Self {
            width,
            height,
            base_hue: 200.0,
            rng: Xorshift64::new(seed),
            particles: Vec::new(),
            segments: Vec::new(),
            dead: Vec::new(),
        })
    }

    /// Replaces the population with `clamp_count(count)` fresh particles.
    /// Returns the actual count.
    pub fn initialize(&mut self, count: usize) -> usize {
        let count = clamp_count(count);
        self.particles.clear();
        self.segments.clear();
        for _ in 0..count {
            let p = spawn(&mut self.rng, self.width, self.height, self.base_hue);
            self.particles.push(p);
        }
        count
    }

    /// Sets the hue that subsequent spawns jitter around.
    pub fn set_base_hue(&mut self, hue: f64) {
        if hue.is_finite() {
            self.base_hue = wrap_degrees(hue);
        }
    }

    pub fn base_hue(&self) -> f64 {
        self.base_hue
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Segments travelled during the most recent [`step`](Self::step), in particle order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Advances every particle once.
    ///
    /// `sample` maps a surface position to a flow angle in radians.
    /// `acceleration` is clamped to [`MIN_ACCELERATION`, `MAX_ACCELERATION`].
    pub fn step<F>(&mut self, sample: F, acceleration: f64, damping: f64)
    where
        F: Fn(DVec2) -> f64 + Sync,
    {
        self.step_substeps(sample, acceleration, damping, 1);
    }

    /// Integrates every living particle `substeps` times (at least once) but
    /// spends only one unit of life. [`segments`](Self::segments) then holds
    /// one entry per living particle per sub-step.
    pub fn step_substeps<F>(&mut self, sample: F, acceleration: f64, damping: f64, substeps: usize)
    where
        F: Fn(DVec2) -> f64 + Sync,
    {
        let motion = Motion {
            accel: if acceleration.is_finite() {
                acceleration.clamp(MIN_ACCELERATION, MAX_ACCELERATION)
            } else {
                MIN_ACCELERATION
            },
            damping: if damping.is_finite() {
                damping
            } else {
                DEFAULT_DAMPING
            },
            width: self.width,
            height: self.height,
        };

        self.dead.clear();
        self.dead.extend(
            self.particles
                .iter()
                .enumerate()
                .filter(|(_, p)| p.life == 0)
                .map(|(i, _)| i),
        );

        self.segments.clear();
        let substeps = substeps.max(1);
        for pass in 1..=substeps {
            let last = pass == substeps;
            let integrate = |p: &mut Particle| motion.integrate(p, &sample, last);
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;
                self.segments
                    .par_extend(self.particles.par_iter_mut().filter_map(integrate));
            }
            #[cfg(not(feature = "parallel"))]
            self.segments
                .extend(self.particles.iter_mut().filter_map(integrate));
        }

        for &i in &self.dead {
            self.particles[i] = spawn(&mut self.rng, motion.width, motion.height, self.base_hue);
        }
    }
}

/// Per-step integration constants.
#[derive(Clone, Copy)]
struct Motion {
    accel: f64,
    damping: f64,
    width: f64,
    height: f64,
}

impl Motion {
    fn integrate<F>(&self, p: &mut Particle, sample: &F, spend_life: bool) -> Option<Segment>
    where
        F: Fn(DVec2) -> f64,
    {
        if p.life == 0 {
            return None;
        }
        let from = p.position;
        let a = DVec2::from_angle(sample(from)) * self.accel;
        p.velocity = (p.velocity + a) * self.damping;
        let moved = from + p.velocity;
        if moved.is_finite() {
            p.position = wrap(moved, self.width, self.height);
        } else {
            p.velocity = DVec2::ZERO;
        }
        if spend_life {
            p.life -= 1;
        }
        Some(Segment {
            from,
            to: p.position,
            hue: p.hue,
            wrapped: p.position != moved,
        })
    }
}

fn spawn(rng: &mut Xorshift64, width: f64, height: f64, base_hue: f64) -> Particle {
    let position = DVec2::new(rng.next_range(0.0, width), rng.next_range(0.0, height));
    let hue = wrap_degrees(base_hue + rng.next_range(-HUE_JITTER, HUE_JITTER));
    Particle {
        position,
        velocity: DVec2::ZERO,
        hue,
        life: rng.next_u32_range(LIFE_RANGE.0, LIFE_RANGE.1),
    }
}

/// Wraps `p` into `[0, w) × [0, h)`.
fn wrap(p: DVec2, w: f64, h: f64) -> DVec2 {
    let axis = |v: f64, len: f64| {
        let r = v.rem_euclid(len);
        // rem_euclid can round up to `len` for tiny negative inputs.
        if r >= len {
            0.0
        } else {
            r
        }
    };
    DVec2::new(axis(p.x, w), axis(p.y, h))
}
