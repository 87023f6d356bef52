#![deny(unsafe_code)]
//! Core types for the flowfield visualizer.
//!
//! Provides seeded 2D simplex noise (`SimplexNoise`), the direction field built
//! on it (`FlowField`, `FieldVariant`, `FieldState`), the `ParticleSystem`,
//! the `Surface` drawing boundary with its in-memory `Raster`, colors,
//! `ControlValues`, the reproducible run `Seed`, and the `Xorshift32`/`Xorshift64`
//! PRNGs.

pub mod color;
pub mod controls;
pub mod error;
pub mod field;
pub mod noise;
pub mod particle;
pub mod prng;
pub mod seed;
pub mod surface;

pub use color::{hsl_to_srgb, Hsl, Srgb};
pub use controls::ControlValues;
pub use error::FlowError;
pub use field::{FieldConfig, FieldState, FieldVariant, FlowField, RenderMode};
pub use noise::SimplexNoise;
pub use particle::{Particle, ParticleSystem, Segment};
pub use prng::{Xorshift32, Xorshift64};
pub use seed::Seed;
pub use surface::{Composite, Raster, Surface};
