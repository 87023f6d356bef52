#![deny(unsafe_code)]
//! Frame loop for the flowfield visualizer.
//!
//! [`FlowEngine`] is the host-facing facade. The host calls
//! [`FlowEngine::on_vsync`] once per display refresh with the current
//! [`ControlValues`](flowfield_core::ControlValues); the engine runs a frame
//! only while its [`Scheduler`] has a request pending, polls the sensor
//! adapters, renders through the dispatcher, and feeds any active
//! [`CaptureSession`].

pub mod capture;
pub mod config;
pub mod engine;
pub mod scheduler;

pub use capture::{
    BuiltinEncoders, CaptureArtifact, CaptureFrame, CaptureSession, EncoderFactory, EncoderParams,
    VideoEncoder, DEFAULT_CODECS,
};
pub use config::{CaptureConfig, EngineConfig};
pub use engine::FlowEngine;
pub use scheduler::{PlayState, Scheduler};
