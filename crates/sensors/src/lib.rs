#![deny(unsafe_code)]
//! Sensor adapters that modulate the flow field.
//!
//! [`MotionAdapter`] turns a video feed into a motion magnitude and a domain
//! offset target; [`AudioAdapter`] turns microphone input into low/mid/high
//! band energies. Both follow the same `disabled → enabling → active` lifecycle,
//! acquire their device off the frame loop, and hand data across threads
//! through lock-free rings and slots. Devices are injected through the
//! [`VideoDevice`] and [`AudioDevice`] traits; the `cpal` feature adds a real
//! microphone backend.

pub mod audio;
#[cfg(feature = "cpal")]
pub mod cpal_input;
pub mod lifecycle;
pub mod motion;
pub mod slot;
pub mod spectrum;

pub use audio::{AudioAdapter, AudioDevice, AudioStream, SamplePublisher};
pub use lifecycle::{AdapterState, DeviceSession};
pub use motion::{FramePublisher, MotionAdapter, MotionAnalyzer, MotionConfig, VideoDevice, VideoFrame};
pub use slot::LatestSample;
pub use spectrum::{AudioBands, SpectrumAnalyzer, SpectrumConfig};
