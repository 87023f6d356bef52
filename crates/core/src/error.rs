//! Error types for the flowfield core.

use thiserror::Error;

/// Errors produced by flowfield operations.
///
/// None of these are fatal to the frame loop: device and encoder failures are
/// recovered by the component that hit them, and out-of-range control values
/// are clamped instead of reported.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Width or height was zero (or overflowed) when creating a surface.
    #[error("invalid dimensions: width and height must be non-zero")]
    InvalidDimensions,

    /// A camera or microphone could not be opened.
    #[error("could not acquire {device}: {reason}")]
    DeviceAcquisition { device: String, reason: String },

    /// Every codec in the capture preference list was rejected.
    #[error("no supported video encoding (tried: {})", .tried.join(", "))]
    EncodingUnavailable { tried: Vec<String> },

    /// A render mode name was not recognized.
    #[error("unknown render mode: {0}")]
    UnknownRenderMode(String),

    /// A field variant name was not recognized.
    #[error("unknown field variant: {0}")]
    UnknownFieldVariant(String),

    /// Writing an image or capture artifact failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl FlowError {
    /// Convenience constructor for [`FlowError::DeviceAcquisition`].
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::DeviceAcquisition {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        FlowError::Io(e.to_string())
    }
}
