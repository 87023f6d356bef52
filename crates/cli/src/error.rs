//! Structured CLI errors with meaningful exit codes.
//!
//! Exit code scheme:
//! - 0:  success
//! - 2:  clap arg parse error (automatic, before our code runs)
//! - 10: engine error (bad dimensions, device, no usable codec)
//! - 11: I/O error (PNG export, capture output)
//! - 12: input error (bad mode or variant name, bad JSON params)
//! - 13: serialization error

use flowfield_core::FlowError;
use std::fmt;

/// Errors produced by CLI operations, each mapped to a distinct exit code.
#[derive(Debug)]
pub enum CliError {
    Engine(FlowError),
    Io(String),
    Input(String),
    Serialization(String),
}

impl CliError {
    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Engine(_) => 10,
            CliError::Io(_) => 11,
            CliError::Input(_) => 12,
            CliError::Serialization(_) => 13,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Engine(e) => write!(f, "{e}"),
            CliError::Io(msg) | CliError::Input(msg) | CliError::Serialization(msg) => {
                f.write_str(msg)
            }
        }
    }
}

impl From<FlowError> for CliError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::Io(msg) => CliError::Io(msg),
            e @ (FlowError::UnknownRenderMode(_) | FlowError::UnknownFieldVariant(_)) => {
                CliError::Input(e.to_string())
            }
            other => CliError::Engine(other),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}
