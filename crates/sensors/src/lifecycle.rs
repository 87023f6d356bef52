//! Adapter lifecycle shared by the motion and audio adapters.
//!
//! `disabled → enabling → active → disabled`. Acquisition runs on its own
//! thread so the frame loop never blocks on a device permission prompt or a
//! slow driver; the adapter polls for the outcome once per frame.

use std::fmt;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use flowfield_core::error::FlowError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    #[default]
    Disabled,
    Enabling,
    Active,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdapterState::Disabled => "disabled",
            AdapterState::Enabling => "enabling",
            AdapterState::Active => "active",
        })
    }
}

/// A live connection to a capture device. Dropping it releases the device.
pub trait DeviceSession: Send {
    /// Stops delivery. Called once before the session is dropped.
    fn stop(&mut self) {}
}

/// Outcome of polling an in-flight acquisition.
pub(crate) enum Poll<T> {
    Waiting,
    Ready(Result<T, FlowError>),
}

/// A device acquisition running on a background thread.
///
/// Dropping it abandons the result; a session acquired after that is dropped
/// by the acquisition thread, which releases the device.
pub(crate) struct Pending<T> {
    device: String,
    rx: Receiver<Result<T, FlowError>>,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn spawn<F>(device: &str, acquire: F) -> Result<Self, FlowError>
    where
        F: FnOnce() -> Result<T, FlowError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("acquire-{device}"))
            .spawn(move || {
                // The adapter may have given up already.
                let _ = tx.send(acquire());
            })
            .map_err(|e| FlowError::device(device, format!("spawn acquisition thread: {e}")))?;
        Ok(Self {
            device: device.to_string(),
            rx,
        })
    }

    pub(crate) fn poll(&self) -> Poll<T> {
        match self.rx.try_recv() {
            Ok(result) => Poll::Ready(result),
            Err(TryRecvError::Empty) => Poll::Waiting,
            Err(TryRecvError::Disconnected) => Poll::Ready(Err(FlowError::device(
                self.device.clone(),
                "acquisition thread exited without a result",
            ))),
        }
    }
}
