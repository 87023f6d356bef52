//! Frame request bookkeeping for a vsync-driven loop.
//!
//! At most one frame request is pending at a time. `play` schedules one,
//! `pause` cancels it, and the host's refresh callback takes it with
//! [`Scheduler::take_due`] before doing any work. After a frame runs the
//! engine calls [`Scheduler::reschedule`], which only queues the next request
//! if the scheduler is still running.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayState::Stopped => "stopped",
            PlayState::Running => "running",
        })
    }
}

/// Identifier of one scheduled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

#[derive(Debug, Default)]
pub struct Scheduler {
    state: PlayState,
    pending: Option<FrameRequest>,
    next_id: u64,
    executed: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlayState::Running
    }

    pub fn pending(&self) -> Option<FrameRequest> {
        self.pending
    }

    /// Frames taken by [`take_due`](Self::take_due) so far.
    pub fn frames_executed(&self) -> u64 {
        self.executed
    }

    /// Enters running and schedules a request if none is pending.
    pub fn play(&mut self) {
        if self.state != PlayState::Running {
            debug!("animation started");
        }
        self.state = PlayState::Running;
        if self.pending.is_none() {
            self.schedule();
        }
    }

    /// Enters stopped and cancels the pending request. Idempotent.
    pub fn pause(&mut self) {
        if self.state == PlayState::Running {
            debug!(frames = self.executed, "animation paused");
        }
        self.state = PlayState::Stopped;
        self.pending = None;
    }

    /// Takes the pending request, if any. A frame must only run when this
    /// returns `Some`.
    pub fn take_due(&mut self) -> Option<FrameRequest> {
        let req = self.pending.take()?;
        self.executed += 1;
        Some(req)
    }

    /// Queues the next request after a frame, unless paused in the meantime.
    pub fn reschedule(&mut self) {
        if self.state == PlayState::Running && self.pending.is_none() {
            self.schedule();
        }
    }

    fn schedule(&mut self) {
        self.pending = Some(FrameRequest(self.next_id));
        self.next_id += 1;
    }
}
