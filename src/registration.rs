//! Operator-driven registration capture.
//!
//! `Idle -> Capturing -> AwaitingLabel -> Submitted`. Only one session exists
//! at a time; the buffer owns the captured frames until the batch is handed
//! off or discarded.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Idle,
    Capturing,
    AwaitingLabel,
    Submitted,
}

impl RegistrationState {
    /// A session is in progress and owns a partial or complete batch.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Capturing | Self::AwaitingLabel)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("registration already in progress ({state:?}, {captured}/{target} frames)")]
    Busy {
        state: RegistrationState,
        captured: usize,
        target: usize,
    },
    #[error("no captured batch is waiting for a label (state {0:?})")]
    NotAwaitingLabel(RegistrationState),
    #[error("no registration session to abort")]
    NotActive,
}

/// A finished capture session ready for submission.
#[derive(Debug, Clone)]
pub struct RegistrationBatch {
    pub session_id: u64,
    pub member_id: Option<String>,
    pub frames: Vec<Frame>,
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Frames per batch
    pub frames: usize,
    /// Minimum spacing between captured frames; zero takes consecutive frames
    pub capture_interval: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            frames: 10,
            capture_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct RegistrationBuffer {
    config: RegistrationConfig,
    state: RegistrationState,
    frames: Vec<Frame>,
    session_id: u64,
}

impl RegistrationBuffer {
    pub fn new(config: RegistrationConfig) -> Self {
        let capacity = config.frames;
        Self {
            config,
            state: RegistrationState::Idle,
            frames: Vec::with_capacity(capacity),
            session_id: 0,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn captured(&self) -> usize {
        self.frames.len()
    }

    pub fn target(&self) -> usize {
        self.config.frames
    }

    /// Id of the current (or last) session; 0 before the first one.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Start a capture session.
    pub fn begin(&mut self) -> Result<u64, RegistrationError> {
        if self.state.is_active() {
            return Err(RegistrationError::Busy {
                state: self.state,
                captured: self.frames.len(),
                target: self.config.frames,
            });
        }
        self.session_id += 1;
        self.frames.clear();
        self.state = RegistrationState::Capturing;
        info!(session_id = self.session_id, target = self.config.frames, "registration capture started");
        Ok(self.session_id)
    }

    /// Offer a live frame. Returns `true` on the frame that completes the batch.
    pub fn offer(&mut self, frame: &Frame) -> bool {
        if self.state != RegistrationState::Capturing {
            return false;
        }
        if let Some(last) = self.frames.last() {
            let since = frame.captured_at.saturating_duration_since(last.captured_at);
            if since < self.config.capture_interval {
                return false;
            }
        }

        self.frames.push(frame.clone());
        debug!(
            session_id = self.session_id,
            captured = self.frames.len(),
            "registration frame captured"
        );

        if self.frames.len() >= self.config.frames {
            self.state = RegistrationState::AwaitingLabel;
            info!(session_id = self.session_id, "registration capture complete, awaiting label");
            return true;
        }
        false
    }

    /// Attach the operator's label and hand the batch off.
    pub fn label(&mut self, member_id: Option<String>) -> Result<RegistrationBatch, RegistrationError> {
        if self.state != RegistrationState::AwaitingLabel {
            return Err(RegistrationError::NotAwaitingLabel(self.state));
        }
        let member_id = member_id
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        self.state = RegistrationState::Submitted;
        Ok(RegistrationBatch {
            session_id: self.session_id,
            member_id,
            frames: std::mem::take(&mut self.frames),
            complete: true,
        })
    }

    /// Discard the session in progress. Returns how many frames were dropped.
    pub fn abort(&mut self) -> Result<usize, RegistrationError> {
        if !self.state.is_active() {
            return Err(RegistrationError::NotActive);
        }
        let dropped = self.frames.len();
        self.frames.clear();
        self.state = RegistrationState::Idle;
        info!(session_id = self.session_id, dropped, "registration aborted");
        Ok(dropped)
    }
}
