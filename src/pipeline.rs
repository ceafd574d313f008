//! The capture loop: frame in, crossing events and registration batches out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::camera::{CaptureError, FrameSource};
use crate::config::{ConfigError, PipelineConfig};
use crate::detection::{DetectionSource, MotionGate};
use crate::dispatch::{DispatchStats, Dispatcher, Heartbeat, Outbound, RegistrationOutcome};
use crate::frame::Frame;
use crate::operator::OperatorCommand;
use crate::registration::{RegistrationBuffer, RegistrationError, RegistrationState};
use crate::tracker::CentroidTracker;
use crate::tripwire::{Direction, Tripwire};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("camera failed: {0}")]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub processed: u64,
    /// Frames passed over by the frame-skip stride
    pub skipped: u64,
    /// Frames the motion gate kept from the detector
    pub gated: u64,
    pub detect_errors: u64,
    pub decode_errors: u64,
    /// Polls that timed out waiting for the camera
    pub stalls: u64,
    pub enters: u64,
    pub exits: u64,
    /// Messages the dispatcher refused
    pub dropped: u64,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Detector and tracker ran; `events` crossings were emitted.
    Processed { events: usize },
    /// Not this frame's turn under the current stride.
    Skipped,
    /// Static scene and nobody tracked.
    Gated,
    /// The detector failed; state carried forward.
    Failed,
}

/// Frame-skip stride that widens when inference overruns the frame budget.
#[derive(Debug, Clone)]
pub struct AdaptiveStride {
    base: u32,
    max: u32,
    current: u32,
    budget: Duration,
}

impl AdaptiveStride {
    pub fn new(base: u32, max: u32, fps: u32) -> Self {
        let base = base.max(1);
        Self {
            base,
            max: max.max(base),
            current: base,
            budget: Duration::from_secs(1) / fps.max(1),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Adjust the stride from one inference duration.
    pub fn record(&mut self, elapsed: Duration) {
        if elapsed > self.budget && self.current < self.max {
            self.current += 1;
            debug!(stride = self.current, ?elapsed, "inference over budget, widening stride");
        } else if elapsed < self.budget / 2 && self.current > self.base {
            self.current -= 1;
            debug!(stride = self.current, ?elapsed, "inference under budget, narrowing stride");
        }
    }
}

/// Columns the motion gate samples.
///
/// The band reaches one association distance past each line, so a person is
/// picked up on the approach side and its track is born before OUTER (or
/// INNER, walking out).
fn motion_band(tripwire: &Tripwire, reach: f32, width: u32) -> (u32, u32) {
    let x_min = (tripwire.outer_x() - reach).max(0.0) as u32;
    let x_max = ((tripwire.inner_x() + reach).ceil().max(0.0) as u32).min(width);
    (x_min, x_max)
}

/// Runs detector, tracker and tripwire on the calling thread.
///
/// Owns every piece of per-frame state. Network work happens on the
/// [`Dispatcher`] worker; operator commands arrive on a channel that is polled
/// without blocking between frames.
pub struct CaptureLoop<S, D> {
    source: S,
    detector: D,
    tracker: CentroidTracker,
    tripwire: Tripwire,
    registration: RegistrationBuffer,
    motion: Option<MotionGate>,
    dispatcher: Dispatcher,
    commands: Option<Receiver<OperatorCommand>>,
    shutdown: Arc<AtomicBool>,
    stride: AdaptiveStride,
    last_processed: Option<u64>,
    attach_snapshot: bool,
    heartbeat_interval: Option<Duration>,
    last_heartbeat: Option<Instant>,
    started: Instant,
    quit: bool,
    stats: LoopStats,
}

impl<S: FrameSource, D: DetectionSource> CaptureLoop<S, D> {
    pub fn new(
        source: S,
        detector: D,
        dispatcher: Dispatcher,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let tripwire = config.tripwire().map_err(ConfigError::from)?;
        let tracker_config = config.tracker_config();
        let motion = config.motion_config().map(|motion| {
            let (x_min, x_max) =
                motion_band(&tripwire, tracker_config.max_distance, config.camera.width);
            MotionGate::new(motion, x_min, x_max, config.camera.width, config.camera.height)
        });

        Ok(Self {
            source,
            detector,
            tracker: CentroidTracker::new(tracker_config),
            tripwire,
            registration: RegistrationBuffer::new(config.registration_config()),
            motion,
            dispatcher,
            commands: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            stride: AdaptiveStride::new(
                config.detector.frame_skip,
                config.detector.max_frame_skip,
                config.camera.fps,
            ),
            last_processed: None,
            attach_snapshot: config.dispatch.attach_snapshot,
            heartbeat_interval: config.heartbeat_interval(),
            last_heartbeat: None,
            started: Instant::now(),
            quit: false,
            stats: LoopStats::default(),
        })
    }

    pub fn with_commands(mut self, commands: Receiver<OperatorCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Stop the loop between frames once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn tracker(&self) -> &CentroidTracker {
        &self.tracker
    }

    pub fn registration(&self) -> &RegistrationBuffer {
        &self.registration
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn stride(&self) -> u32 {
        self.stride.current()
    }

    fn should_stop(&self) -> bool {
        self.quit || self.shutdown.load(Ordering::Relaxed)
    }

    /// Pull frames until the source ends, the operator quits, or shutdown is
    /// requested. Only a dead camera is an error.
    pub fn run(&mut self) -> Result<LoopStats, PipelineError> {
        info!(
            outer_x = self.tripwire.outer_x(),
            inner_x = self.tripwire.inner_x(),
            "capture loop started"
        );
        while !self.should_stop() {
            self.poll_commands();
            if self.should_stop() {
                break;
            }

            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    self.step(&frame);
                }
                Ok(None) => {
                    info!("frame source ended");
                    break;
                }
                Err(CaptureError::Stalled(waited)) => {
                    self.stats.stalls += 1;
                    debug!(?waited, "no frame from camera");
                }
                Err(e) if e.is_transient() => {
                    self.stats.decode_errors += 1;
                    warn!(error = %e, "skipping undecodable frame");
                }
                Err(e) => {
                    error!(error = %e, "camera stopped");
                    return Err(e.into());
                }
            }
            self.poll_outcomes();
        }
        info!(
            frames = self.stats.frames,
            enters = self.stats.enters,
            exits = self.stats.exits,
            "capture loop stopped"
        );
        Ok(self.stats)
    }

    /// Process one frame.
    pub fn step(&mut self, frame: &Frame) -> FrameOutcome {
        self.stats.frames += 1;
        self.capture_registration(frame);
        self.maybe_heartbeat();

        if let Some(last) = self.last_processed {
            if frame.index.saturating_sub(last) < self.stride.current() as u64 {
                self.stats.skipped += 1;
                return FrameOutcome::Skipped;
            }
        }

        // The gate keeps its reference frame current even while tracks are live.
        if let Some(gate) = self.motion.as_mut() {
            let reading = gate.check(&frame.image);
            if !reading.open && self.tracker.is_empty() {
                self.stats.gated += 1;
                return FrameOutcome::Gated;
            }
        }
        self.last_processed = Some(frame.index);

        let started = Instant::now();
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detect_errors += 1;
                warn!(frame_index = frame.index, error = %e, "detection failed, skipping frame");
                return FrameOutcome::Failed;
            }
        };
        self.stride.record(started.elapsed());
        self.stats.processed += 1;

        let tracks = self.tracker.update(&detections, frame.index);
        let events = self.tripwire.evaluate(tracks, frame.index, frame.timestamp);
        let emitted = events.len();

        for mut event in events {
            match event.direction {
                Direction::Enter => self.stats.enters += 1,
                Direction::Exit => self.stats.exits += 1,
            }
            if self.attach_snapshot {
                event = event.with_snapshot(Arc::clone(&frame.image));
            }
            let track_id = event.track_id;
            if let Err(e) = self.dispatcher.enqueue(Outbound::Crossing(event)) {
                self.stats.dropped += 1;
                warn!(track_id, error = %e, "crossing event not queued");
            }
        }
        FrameOutcome::Processed { events: emitted }
    }

    fn capture_registration(&mut self, frame: &Frame) {
        if self.registration.offer(frame) {
            println!(
                "Captured {} frames. Enter member id (empty line = unlabeled, c = cancel):",
                self.registration.captured()
            );
        }
    }

    fn maybe_heartbeat(&mut self) {
        let Some(interval) = self.heartbeat_interval else {
            return;
        };
        let now = Instant::now();
        if self
            .last_heartbeat
            .is_some_and(|last| now.duration_since(last) < interval)
        {
            return;
        }
        self.last_heartbeat = Some(now);
        let heartbeat = Heartbeat {
            status: "running".to_string(),
            uptime_secs: now.duration_since(self.started).as_secs(),
        };
        if let Err(e) = self.dispatcher.enqueue(Outbound::Heartbeat(heartbeat)) {
            self.stats.dropped += 1;
            debug!(error = %e, "heartbeat not queued");
        }
    }

    fn poll_commands(&mut self) {
        let Some(commands) = &self.commands else {
            return;
        };
        let pending: Vec<_> = commands.try_iter().collect();
        for command in pending {
            self.handle_command(command);
        }
    }

    /// Apply one operator command. Misuse is reported and changes nothing.
    pub fn handle_command(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::Quit => {
                info!("quit requested");
                self.quit = true;
            }
            OperatorCommand::StartRegistration => match self.registration.begin() {
                Ok(session_id) => {
                    println!(
                        "Registration {session_id} started: capturing {} frames",
                        self.registration.target()
                    );
                }
                Err(e) => {
                    warn!(error = %e, "registration request rejected");
                    println!("Cannot start registration: {e}");
                }
            },
            OperatorCommand::Cancel => match self.registration.abort() {
                Ok(dropped) => println!("Registration cancelled ({dropped} frames discarded)"),
                Err(e) => println!("Nothing to cancel: {e}"),
            },
            OperatorCommand::Text(text) => {
                if self.registration.state() == RegistrationState::AwaitingLabel {
                    self.submit_registration(text);
                } else if !text.is_empty() {
                    println!("Unknown command `{text}` (r = register, c = cancel, q = quit)");
                }
            }
        }
    }

    fn submit_registration(&mut self, label: String) {
        let batch = match self.registration.label(Some(label)) {
            Ok(batch) => batch,
            Err(e @ RegistrationError::NotAwaitingLabel(_)) => {
                println!("{e}");
                return;
            }
            Err(e) => {
                warn!(error = %e, "unexpected registration error");
                return;
            }
        };

        let session_id = batch.session_id;
        let member_id = batch.member_id.clone();
        match self.dispatcher.enqueue(Outbound::Registration(batch)) {
            Ok(()) => println!(
                "Submitting registration {session_id} ({})",
                member_id.as_deref().unwrap_or("unlabeled")
            ),
            Err(e) => {
                self.stats.dropped += 1;
                error!(session_id, member_id = member_id.as_deref(), error = %e, "registration not queued");
                println!("Registration {session_id} could not be queued: {e}");
            }
        }
    }

    fn poll_outcomes(&mut self) {
        while let Some(outcome) = self.dispatcher.try_outcome() {
            report_outcome(&outcome);
        }
    }

    /// Stop the dispatcher after it drains its queue.
    pub fn finish(mut self) -> (LoopStats, DispatchStats) {
        if self.registration.state().is_active() {
            info!(
                captured = self.registration.captured(),
                "discarding unfinished registration"
            );
        }
        self.poll_outcomes();
        let stats = self.stats;
        (stats, self.dispatcher.shutdown())
    }
}

fn report_outcome(outcome: &RegistrationOutcome) {
    match &outcome.result {
        Ok(receipt) => println!(
            "Registration {} accepted{}",
            outcome.session_id,
            receipt
                .member_id
                .as_deref()
                .map(|id| format!(" as {id}"))
                .unwrap_or_default()
        ),
        Err(e) => println!(
            "Registration {} failed after {} attempt(s): {e}",
            outcome.session_id, outcome.attempts
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_widens_and_narrows() {
        let mut stride = AdaptiveStride::new(1, 3, 10);
        stride.record(Duration::from_millis(150));
        stride.record(Duration::from_millis(150));
        stride.record(Duration::from_millis(150));
        assert_eq!(stride.current(), 3);

        // Between half and full budget: hold.
        stride.record(Duration::from_millis(70));
        assert_eq!(stride.current(), 3);

        stride.record(Duration::from_millis(10));
        stride.record(Duration::from_millis(10));
        stride.record(Duration::from_millis(10));
        assert_eq!(stride.current(), 1);
    }

    #[test]
    fn test_stride_respects_base() {
        let stride = AdaptiveStride::new(0, 0, 30);
        assert_eq!(stride.current(), 1);
    }

    #[test]
    fn test_motion_band_reaches_past_both_lines() {
        let tripwire = Tripwire::new(200.0, 440.0).unwrap();
        assert_eq!(motion_band(&tripwire, 160.0, 640), (40, 600));
        // Clamped to the frame.
        assert_eq!(motion_band(&tripwire, 320.0, 640), (0, 640));
    }
}
