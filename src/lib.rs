//! Edge people counting.
//!
//! Camera frames go through a person detector and a centroid tracker; each
//! track's position is fed to a two-line tripwire that turns ordered boundary
//! crossings into `enter` / `exit` events. Events, registration batches and
//! heartbeats are delivered to a remote server from a worker thread.
//!
//! ```text
//! FrameSource -> DetectionSource -> CentroidTracker -> Tripwire -> Dispatcher -> EventSink
//!      \____________________ RegistrationBuffer ________________________/
//! ```

pub mod camera;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod frame;
pub mod operator;
pub mod pipeline;
pub mod registration;
pub mod tracker;
pub mod tripwire;

pub use camera::{CameraConfig, CaptureError, FrameSource, RpicamSource, ThreadedSource};
pub use config::{ConfigError, PipelineConfig};
pub use detection::{DetectError, DetectionSource, MotionGate, YoloDecoder};
pub use dispatch::{
    DeliveryError, DispatchStats, Dispatcher, DispatcherConfig, EnqueueError, EventSink, HttpSink,
    Outbound,
};
pub use frame::Frame;
pub use operator::OperatorCommand;
pub use pipeline::{CaptureLoop, FrameOutcome, LoopStats, PipelineError};
pub use registration::{RegistrationBatch, RegistrationBuffer, RegistrationError, RegistrationState};
pub use tracker::{CentroidTracker, Detection, Rect, Track, TrackerConfig};
pub use tripwire::{CrossingEvent, CrossingPhase, CrossingState, Direction, Tripwire, TripwireError};

#[cfg(feature = "onnx")]
pub use detection::OnnxDetector;
