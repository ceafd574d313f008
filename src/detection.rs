//! Person detection: the backend trait, YOLO decoding and the motion gate.
//!
//! Backends implement [`DetectionSource`]. Tensor pre/post-processing is kept
//! backend-independent in [`YoloDecoder`]; the ONNX Runtime session wrapper is
//! behind the `onnx` feature.

mod builder;
mod detector;
mod motion;
mod yolo;

pub use builder::DetectionBuilder;
pub use detector::{DetectError, DetectionSource};
pub use motion::{MotionConfig, MotionGate, MotionReading};
pub use yolo::{YoloDecoder, non_max_suppression};

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxDetector;
