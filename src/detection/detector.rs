//! Trait for object detection inference backends.

use thiserror::Error;

use crate::frame::Frame;
use crate::tracker::Detection;

/// Error type for detection failures.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The model could not be loaded; fatal at startup.
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    /// The model ran but did not produce a usable output for this frame.
    #[error("model inference failed: {0}")]
    ModelInference(String),
    /// The frame could not be turned into a model input.
    #[error("preprocessing failed: {0}")]
    Preprocess(String),
}

impl DetectError {
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        DetectError::ModelLoad(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        DetectError::ModelInference(msg.into())
    }

    /// Per-frame failures the capture loop skips over.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DetectError::ModelLoad(_))
    }
}

/// Trait for object detection inference backends.
///
/// Implementations return only detections that pass their confidence and
/// class filters, in frame pixel coordinates.
///
/// # Example
///
/// ```ignore
/// use tripwire_edge::{DetectError, DetectionSource, Detection, Frame};
///
/// struct MyDetector;
///
/// impl DetectionSource for MyDetector {
///     fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionSource {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

impl<D: DetectionSource + ?Sized> DetectionSource for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        (**self).detect(frame)
    }
}
