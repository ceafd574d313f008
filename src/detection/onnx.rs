//! ONNX Runtime backend for the person detector.
//!
//! Enabled with the `onnx` feature. Tensor layout and decoding live in
//! [`YoloDecoder`]; this module only owns the session.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use ort::session::Session;
use tracing::info;

use super::detector::{DetectError, DetectionSource};
use super::yolo::YoloDecoder;
use crate::frame::Frame;
use crate::tracker::Detection;

/// YOLOv8 detector running on ONNX Runtime (CPU execution provider).
pub struct OnnxDetector {
    session: Session,
    input_name: String,
    output_name: String,
    decoder: YoloDecoder,
}

impl std::fmt::Debug for OnnxDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxDetector")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("decoder", &self.decoder)
            .finish()
    }
}

impl OnnxDetector {
    /// Load a model from disk. Any failure here is a startup error.
    pub fn load<P: AsRef<Path>>(
        path: P,
        input_name: impl Into<String>,
        output_name: impl Into<String>,
        decoder: YoloDecoder,
    ) -> Result<Self, DetectError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DetectError::model_load(format!(
                "model not found: {}",
                path.display()
            )));
        }
        info!(?path, "loading ONNX model");

        let session = Session::builder()
            .map_err(|e| DetectError::model_load(format!("failed to create session builder: {e}")))?
            .commit_from_file(path)
            .map_err(|e| DetectError::model_load(format!("failed to load model: {e}")))?;

        info!(input_size = decoder.input_size, "ONNX model loaded");
        Ok(Self {
            session,
            input_name: input_name.into(),
            output_name: output_name.into(),
            decoder,
        })
    }

    fn infer(&mut self, frame: &Frame) -> Result<ArrayD<f32>, DetectError> {
        let input = self.decoder.preprocess(&frame.image)?;

        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.into_raw_vec_and_offset().0;
        let tensor = ort::value::Tensor::from_array((shape, data))
            .map_err(|e| DetectError::inference(format!("failed to create input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| DetectError::inference(format!("session run failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            DetectError::inference(format!("model has no output named {}", self.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::inference(format!("output is not an f32 tensor: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| DetectError::inference(format!("output shape error: {e}")))
    }
}

impl DetectionSource for OnnxDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let output = self.infer(frame)?;
        self.decoder
            .decode(output.view(), frame.width(), frame.height())
    }
}
