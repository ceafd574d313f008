//! Backend-independent YOLOv8 pre- and post-processing.
//!
//! The model takes a `[1, 3, S, S]` RGB tensor in `[0, 1]` and emits
//! `[1, 4 + C, A]`: per anchor a centre/size box in model pixels followed by
//! `C` class scores.

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayViewD, Axis, Ix3};

use super::builder::DetectionBuilder;
use super::detector::DetectError;
use crate::tracker::{Detection, PERSON_CLASS};

#[derive(Debug, Clone)]
pub struct YoloDecoder {
    /// Square model input edge, in pixels
    pub input_size: u32,
    pub min_confidence: f32,
    pub iou_threshold: f32,
    /// Accepted class ids; everything else is dropped
    pub classes: Vec<usize>,
}

impl Default for YoloDecoder {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_confidence: 0.5,
            iou_threshold: 0.45,
            classes: vec![PERSON_CLASS],
        }
    }
}

impl YoloDecoder {
    /// Stretch the frame to the model input and lay it out as NCHW floats.
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>, DetectError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectError::Preprocess("empty frame".to_string()));
        }
        let size = self.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);

        let s = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, s, s));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;
            input[[0, 0, y, x]] = r as f32 / 255.0;
            input[[0, 1, y, x]] = g as f32 / 255.0;
            input[[0, 2, y, x]] = b as f32 / 255.0;
        }
        Ok(input)
    }

    /// Decode a raw output tensor into frame-space detections.
    ///
    /// Fails with `ModelInference` if the tensor is not `[1, 4 + C, A]`.
    pub fn decode(
        &self,
        output: ArrayViewD<'_, f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>, DetectError> {
        let shape = output.shape().to_vec();
        let output = output
            .into_dimensionality::<Ix3>()
            .map_err(|_| DetectError::inference(format!("unexpected output shape {shape:?}")))?;
        if shape[0] != 1 || shape[1] < 5 {
            return Err(DetectError::inference(format!(
                "unexpected output shape {shape:?}, want [1, 4 + classes, anchors]"
            )));
        }

        let rows = output.index_axis(Axis(0), 0);
        let num_classes = shape[1] - 4;
        let sx = frame_width as f32 / self.input_size as f32;
        let sy = frame_height as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for anchor in rows.axis_iter(Axis(1)) {
            let (mut class_id, mut score) = (0usize, f32::MIN);
            for c in 0..num_classes {
                let s = anchor[4 + c];
                if s > score {
                    class_id = c;
                    score = s;
                }
            }
            if score < self.min_confidence || !self.classes.contains(&class_id) {
                continue;
            }

            let det = DetectionBuilder::new()
                .xywh(anchor[0], anchor[1], anchor[2], anchor[3])
                .scaled(sx, sy)
                .clamped(frame_width as f32, frame_height as f32)
                .class_id(class_id)
                .score(score)
                .build();
            if det.bbox.area() > 0.0 {
                detections.push(det);
            }
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

/// Greedy per-class NMS; keeps the highest-scoring box of each overlapping group.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id == xs[index].class_id
                && xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
