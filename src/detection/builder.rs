//! Builder for creating Detection objects from raw model rows.

use crate::tracker::{Detection, PERSON_CLASS, Rect};

/// Builder for `Detection` values.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    class_id: usize,
    score: f32,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self {
            class_id: PERSON_CLASS,
            ..Self::default()
        }
    }

    /// Set bounding box from corners (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Set bounding box from centre and size (the YOLO head layout).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::from_center(cx, cy, w, h);
        self
    }

    /// Rescale the box from model input space into frame space.
    pub fn scaled(mut self, sx: f32, sy: f32) -> Self {
        self.bbox = self.bbox.scale(sx, sy);
        self
    }

    /// Clip the box to the frame.
    pub fn clamped(mut self, width: f32, height: f32) -> Self {
        self.bbox = self.bbox.clamp_to(width, height);
        self
    }

    pub fn class_id(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn build(self) -> Detection {
        Detection::from_rect(self.bbox, self.class_id, self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .xywh(320.0, 320.0, 64.0, 128.0)
            .scaled(2.0, 0.75)
            .clamped(1280.0, 480.0)
            .score(0.95)
            .build();

        assert_eq!(det.score, 0.95);
        assert_eq!(det.class_id, PERSON_CLASS);
        assert_eq!(det.bbox.to_tlbr(), [576.0, 192.0, 704.0, 288.0]);
    }

    #[test]
    fn test_builder_clamps_to_frame() {
        let det = DetectionBuilder::new()
            .tlbr(-5.0, -5.0, 50.0, 700.0)
            .clamped(640.0, 480.0)
            .build();
        assert_eq!(det.bbox.to_tlbr(), [0.0, 0.0, 50.0, 480.0]);
    }
}
