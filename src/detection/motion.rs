//! Sampled-pixel motion gate.
//!
//! Inference dominates the per-frame cost. When nobody is being tracked the
//! capture loop asks the gate whether anything moved in the band around the
//! tripwire lines, and skips the detector otherwise. The check compares a
//! fixed set of randomly placed luma samples against the previous frame (mean
//! absolute difference), which costs a few hundred pixel reads.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Number of sampled pixels
    pub sample_size: usize,
    /// Mean absolute luma difference (0-255) counted as motion
    pub threshold: f32,
    /// Consecutive motion readings needed to open the gate
    pub min_motion_frames: u32,
    /// Frames the gate stays open after it last opened
    pub hold_frames: u32,
    /// Seed for sample placement
    pub seed: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sample_size: 500,
            threshold: 15.0,
            min_motion_frames: 1,
            hold_frames: 15,
            seed: 0x5eed,
        }
    }
}

/// Result of one motion check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReading {
    /// Mean absolute difference against the previous frame, 0 on the first frame
    pub mae: f32,
    /// Whether the detector should run on this frame
    pub open: bool,
}

pub struct MotionGate {
    config: MotionConfig,
    points: Vec<(u32, u32)>,
    previous: Option<Vec<u8>>,
    motion_count: u32,
    hold_remaining: u32,
}

impl MotionGate {
    /// Place samples in the column band `[x_min, x_max)` of a `frame_width` x
    /// `frame_height` frame.
    pub fn new(
        config: MotionConfig,
        x_min: u32,
        x_max: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let x_max = x_max.min(frame_width).max(x_min + 1);
        let y_max = frame_height.max(1);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let points = (0..config.sample_size)
            .map(|_| (rng.gen_range(x_min..x_max), rng.gen_range(0..y_max)))
            .collect();

        Self {
            config,
            points,
            previous: None,
            motion_count: 0,
            hold_remaining: 0,
        }
    }

    pub fn check(&mut self, image: &RgbImage) -> MotionReading {
        let samples: Vec<u8> = self
            .points
            .iter()
            .map(|&(x, y)| match image.get_pixel_checked(x, y) {
                Some(p) => luma(p.0),
                None => 0,
            })
            .collect();

        let mae = self
            .previous
            .as_deref()
            .map_or(0.0, |prev| mean_abs_diff(prev, &samples));
        self.previous = Some(samples);

        if mae > self.config.threshold {
            self.motion_count += 1;
        } else {
            self.motion_count = 0;
        }

        if self.motion_count >= self.config.min_motion_frames.max(1) {
            self.motion_count = 0;
            self.hold_remaining = self.config.hold_frames;
            trace!(mae, "motion gate opened");
            return MotionReading { mae, open: true };
        }

        if self.hold_remaining > 0 {
            self.hold_remaining -= 1;
            return MotionReading { mae, open: true };
        }

        MotionReading { mae, open: false }
    }
}

/// ITU-R BT.601 luma.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

fn mean_abs_diff(a: &[u8], b: &[u8]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let total: u32 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
        .sum();
    total as f32 / a.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gate(hold_frames: u32) -> MotionGate {
        MotionGate::new(
            MotionConfig {
                hold_frames,
                ..MotionConfig::default()
            },
            200,
            440,
            640,
            480,
        )
    }

    #[test]
    fn test_static_scene_keeps_gate_closed() {
        let mut gate = gate(0);
        let frame = RgbImage::from_pixel(640, 480, Rgb([80, 80, 80]));
        assert!(!gate.check(&frame).open);
        for _ in 0..5 {
            let reading = gate.check(&frame);
            assert_eq!(reading.mae, 0.0);
            assert!(!reading.open);
        }
    }

    #[test]
    fn test_change_in_band_opens_gate() {
        let mut gate = gate(0);
        gate.check(&RgbImage::from_pixel(640, 480, Rgb([0, 0, 0])));
        let reading = gate.check(&RgbImage::from_pixel(640, 480, Rgb([200, 200, 200])));
        assert!(reading.open);
        assert!(reading.mae > 100.0);
    }

    #[test]
    fn test_change_outside_band_is_ignored() {
        let mut gate = gate(0);
        let dark = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
        let mut lit = dark.clone();
        for (x, _, p) in lit.enumerate_pixels_mut() {
            if x < 200 || x >= 440 {
                *p = Rgb([255, 255, 255]);
            }
        }
        gate.check(&dark);
        assert!(!gate.check(&lit).open);
    }

    #[test]
    fn test_gate_holds_open() {
        let mut gate = gate(2);
        let dark = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
        let lit = RgbImage::from_pixel(640, 480, Rgb([255, 255, 255]));
        gate.check(&dark);
        assert!(gate.check(&lit).open);
        assert!(gate.check(&lit).open);
        assert!(gate.check(&lit).open);
        assert!(!gate.check(&lit).open);
    }
}
