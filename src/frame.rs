//! Decoded camera frame shared between the capture loop, registration and dispatch.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;

/// One decoded RGB frame. Cloning is cheap; pixel data is shared.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number assigned by the frame source, starting at 1
    pub index: u64,
    /// Monotonic acquisition time
    pub captured_at: Instant,
    /// Wall-clock acquisition time
    pub timestamp: DateTime<Utc>,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            captured_at: Instant::now(),
            timestamp: Utc::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
