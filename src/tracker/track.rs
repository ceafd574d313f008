//! A single tracked person.

use std::collections::VecDeque;

use ndarray::{Array1, Array2};

use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;
use crate::tripwire::CrossingState;

/// One person under continuous observation.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique track identifier, never reused by the tracker that issued it
    pub track_id: u64,
    /// Current observation state
    pub state: TrackState,
    /// Most recent matched bounding box
    pub bbox: Rect,
    /// Detection confidence of the last match
    pub score: f32,
    /// Update index at which the track was created
    pub start_frame: u64,
    /// Update index of the last match
    pub last_seen: u64,
    /// Consecutive updates without a match
    pub missed: u32,
    /// Tripwire progress; owned here, mutated by the tripwire
    pub crossing: CrossingState,
    history: VecDeque<(f32, f32)>,
    history_len: usize,
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl Track {
    pub(crate) fn new(
        track_id: u64,
        detection: &Detection,
        frame_index: u64,
        history_len: usize,
        kalman_filter: &KalmanFilter,
    ) -> Self {
        let (cx, cy) = detection.center();
        let (mean, covariance) =
            kalman_filter.initiate([cx as f64, cy as f64], detection.bbox.height as f64);

        let mut history = VecDeque::with_capacity(history_len.max(1));
        history.push_back((cx, cy));

        Self {
            track_id,
            state: TrackState::Tracked,
            bbox: detection.bbox,
            score: detection.score,
            start_frame: frame_index,
            last_seen: frame_index,
            missed: 0,
            crossing: CrossingState::default(),
            history,
            history_len: history_len.max(1),
            mean,
            covariance,
        }
    }

    /// Last measured centroid.
    pub fn centroid(&self) -> (f32, f32) {
        self.history
            .back()
            .copied()
            .unwrap_or_else(|| self.bbox.center())
    }

    /// Centroid predicted by the motion model for the current update.
    pub fn predicted_centroid(&self) -> (f32, f32) {
        (self.mean[0] as f32, self.mean[1] as f32)
    }

    /// Centroid history, oldest first. Gaps are filled by interpolation.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &(f32, f32)> {
        self.history.iter()
    }

    /// Whether the track was matched on update `frame_index`.
    pub fn is_observed_at(&self, frame_index: u64) -> bool {
        self.state == TrackState::Tracked && self.last_seen == frame_index
    }

    pub(crate) fn predict(&mut self, kalman_filter: &KalmanFilter) {
        let (mean, covariance) =
            kalman_filter.predict(&self.mean, &self.covariance, self.bbox.height as f64);
        self.mean = mean;
        self.covariance = covariance;
    }

    pub(crate) fn update(
        &mut self,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
        frame_index: u64,
    ) {
        let (cx, cy) = detection.center();

        let gap = frame_index.saturating_sub(self.last_seen).saturating_sub(1);
        if gap > 0 {
            let (px, py) = self.centroid();
            let steps = gap + 1;
            // Only the newest points survive the bounded history.
            let fill = gap.min(self.history_len as u64 - 1);
            for k in (gap - fill + 1)..=gap {
                let t = k as f32 / steps as f32;
                self.push_history((px + (cx - px) * t, py + (cy - py) * t));
            }
        }
        self.push_history((cx, cy));

        let (mean, covariance) = kalman_filter.update(
            &self.mean,
            &self.covariance,
            [cx as f64, cy as f64],
            detection.bbox.height as f64,
        );
        self.mean = mean;
        self.covariance = covariance;

        self.bbox = detection.bbox;
        self.score = detection.score;
        self.last_seen = frame_index;
        self.missed = 0;
        self.state = TrackState::Tracked;
    }

    pub(crate) fn mark_missed(&mut self) {
        self.missed += 1;
        self.state = TrackState::Lost;
    }

    fn push_history(&mut self, point: (f32, f32)) {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_is_interpolated() {
        let kf = KalmanFilter::new();
        let mut track = Track::new(1, &Detection::new(90.0, 0.0, 110.0, 100.0, 0.9), 1, 30, &kf);

        track.predict(&kf);
        track.mark_missed();
        track.predict(&kf);
        track.mark_missed();
        track.predict(&kf);
        track.update(&Detection::new(120.0, 0.0, 140.0, 100.0, 0.9), &kf, 4);

        let xs: Vec<f32> = track.history().map(|p| p.0).collect();
        let expected = [100.0, 110.0, 120.0, 130.0];
        assert_eq!(xs.len(), expected.len());
        for (x, e) in xs.iter().zip(expected) {
            assert!((x - e).abs() < 1e-3, "{xs:?}");
        }
        assert_eq!(track.centroid(), (130.0, 50.0));
        assert_eq!(track.missed, 0);
        assert!(track.is_observed_at(4));
    }

    #[test]
    fn test_history_is_bounded() {
        let kf = KalmanFilter::new();
        let mut track = Track::new(1, &Detection::new(0.0, 0.0, 10.0, 10.0, 0.9), 1, 3, &kf);
        for frame in 2..=10u64 {
            let x = frame as f32 * 10.0;
            track.predict(&kf);
            track.update(&Detection::new(x, 0.0, x + 10.0, 10.0, 0.9), &kf, frame);
        }
        assert_eq!(track.history().len(), 3);
        assert_eq!(track.centroid().0, 105.0);
    }

    #[test]
    fn test_long_gap_fills_at_most_history_len() {
        let kf = KalmanFilter::new();
        let mut track = Track::new(1, &Detection::new(0.0, 0.0, 20.0, 100.0, 0.9), 1, 5, &kf);
        track.predict(&kf);
        track.update(
            &Detection::new(990.0, 0.0, 1010.0, 100.0, 0.9),
            &kf,
            1_000_000_001,
        );

        let xs: Vec<f32> = track.history().map(|p| p.0).collect();
        assert_eq!(xs.len(), 5);
        assert_eq!(xs[4], 1000.0);
        // The kept points are the tail of the interpolation, just short of the measurement.
        assert!(xs.windows(2).all(|w| w[0] <= w[1]), "{xs:?}");
        assert!(xs[0] > 999.0, "{xs:?}");
    }
}
