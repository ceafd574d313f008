//! Greedy nearest-centroid multi-object tracker.

use tracing::{debug, trace};

use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::{self, AssignmentResult, Detection};
use crate::tracker::track::Track;

/// Configuration for the CentroidTracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Association threshold in pixels; a detection further than this from a
    /// track's predicted centroid cannot match it.
    pub max_distance: f32,
    /// A track is retired once it has gone unmatched for more than this many
    /// consecutive updates.
    pub max_missed_frames: u32,
    /// Number of centroids kept per track.
    pub history_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_distance: 160.0,
            max_missed_frames: 10,
            history_len: 30,
        }
    }
}

pub struct CentroidTracker {
    tracks: Vec<Track>,
    next_id: u64,
    frame_id: u64,
    config: TrackerConfig,
    kalman_filter: KalmanFilter,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            frame_id: 0,
            config,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Live tracks, ordered by id.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Advance by one processed frame.
    ///
    /// `frame_index` must increase between calls; it is the index recorded as
    /// `last_seen` on matched tracks and the gap between two indices drives
    /// history interpolation. Returns every live track, matched or not.
    pub fn update(&mut self, detections: &[Detection], frame_index: u64) -> &mut [Track] {
        debug_assert!(
            self.frame_id == 0 || frame_index > self.frame_id,
            "frame index must increase"
        );
        self.frame_id = frame_index;

        // Step 1: predict every track forward one update
        for track in self.tracks.iter_mut() {
            track.predict(&self.kalman_filter);
        }

        // Step 2: associate against predicted centroids
        let predicted: Vec<(f32, f32)> =
            self.tracks.iter().map(|t| t.predicted_centroid()).collect();
        let track_ids: Vec<u64> = self.tracks.iter().map(|t| t.track_id).collect();
        let dists = matching::centroid_distance(&predicted, detections);

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::greedy_assignment(&dists, &track_ids, self.config.max_distance);

        for (itrack, idet) in matches {
            let track = &mut self.tracks[itrack];
            track.update(&detections[idet], &self.kalman_filter, frame_index);
            trace!(track_id = track.track_id, "matched");
        }

        // Step 3: age unmatched tracks
        for itrack in unmatched_tracks {
            self.tracks[itrack].mark_missed();
        }

        // Step 4: retire tracks past the timeout
        let max_missed = self.config.max_missed_frames;
        self.tracks.retain(|t| {
            let keep = t.missed <= max_missed;
            if !keep {
                debug!(track_id = t.track_id, missed = t.missed, "track retired");
            }
            keep
        });

        // Step 5: init new tracks, in detection order
        for idet in unmatched_detections {
            let track_id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track::new(
                track_id,
                &detections[idet],
                frame_index,
                self.config.history_len,
                &self.kalman_filter,
            ));
            debug!(track_id, "track started");
        }

        &mut self.tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_at(cx: f32) -> Detection {
        Detection::new(cx - 20.0, 100.0, cx + 20.0, 200.0, 0.9)
    }

    #[test]
    fn test_ids_are_monotonic_and_ordered() {
        let mut tracker = CentroidTracker::new(TrackerConfig::default());
        let tracks = tracker.update(&[person_at(100.0), person_at(400.0)], 1);
        let ids: Vec<u64> = tracks.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let tracks = tracker.update(&[person_at(105.0), person_at(405.0), person_at(600.0)], 2);
        let ids: Vec<u64> = tracks.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_far_detection_spawns_new_track() {
        let mut tracker = CentroidTracker::new(TrackerConfig {
            max_distance: 50.0,
            ..TrackerConfig::default()
        });
        tracker.update(&[person_at(100.0)], 1);
        let tracks = tracker.update(&[person_at(300.0)], 2);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_id, 1);
        assert!(!tracks[0].is_observed_at(2));
        assert_eq!(tracks[1].track_id, 2);
    }

    #[test]
    fn test_equidistant_detection_goes_to_older_track() {
        let mut tracker = CentroidTracker::new(TrackerConfig::default());
        tracker.update(&[person_at(100.0), person_at(200.0)], 1);

        let tracks = tracker.update(&[person_at(150.0)], 2);
        let matched: Vec<u64> = tracks
            .iter()
            .filter(|t| t.is_observed_at(2))
            .map(|t| t.track_id)
            .collect();
        assert_eq!(matched, vec![1]);
    }

    #[test]
    fn test_empty_update_ages_tracks() {
        let mut tracker = CentroidTracker::new(TrackerConfig {
            max_missed_frames: 2,
            ..TrackerConfig::default()
        });
        tracker.update(&[person_at(100.0)], 1);
        assert_eq!(tracker.update(&[], 2)[0].missed, 1);
        assert_eq!(tracker.update(&[], 3)[0].missed, 2);
        assert!(tracker.update(&[], 4).is_empty());
    }
}
