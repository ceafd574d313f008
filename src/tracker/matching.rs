//! Detection type and greedy centroid association.

use ndarray::Array2;

use crate::tracker::rect::Rect;

/// Class id of "person" in COCO-trained detectors.
pub const PERSON_CLASS: usize = 0;

/// Detection input for the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box in frame pixels
    pub bbox: Rect,
    /// Detector class id
    pub class_id: usize,
    /// Detection confidence score
    pub score: f32,
}

impl Detection {
    /// A person detection from corner coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            class_id: PERSON_CLASS,
            score,
        }
    }

    pub fn from_rect(bbox: Rect, class_id: usize, score: f32) -> Self {
        Self {
            bbox,
            class_id,
            score,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }
}

/// Euclidean distances between track centroids (rows) and detection centroids (columns).
pub fn centroid_distance(track_points: &[(f32, f32)], detections: &[Detection]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_points.len(), detections.len()));
    for (i, &(tx, ty)) in track_points.iter().enumerate() {
        for (j, det) in detections.iter().enumerate() {
            let (dx, dy) = det.center();
            dists[[i, j]] = ((tx - dx).powi(2) + (ty - dy).powi(2)).sqrt();
        }
    }
    dists
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Greedy assignment over a distance matrix.
///
/// Every pair strictly below `max_distance` is a candidate. Candidates are
/// taken in ascending distance; equal distances go to the lower track id
/// (`track_ids[row]`), then to the lower detection index. The result is a
/// deterministic function of its inputs.
pub fn greedy_assignment(
    cost_matrix: &Array2<f32>,
    track_ids: &[u64],
    max_distance: f32,
) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();
    debug_assert_eq!(num_rows, track_ids.len());

    let mut candidates: Vec<(f32, u64, usize, usize)> = Vec::new();
    for row in 0..num_rows {
        for col in 0..num_cols {
            let d = cost_matrix[[row, col]];
            if d.is_finite() && d < max_distance {
                candidates.push((d, track_ids[row], col, row));
            }
        }
    }
    candidates.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut row_taken = vec![false; num_rows];
    let mut col_taken = vec![false; num_cols];
    let mut matches = Vec::new();
    for (_, _, col, row) in candidates {
        if row_taken[row] || col_taken[col] {
            continue;
        }
        row_taken[row] = true;
        col_taken[col] = true;
        matches.push((row, col));
    }
    matches.sort_unstable();

    let unmatched_tracks = (0..num_rows).filter(|&r| !row_taken[r]).collect();
    let unmatched_detections = (0..num_cols).filter(|&c| !col_taken[c]).collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nearest_wins() {
        let dists = array![[10.0, 50.0], [40.0, 5.0]];
        let result = greedy_assignment(&dists, &[1, 2], 100.0);
        assert_eq!(result.matches, vec![(0, 0), (1, 1)]);
        assert!(result.unmatched_tracks.is_empty());
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_smaller_distance_wins_contested_detection() {
        // Both tracks are closest to detection 0; track row 1 is closer.
        let dists = array![[20.0, 90.0], [10.0, 95.0]];
        let result = greedy_assignment(&dists, &[1, 2], 50.0);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_exact_tie_goes_to_older_track() {
        // Rows are deliberately out of id order.
        let dists = array![[50.0], [50.0]];
        let result = greedy_assignment(&dists, &[7, 3], 100.0);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let dists = array![[100.0]];
        let result = greedy_assignment(&dists, &[1], 100.0);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_empty_inputs() {
        let dists = Array2::<f32>::zeros((0, 2));
        let result = greedy_assignment(&dists, &[], 10.0);
        assert_eq!(result.unmatched_detections, vec![0, 1]);
    }
}
