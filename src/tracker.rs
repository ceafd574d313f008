mod centroid_tracker;
mod kalman_filter;
mod matching;
mod rect;
mod track;
mod track_state;

pub use centroid_tracker::{CentroidTracker, TrackerConfig};
pub use matching::{AssignmentResult, Detection, PERSON_CLASS, centroid_distance, greedy_assignment};
pub use rect::Rect;
pub use track::Track;
pub use track_state::TrackState;
