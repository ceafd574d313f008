/// Observation state of a live track.
///
/// Retired tracks are dropped from the tracker outright, so there is no
/// removed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Matched to a detection on the latest update
    #[default]
    Tracked,
    /// Unmatched on the latest update, still inside the retirement window
    Lost,
}
