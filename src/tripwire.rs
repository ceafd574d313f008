//! Dual-line tripwire: turns track trajectories into entry/exit events.
//!
//! Two vertical lines at `outer_x < inner_x`. The approach side is left of
//! OUTER, the protected side right of INNER. A track enters by crossing OUTER
//! and then INNER, and exits by crossing INNER and then OUTER, each as an
//! ordered pair observed on the same track. Direction is never inferred from a
//! single step's velocity.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::tracker::Track;

#[derive(Debug, Error, PartialEq)]
pub enum TripwireError {
    #[error("outer line ({outer_x}) must lie left of inner line ({inner_x})")]
    Misordered { outer_x: f32, inner_x: f32 },
    #[error("tripwire coordinate {0} is not a finite pixel position")]
    NotFinite(f32),
}

/// Last boundary a track has been seen to cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrossingPhase {
    /// No boundary information yet
    #[default]
    Unseen,
    /// Known to be on the approach side with no approach in progress
    AtOuterSide,
    /// Crossed OUTER last
    CrossedOuter,
    /// Crossed INNER last
    CrossedInner,
}

/// Per-track tripwire progress, stored on the track itself.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CrossingState {
    pub phase: CrossingPhase,
    /// Centroid x at the previous evaluation.
    pub last_x: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Enter,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed passage through the gate.
#[derive(Debug, Clone)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub direction: Direction,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    /// Frame at which the passage completed, when snapshots are enabled.
    pub snapshot: Option<Arc<RgbImage>>,
}

impl CrossingEvent {
    pub fn with_snapshot(mut self, image: Arc<RgbImage>) -> Self {
        self.snapshot = Some(image);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Crossing {
    OuterInward,
    InnerInward,
    InnerOutward,
    OuterOutward,
}

/// Apply one boundary crossing to a phase.
fn transition(phase: CrossingPhase, crossing: Crossing) -> (CrossingPhase, Option<Direction>) {
    use CrossingPhase::*;

    match (crossing, phase) {
        (Crossing::OuterInward, _) => (CrossedOuter, None),
        (Crossing::InnerInward, CrossedOuter) => (CrossedInner, Some(Direction::Enter)),
        (Crossing::InnerInward, _) => (CrossedInner, None),
        (Crossing::InnerOutward, _) => (CrossedInner, None),
        (Crossing::OuterOutward, CrossedInner) => (CrossedOuter, Some(Direction::Exit)),
        // Abandoned approach, or simply leaving without having been inside.
        (Crossing::OuterOutward, _) => (AtOuterSide, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tripwire {
    outer_x: f32,
    inner_x: f32,
}

impl Tripwire {
    pub fn new(outer_x: f32, inner_x: f32) -> Result<Self, TripwireError> {
        for x in [outer_x, inner_x] {
            if !x.is_finite() {
                return Err(TripwireError::NotFinite(x));
            }
        }
        if outer_x >= inner_x {
            return Err(TripwireError::Misordered { outer_x, inner_x });
        }
        Ok(Self { outer_x, inner_x })
    }

    pub fn outer_x(&self) -> f32 {
        self.outer_x
    }

    pub fn inner_x(&self) -> f32 {
        self.inner_x
    }

    /// Boundary crossings on the step `prev -> cur`, in the order they were passed.
    fn crossings(&self, prev: f32, cur: f32) -> Vec<Crossing> {
        let mut out = Vec::with_capacity(2);
        if cur > prev {
            if prev < self.outer_x && self.outer_x <= cur {
                out.push(Crossing::OuterInward);
            }
            if prev < self.inner_x && self.inner_x <= cur {
                out.push(Crossing::InnerInward);
            }
        } else if cur < prev {
            if cur < self.inner_x && self.inner_x <= prev {
                out.push(Crossing::InnerOutward);
            }
            if cur < self.outer_x && self.outer_x <= prev {
                out.push(Crossing::OuterOutward);
            }
        }
        out
    }

    /// Feed one centroid x into a crossing state.
    ///
    /// Returns the direction of a passage completed on this step, if any.
    pub fn advance(&self, state: &mut CrossingState, x: f32) -> Option<Direction> {
        let Some(prev) = state.last_x.replace(x) else {
            if x < self.outer_x && state.phase == CrossingPhase::Unseen {
                state.phase = CrossingPhase::AtOuterSide;
            }
            return None;
        };

        let mut completed = None;
        for crossing in self.crossings(prev, x) {
            let (phase, direction) = transition(state.phase, crossing);
            debug!(from = ?state.phase, to = ?phase, ?crossing, "tripwire transition");
            state.phase = phase;
            if direction.is_some() {
                completed = direction;
            }
        }
        completed
    }

    /// Evaluate one track's latest centroid.
    pub fn observe(
        &self,
        track: &mut Track,
        frame_index: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<CrossingEvent> {
        let (x, _) = track.centroid();
        let direction = self.advance(&mut track.crossing, x)?;
        info!(track_id = track.track_id, %direction, frame_index, "crossing completed");
        Some(CrossingEvent {
            track_id: track.track_id,
            direction,
            frame_index,
            timestamp,
            snapshot: None,
        })
    }

    /// Evaluate every track matched on update `frame_index`.
    ///
    /// Tracks that were not observed on this update keep their state untouched
    /// so a short dropout never costs crossing progress.
    pub fn evaluate(
        &self,
        tracks: &mut [Track],
        frame_index: u64,
        timestamp: DateTime<Utc>,
    ) -> Vec<CrossingEvent> {
        tracks
            .iter_mut()
            .filter(|t| t.is_observed_at(frame_index))
            .filter_map(|t| self.observe(t, frame_index, timestamp))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Tripwire {
        Tripwire::new(200.0, 440.0).unwrap()
    }

    /// Runs a trajectory and returns (step index, direction) for each event.
    fn run(xs: &[f32]) -> (Vec<(usize, Direction)>, CrossingState) {
        let gate = gate();
        let mut state = CrossingState::default();
        let mut events = Vec::new();
        for (i, &x) in xs.iter().enumerate() {
            if let Some(d) = gate.advance(&mut state, x) {
                events.push((i, d));
            }
        }
        (events, state)
    }

    #[test]
    fn test_rejects_misordered_lines() {
        assert!(matches!(
            Tripwire::new(440.0, 200.0),
            Err(TripwireError::Misordered { .. })
        ));
        assert!(Tripwire::new(200.0, 200.0).is_err());
        assert!(Tripwire::new(f32::NAN, 200.0).is_err());
    }

    #[test]
    fn test_enter_fires_on_inner_crossing() {
        let (events, state) = run(&[150.0, 210.0, 300.0, 450.0, 500.0]);
        assert_eq!(events, vec![(3, Direction::Enter)]);
        assert_eq!(state.phase, CrossingPhase::CrossedInner);
    }

    #[test]
    fn test_exit_fires_on_outer_crossing() {
        // 210 is still inside the gate; OUTER is passed on 210 -> 150.
        let (events, state) = run(&[500.0, 450.0, 300.0, 210.0, 150.0]);
        assert_eq!(events, vec![(4, Direction::Exit)]);
        assert_eq!(state.phase, CrossingPhase::CrossedOuter);
    }

    #[test]
    fn test_reversal_before_inner_emits_nothing() {
        let (events, state) = run(&[150.0, 210.0, 300.0, 210.0, 150.0]);
        assert!(events.is_empty());
        assert_eq!(state.phase, CrossingPhase::AtOuterSide);
    }

    #[test]
    fn test_jitter_around_outer_then_enter() {
        let (events, _) = run(&[
            150.0, 198.0, 202.0, 198.0, 202.0, 198.0, 202.0, 300.0, 450.0, 500.0,
        ]);
        assert_eq!(events, vec![(8, Direction::Enter)]);
    }

    #[test]
    fn test_jitter_around_inner_after_enter_is_silent() {
        let (events, _) = run(&[150.0, 300.0, 450.0, 438.0, 442.0, 438.0, 442.0, 500.0]);
        assert_eq!(events, vec![(2, Direction::Enter)]);
    }

    #[test]
    fn test_jitter_around_outer_after_exit_is_silent() {
        let (events, _) = run(&[500.0, 300.0, 190.0, 205.0, 195.0, 205.0, 150.0]);
        assert_eq!(events, vec![(2, Direction::Exit)]);
    }

    #[test]
    fn test_lingering_inside_zone_emits_nothing() {
        let (events, state) = run(&[300.0, 310.0, 290.0, 305.0, 300.0]);
        assert!(events.is_empty());
        assert_eq!(state.phase, CrossingPhase::Unseen);
    }

    #[test]
    fn test_single_step_across_both_lines() {
        let (events, _) = run(&[100.0, 500.0]);
        assert_eq!(events, vec![(1, Direction::Enter)]);
        let (events, _) = run(&[500.0, 100.0]);
        assert_eq!(events, vec![(1, Direction::Exit)]);
    }

    #[test]
    fn test_round_trip_emits_enter_then_exit() {
        let (events, _) = run(&[150.0, 250.0, 460.0, 480.0, 300.0, 150.0]);
        assert_eq!(events, vec![(2, Direction::Enter), (5, Direction::Exit)]);
    }

    #[test]
    fn test_started_inside_zone_needs_full_traversal() {
        // First seen between the lines: crossing INNER alone is not an entry.
        let (events, _) = run(&[300.0, 450.0]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Enter).unwrap(), "\"enter\"");
        assert_eq!(Direction::Exit.to_string(), "exit");
    }
}
