use chrono::Utc;
use tripwire_edge::{CentroidTracker, CrossingPhase, Detection, Direction, TrackerConfig, Tripwire};

fn person_at(cx: f32, cy: f32) -> Detection {
    Detection::new(cx - 20.0, cy - 50.0, cx + 20.0, cy + 50.0, 0.9)
}

/// Tracker plus tripwire; returns (frame_index, track_id, direction) per event.
struct Scene {
    tracker: CentroidTracker,
    tripwire: Tripwire,
    frame_index: u64,
    events: Vec<(u64, u64, Direction)>,
}

impl Scene {
    fn new() -> Self {
        Self {
            tracker: CentroidTracker::new(TrackerConfig::default()),
            tripwire: Tripwire::new(200.0, 440.0).unwrap(),
            frame_index: 0,
            events: Vec::new(),
        }
    }

    fn step(&mut self, detections: &[Detection]) {
        self.frame_index += 1;
        let tracks = self.tracker.update(detections, self.frame_index);
        for event in self.tripwire.evaluate(tracks, self.frame_index, Utc::now()) {
            self.events
                .push((event.frame_index, event.track_id, event.direction));
        }
    }
}

#[test]
fn test_basic_tracking() {
    let mut tracker = CentroidTracker::new(TrackerConfig::default());

    let tracks = tracker.update(&[person_at(100.0, 150.0)], 1);
    assert_eq!(tracks.len(), 1);
    let id = tracks[0].track_id;

    let tracks = tracker.update(&[person_at(110.0, 152.0)], 2);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_id, id);
    assert_eq!(tracks[0].centroid(), (110.0, 152.0));

    // Occluded: the track survives as lost
    let tracks = tracker.update(&[], 3);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].missed, 1);

    let tracks = tracker.update(&[person_at(125.0, 150.0)], 4);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_id, id);
    assert_eq!(tracks[0].missed, 0);
}

#[test]
fn test_short_dropout_keeps_identity_and_progress() {
    let mut scene = Scene::new();
    scene.step(&[person_at(150.0, 200.0)]);
    scene.step(&[person_at(210.0, 200.0)]);
    let id = scene.tracker.tracks()[0].track_id;
    assert_eq!(
        scene.tracker.tracks()[0].crossing.phase,
        CrossingPhase::CrossedOuter
    );

    for _ in 0..3 {
        scene.step(&[]);
    }
    assert_eq!(scene.tracker.tracks().len(), 1);
    assert_eq!(
        scene.tracker.tracks()[0].crossing.phase,
        CrossingPhase::CrossedOuter
    );

    for x in [260.0, 330.0, 400.0, 450.0] {
        scene.step(&[person_at(x, 200.0)]);
    }
    assert_eq!(scene.tracker.tracks()[0].track_id, id);
    assert_eq!(scene.events, vec![(9, id, Direction::Enter)]);

    // Gap frames were filled in: 2 measured + 3 interpolated + 4 measured.
    assert_eq!(scene.tracker.tracks()[0].history().len(), 9);
}

#[test]
fn test_long_dropout_retires_track() {
    let mut tracker = CentroidTracker::new(TrackerConfig {
        max_missed_frames: 10,
        ..TrackerConfig::default()
    });
    tracker.update(&[person_at(300.0, 200.0)], 1);
    let first_id = tracker.tracks()[0].track_id;

    // Ten misses are tolerated.
    for frame in 2..=11 {
        tracker.update(&[], frame);
    }
    assert_eq!(tracker.tracks().len(), 1);

    // The eleventh is not.
    tracker.update(&[], 12);
    assert!(tracker.is_empty());

    let tracks = tracker.update(&[person_at(300.0, 200.0)], 13);
    assert_eq!(tracks.len(), 1);
    assert_ne!(tracks[0].track_id, first_id);
    assert!(tracks[0].track_id > first_id);
}

#[test]
fn test_people_crossing_in_opposite_directions() {
    let mut scene = Scene::new();
    let walk_in = [150.0, 210.0, 300.0, 450.0, 500.0];
    let walk_out = [500.0, 450.0, 300.0, 210.0, 150.0];
    for (a, b) in walk_in.iter().zip(walk_out) {
        scene.step(&[person_at(*a, 150.0), person_at(b, 400.0)]);
    }

    assert_eq!(
        scene.events,
        vec![(4, 1, Direction::Enter), (5, 2, Direction::Exit)]
    );
}

#[test]
fn test_oscillation_at_outer_line_then_enter() {
    let mut scene = Scene::new();
    for x in [198.0, 202.0, 198.0, 202.0, 198.0, 260.0, 330.0, 400.0, 445.0] {
        scene.step(&[person_at(x, 200.0)]);
    }
    assert_eq!(scene.events.len(), 1);
    assert_eq!(scene.events[0].2, Direction::Enter);
}

#[test]
fn test_reversal_before_inner_line_is_silent() {
    let mut scene = Scene::new();
    for x in [150.0, 210.0, 300.0, 250.0, 190.0, 120.0] {
        scene.step(&[person_at(x, 200.0)]);
    }
    assert!(scene.events.is_empty());
    assert_eq!(
        scene.tracker.tracks()[0].crossing.phase,
        CrossingPhase::AtOuterSide
    );
}
