//! Runtime configuration.
//!
//! Loaded once from TOML at startup, validated, then passed around by
//! reference. Every section and key is optional; missing values take the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::camera::CameraConfig;
use crate::detection::{MotionConfig, YoloDecoder};
use crate::dispatch::{DispatcherConfig, HttpSink, HttpSinkConfig};
use crate::registration::RegistrationConfig;
use crate::tracker::{PERSON_CLASS, TrackerConfig};
use crate::tripwire::{Tripwire, TripwireError};

/// Overrides `server.url` when set.
pub const SERVER_URL_ENV: &str = "TRIPWIRE_SERVER_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

impl From<TripwireError> for ConfigError {
    fn from(e: TripwireError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identifies this device to the server
    pub device_id: String,
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub motion: MotionSection,
    pub tripwire: TripwireConfig,
    pub tracker: TrackerSection,
    pub registration: RegistrationSection,
    pub dispatch: DispatchSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    /// Used instead of `url` when running with `--debug`
    pub local_url: Option<String>,
    pub timeout_secs: u64,
    /// 0 disables heartbeats
    pub heartbeat_interval_secs: u64,
    /// Ask the server for the tripwire lines at startup
    pub fetch_tripwire: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_name: String,
    pub output_name: String,
    pub input_size: u32,
    pub min_confidence: f32,
    pub iou_threshold: f32,
    pub classes: Vec<usize>,
    /// Process every Nth frame
    pub frame_skip: u32,
    /// Upper bound for the adaptive stride
    pub max_frame_skip: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionSection {
    pub enabled: bool,
    pub sample_size: usize,
    pub threshold: f32,
    pub min_motion_frames: u32,
    pub hold_frames: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TripwireConfig {
    pub outer_x: f32,
    pub inner_x: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// Association threshold as a fraction of frame width
    pub association_distance_ratio: f32,
    pub max_missed_frames: u32,
    pub history_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrationSection {
    pub frames: usize,
    pub capture_interval_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub queue_capacity: usize,
    /// Attach the crossing frame to crossing events
    pub attach_snapshot: bool,
    pub event_jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_id: "edge-01".to_string(),
            server: ServerConfig::default(),
            camera: CameraConfig::default(),
            detector: DetectorConfig::default(),
            motion: MotionSection::default(),
            tripwire: TripwireConfig::default(),
            tracker: TrackerSection::default(),
            registration: RegistrationSection::default(),
            dispatch: DispatchSection::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            local_url: None,
            timeout_secs: 10,
            heartbeat_interval_secs: 30,
            fetch_tripwire: false,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let decoder = YoloDecoder::default();
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
            input_size: decoder.input_size,
            min_confidence: decoder.min_confidence,
            iou_threshold: decoder.iou_threshold,
            classes: vec![PERSON_CLASS],
            frame_skip: 1,
            max_frame_skip: 4,
        }
    }
}

impl Default for MotionSection {
    fn default() -> Self {
        let motion = MotionConfig::default();
        Self {
            enabled: false,
            sample_size: motion.sample_size,
            threshold: motion.threshold,
            min_motion_frames: motion.min_motion_frames,
            hold_frames: motion.hold_frames,
            seed: motion.seed,
        }
    }
}

impl Default for TripwireConfig {
    fn default() -> Self {
        Self {
            outer_x: 200.0,
            inner_x: 440.0,
        }
    }
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            association_distance_ratio: 0.25,
            max_missed_frames: 10,
            history_len: 30,
        }
    }
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            frames: 10,
            capture_interval_ms: 0,
            retries: 2,
            retry_backoff_ms: 300,
            jpeg_quality: 95,
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            attach_snapshot: false,
            event_jpeg_quality: 85,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server.url = url;
            }
        }
    }

    /// Replace the tripwire lines with the server's copy for this device.
    ///
    /// On any failure the file values stay and `false` is returned. Call
    /// before [`validate`](Self::validate).
    pub fn refresh_tripwire(&mut self, sink: &HttpSink) -> bool {
        match sink.fetch_settings() {
            Ok(settings) => {
                let remote = settings.tripwire;
                info!(outer_x = remote.outer_x, inner_x = remote.inner_x, "tripwire from server");
                self.tripwire.outer_x = remote.outer_x;
                self.tripwire.inner_x = remote.inner_x;
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    outer_x = self.tripwire.outer_x,
                    inner_x = self.tripwire.inner_x,
                    "tripwire fetch failed, using local lines"
                );
                false
            }
        }
    }

    /// Server base address; `debug` prefers `server.local_url`.
    pub fn server_url(&self, debug: bool) -> &str {
        match (&self.server.local_url, debug) {
            (Some(local), true) => local,
            _ => &self.server.url,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 || camera.fps == 0 {
            return Err(ConfigError::invalid("camera width, height and fps must be non-zero"));
        }

        let tripwire = self.tripwire()?;
        if tripwire.inner_x() > camera.width as f32 {
            return Err(ConfigError::invalid(format!(
                "tripwire.inner_x ({}) is beyond the frame width ({})",
                tripwire.inner_x(),
                camera.width
            )));
        }
        if tripwire.outer_x() < 0.0 {
            return Err(ConfigError::invalid("tripwire.outer_x must not be negative"));
        }

        let det = &self.detector;
        for (name, value) in [
            ("detector.min_confidence", det.min_confidence),
            ("detector.iou_threshold", det.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if det.input_size == 0 {
            return Err(ConfigError::invalid("detector.input_size must be non-zero"));
        }
        if det.classes.is_empty() {
            return Err(ConfigError::invalid("detector.classes must not be empty"));
        }
        if det.frame_skip == 0 || det.max_frame_skip < det.frame_skip {
            return Err(ConfigError::invalid(
                "detector.frame_skip must be >= 1 and <= detector.max_frame_skip",
            ));
        }

        let ratio = self.tracker.association_distance_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::invalid(format!(
                "tracker.association_distance_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if self.tracker.history_len < 2 {
            return Err(ConfigError::invalid("tracker.history_len must be at least 2"));
        }
        if self.motion.enabled && self.motion.sample_size == 0 {
            return Err(ConfigError::invalid("motion.sample_size must be non-zero"));
        }
        if self.registration.frames == 0 {
            return Err(ConfigError::invalid("registration.frames must be non-zero"));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::invalid("dispatch.queue_capacity must be non-zero"));
        }
        for (name, q) in [
            ("registration.jpeg_quality", self.registration.jpeg_quality),
            ("dispatch.event_jpeg_quality", self.dispatch.event_jpeg_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(ConfigError::invalid(format!("{name} must be in 1..=100, got {q}")));
            }
        }
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::invalid("device_id must not be empty"));
        }
        Ok(())
    }

    pub fn tripwire(&self) -> Result<Tripwire, TripwireError> {
        Tripwire::new(self.tripwire.outer_x, self.tripwire.inner_x)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            max_distance: self.tracker.association_distance_ratio * self.camera.width as f32,
            max_missed_frames: self.tracker.max_missed_frames,
            history_len: self.tracker.history_len,
        }
    }

    pub fn decoder(&self) -> YoloDecoder {
        YoloDecoder {
            input_size: self.detector.input_size,
            min_confidence: self.detector.min_confidence,
            iou_threshold: self.detector.iou_threshold,
            classes: self.detector.classes.clone(),
        }
    }

    /// Motion gate settings, or `None` when the gate is disabled.
    pub fn motion_config(&self) -> Option<MotionConfig> {
        let m = &self.motion;
        m.enabled.then(|| MotionConfig {
            sample_size: m.sample_size,
            threshold: m.threshold,
            min_motion_frames: m.min_motion_frames,
            hold_frames: m.hold_frames,
            seed: m.seed,
        })
    }

    pub fn registration_config(&self) -> RegistrationConfig {
        RegistrationConfig {
            frames: self.registration.frames,
            capture_interval: Duration::from_millis(self.registration.capture_interval_ms),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.dispatch.queue_capacity,
            registration_retries: self.registration.retries,
            retry_backoff: Duration::from_millis(self.registration.retry_backoff_ms),
        }
    }

    pub fn http_sink_config(&self, base_url: &str) -> HttpSinkConfig {
        HttpSinkConfig {
            base_url: base_url.to_string(),
            device_id: self.device_id.clone(),
            timeout: Duration::from_secs(self.server.timeout_secs.max(1)),
            event_jpeg_quality: self.dispatch.event_jpeg_quality,
            registration_jpeg_quality: self.registration.jpeg_quality,
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.server.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
