//! Camera frame sources.
//!
//! [`RpicamSource`] drives an `rpicam-vid` compatible subprocess writing raw
//! I420 frames to stdout and converts each one to RGB. Its reads block, so
//! the binary wraps it in a [`ThreadedSource`] to keep the capture loop
//! responsive while the camera stalls.

use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The camera process could not be started.
    #[error("failed to start camera `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// One frame was unusable; the stream itself is fine.
    #[error("frame decode failed: {0}")]
    Decode(String),
    /// The camera stopped producing frames.
    #[error("camera stream closed")]
    Closed,
    /// No frame arrived within the poll interval; the stream may resume.
    #[error("no frame within {0:?}")]
    Stalled(Duration),
    #[error("camera read failed: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Decode(_))
    }
}

/// Anything that yields frames in acquisition order.
pub trait FrameSource {
    /// Block until the next frame. `Ok(None)` is a clean end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture program; receives the raw-YUV arguments below
    pub command: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: "rpicam-vid".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CameraConfig {
    /// Bytes in one I420 frame.
    pub fn frame_bytes(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--codec".into(),
            "yuv420".into(),
            "--width".into(),
            self.width.to_string(),
            "--height".into(),
            self.height.to_string(),
            "--framerate".into(),
            self.fps.to_string(),
            "--timeout".into(),
            "0".into(),
            "--nopreview".into(),
            "-o".into(),
            "-".into(),
        ]
    }
}

pub struct RpicamSource {
    config: CameraConfig,
    child: Child,
    stdout: ChildStdout,
    buffer: Vec<u8>,
    next_index: u64,
}

impl RpicamSource {
    pub fn spawn(config: CameraConfig) -> Result<Self, CaptureError> {
        let spawn_err = |source| CaptureError::Spawn {
            command: config.command.clone(),
            source,
        };

        let mut child = Command::new(&config.command)
            .args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_err(io::Error::other("no stdout pipe"))
        })?;

        info!(
            command = %config.command,
            width = config.width,
            height = config.height,
            fps = config.fps,
            "camera started"
        );
        Ok(Self {
            buffer: vec![0; config.frame_bytes()],
            config,
            child,
            stdout,
            next_index: 1,
        })
    }
}

impl FrameSource for RpicamSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if let Ok(Some(status)) = self.child.try_wait() {
                    warn!(%status, "camera process exited");
                }
                return Err(CaptureError::Closed);
            }
            Err(e) => return Err(e.into()),
        }

        let image = i420_to_rgb(&self.buffer, self.config.width, self.config.height)?;
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

impl Drop for RpicamSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "camera process already gone");
        }
        let _ = self.child.wait();
    }
}

/// Reads another source on a dedicated thread.
///
/// `next_frame` waits at most `poll` and returns [`CaptureError::Stalled`]
/// when nothing arrived, so callers regain control between frames even if the
/// inner source blocks indefinitely. The stream ends after the inner source
/// ends or fails with a non-transient error.
pub struct ThreadedSource {
    frames: Receiver<Result<Frame, CaptureError>>,
    poll: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ThreadedSource {
    pub fn spawn<S>(mut source: S, capacity: usize, poll: Duration) -> io::Result<Self>
    where
        S: FrameSource + Send + 'static,
    {
        let (tx, frames) = bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                loop {
                    let item = match source.next_frame() {
                        Ok(Some(frame)) => Ok(frame),
                        Ok(None) => break,
                        Err(e) => Err(e),
                    };
                    let fatal = item.as_ref().is_err_and(|e| !e.is_transient());
                    if tx.send(item).is_err() || fatal {
                        break;
                    }
                }
                debug!("camera reader stopped");
            })?;

        Ok(Self {
            frames,
            poll,
            handle: Some(handle),
        })
    }
}

impl FrameSource for ThreadedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.frames.recv_timeout(self.poll) {
            Ok(item) => item.map(Some),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Stalled(self.poll)),
            Err(RecvTimeoutError::Disconnected) => {
                // The reader has exited; reap it.
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!("camera reader panicked");
                        return Err(CaptureError::Closed);
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Convert one planar I420 frame (BT.601, limited range) to RGB.
pub fn i420_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let expected = w * h + 2 * cw * ch;
    if w == 0 || h == 0 || data.len() != expected {
        return Err(CaptureError::Decode(format!(
            "expected {expected} bytes for {width}x{height} I420, got {}",
            data.len()
        )));
    }

    let (y_plane, chroma) = data.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(cw * ch);

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let c = (row / 2) * cw + col / 2;
            let y = y_plane[row * w + col] as f32 - 16.0;
            let u = u_plane[c] as f32 - 128.0;
            let v = v_plane[c] as f32 - 128.0;

            let r = 1.164 * y + 1.596 * v;
            let g = 1.164 * y - 0.392 * u - 0.813 * v;
            let b = 1.164 * y + 2.017 * u;
            rgb.extend([clamp_u8(r), clamp_u8(g), clamp_u8(b)]);
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Decode("RGB buffer size mismatch".to_string()))
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
