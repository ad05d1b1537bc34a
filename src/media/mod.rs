//! Audio capture and playback seam.
//!
//! The transport only ever sees [`AudioCapture`] and [`AudioSink`], so the
//! session logic is testable without touching real devices. Real microphone
//! and speaker implementations live in [`device`] behind the `audio-device`
//! feature; the in-memory implementations here back the tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::MediaError;

#[cfg(feature = "audio-device")]
pub mod device;
#[cfg(feature = "audio-device")]
pub use device::{DeviceCapture, DevicePlayback};

pub const SAMPLE_RATE: u32 = 48_000;
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Samples per 20 ms mono frame at 48 kHz.
pub const FRAME_SAMPLES: usize = 960;

/// One encoded Opus frame.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            duration: FRAME_DURATION,
        }
    }
}

/// An opened capture: a stream of encoded frames plus the handle that stops
/// the underlying device when dropped.
pub struct CaptureStream {
    pub frames: mpsc::Receiver<AudioFrame>,
    pub handle: CaptureHandle,
}

/// Owns the running capture. Dropping it (or calling [`CaptureHandle::stop`])
/// releases the device.
pub struct CaptureHandle {
    stop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CaptureHandle {
    pub fn noop() -> Self {
        Self { stop: None }
    }

    pub fn on_stop(stop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("armed", &self.stop.is_some())
            .finish()
    }
}

#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the capture device and start producing frames.
    async fn open(&self) -> Result<CaptureStream, MediaError>;
}

#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one decoded-or-encoded frame. Sinks must tolerate frames after
    /// `close`; they are silently discarded.
    async fn play(&self, frame: AudioFrame);

    async fn close(&self);
}

/// Capture fed from a channel, for tests and offline replay.
pub struct QueueCapture {
    frames: parking_lot::Mutex<Option<mpsc::Receiver<AudioFrame>>>,
}

impl QueueCapture {
    /// Returns the feeding side and the capture.
    pub fn channel(capacity: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                frames: parking_lot::Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl AudioCapture for QueueCapture {
    async fn open(&self) -> Result<CaptureStream, MediaError> {
        let frames = self
            .frames
            .lock()
            .take()
            .ok_or_else(|| MediaError::Device("capture already opened".to_string()))?;
        Ok(CaptureStream {
            frames,
            handle: CaptureHandle::noop(),
        })
    }
}

/// Discards everything.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _frame: AudioFrame) {}

    async fn close(&self) {}
}

/// Collects played frames for assertions.
#[derive(Default)]
pub struct MemorySink {
    frames: parking_lot::Mutex<Vec<AudioFrame>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for MemorySink {
    async fn play(&self, frame: AudioFrame) {
        if !self.is_closed() {
            self.frames.lock().push(frame);
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
