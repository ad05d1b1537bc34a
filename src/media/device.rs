//! Real microphone capture and speaker playback on cpal + libopus.
//!
//! cpal streams are not `Send`, so each stream lives on its own dedicated
//! thread and communicates with the async side through channels and atomics.
//! Capture encodes 20 ms mono frames at 48 kHz; playback decodes into a
//! sample queue drained by the output stream callback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AudioCapture, AudioFrame, AudioSink, CaptureHandle, CaptureStream, FRAME_SAMPLES, SAMPLE_RATE};
use crate::errors::MediaError;

const CAPTURE_CHANNEL_CAPACITY: usize = 64;
/// Max encoded Opus frame we ever produce.
const MAX_OPUS_FRAME_BYTES: usize = 4000;
/// Playback queue cap: one second of audio, older samples are dropped.
const MAX_QUEUED_SAMPLES: usize = SAMPLE_RATE as usize;

/// Default-host microphone capture.
pub struct DeviceCapture;

impl DeviceCapture {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeviceCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioCapture for DeviceCapture {
    async fn open(&self) -> Result<CaptureStream, MediaError> {
        let (frame_tx, frame_rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), MediaError>>();

        std::thread::Builder::new()
            .name("fitvoice-capture".to_string())
            .spawn(move || capture_thread(frame_tx, stop_flag, init_tx))
            .map_err(|e| MediaError::Device(e.to_string()))?;

        // Device and stream setup happen on the capture thread; wait for its
        // verdict before reporting the capture as open.
        tokio::task::spawn_blocking(move || init_rx.recv())
            .await
            .map_err(|e| MediaError::Device(e.to_string()))?
            .map_err(|_| MediaError::Device("capture thread exited during setup".to_string()))??;

        let handle = CaptureHandle::on_stop(move || stop.store(true, Ordering::SeqCst));
        Ok(CaptureStream {
            frames: frame_rx,
            handle,
        })
    }
}

fn capture_thread(
    frames: mpsc::Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
    init: std::sync::mpsc::Sender<Result<(), MediaError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = init.send(Err(MediaError::NoDevice));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = init.send(Err(MediaError::AccessDenied(e.to_string())));
            return;
        }
    };
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut encoder = match opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip) {
        Ok(encoder) => encoder,
        Err(e) => {
            let _ = init.send(Err(MediaError::Codec(e.to_string())));
            return;
        }
    };

    let mut pcm: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
    let mut push = move |samples: &[i16]| {
        pcm.extend_from_slice(samples);
        while pcm.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = pcm.drain(..FRAME_SAMPLES).collect();
            match encoder.encode_vec(&frame, MAX_OPUS_FRAME_BYTES) {
                Ok(encoded) => {
                    if frames.blocking_send(AudioFrame::new(encoded)).is_err() {
                        // receiver gone, the stop flag will end the thread
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "opus encode failed, dropping frame"),
            }
        }
    };

    let err_fn = |e: cpal::StreamError| warn!(error = %e, "input stream error");
    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| push(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data
                    .iter()
                    .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                push(&converted);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = init.send(Err(MediaError::Device(format!(
                "unsupported input sample format {other:?}"
            ))));
            return;
        }
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init.send(Err(MediaError::AccessDenied(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = init.send(Err(MediaError::Device(e.to_string())));
        return;
    }
    let _ = init.send(Ok(()));
    debug!("microphone capture running");

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("microphone capture stopped");
}

/// Default-host speaker playback for the remote audio track.
pub struct DevicePlayback {
    decoder: parking_lot::Mutex<opus::Decoder>,
    queue: Arc<parking_lot::Mutex<VecDeque<i16>>>,
    stop: Arc<AtomicBool>,
}

impl DevicePlayback {
    pub fn new() -> Result<Self, MediaError> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)
            .map_err(|e| MediaError::Codec(e.to_string()))?;
        let queue = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_queue = Arc::clone(&queue);
        let thread_stop = Arc::clone(&stop);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), MediaError>>();
        std::thread::Builder::new()
            .name("fitvoice-playback".to_string())
            .spawn(move || playback_thread(thread_queue, thread_stop, init_tx))
            .map_err(|e| MediaError::Device(e.to_string()))?;
        init_rx
            .recv()
            .map_err(|_| MediaError::Device("playback thread exited during setup".to_string()))??;

        Ok(Self {
            decoder: parking_lot::Mutex::new(decoder),
            queue,
            stop,
        })
    }
}

#[async_trait]
impl AudioSink for DevicePlayback {
    async fn play(&self, frame: AudioFrame) {
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        // room for up to 120 ms per packet
        let mut samples = vec![0i16; FRAME_SAMPLES * 6];
        let decoded = {
            let mut decoder = self.decoder.lock();
            decoder.decode(&frame.data, &mut samples, false)
        };
        match decoded {
            Ok(count) => {
                let mut queue = self.queue.lock();
                queue.extend(&samples[..count]);
                let excess = queue.len().saturating_sub(MAX_QUEUED_SAMPLES);
                if excess > 0 {
                    queue.drain(..excess);
                }
            }
            Err(e) => debug!(error = %e, "opus decode failed, dropping frame"),
        }
    }

    async fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
    }
}

fn playback_thread(
    queue: Arc<parking_lot::Mutex<VecDeque<i16>>>,
    stop: Arc<AtomicBool>,
    init: std::sync::mpsc::Sender<Result<(), MediaError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = init.send(Err(MediaError::NoDevice));
        return;
    };
    let supported = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = init.send(Err(MediaError::Device(e.to_string())));
            return;
        }
    };
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let fill_queue = Arc::clone(&queue);
    let err_fn = |e: cpal::StreamError| warn!(error = %e, "output stream error");
    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut queue = fill_queue.lock();
                for slot in data.iter_mut() {
                    *slot = queue.pop_front().unwrap_or(0);
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = fill_queue.lock();
                for slot in data.iter_mut() {
                    *slot = queue.pop_front().map(|s| s as f32 / i16::MAX as f32).unwrap_or(0.0);
                }
            },
            err_fn,
            None,
        ),
        other => {
            let _ = init.send(Err(MediaError::Device(format!(
                "unsupported output sample format {other:?}"
            ))));
            return;
        }
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init.send(Err(MediaError::Device(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = init.send(Err(MediaError::Device(e.to_string())));
        return;
    }
    let _ = init.send(Ok(()));
    debug!("speaker playback running");

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("speaker playback stopped");
}
