//! WebRTC peer connection management.
//!
//! Establishment order matters: the microphone is acquired first, the data
//! channel is created before the offer so it is negotiated in the initial
//! SDP, then the offer/answer exchange runs through the backend and the
//! connection is only reported usable once ICE reaches a connected state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{ChannelEvent, ChannelWriter, Transport, TransportLink, TransportStatus};
use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::media::{AudioCapture, AudioFrame, AudioSink, CaptureHandle, CaptureStream};
use crate::protocol::events::ClientEvent;
use crate::signaling::SignalingClient;

const DATA_CHANNEL_LABEL: &str = "oai-events";
const CHANNEL_EVENT_CAPACITY: usize = 256;
const STATUS_CAPACITY: usize = 8;

/// Owns one live connection end to end.
struct TransportHandle {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    capture_handle: CaptureHandle,
    mic_pump: Option<JoinHandle<()>>,
    sink: Arc<dyn AudioSink>,
}

impl TransportHandle {
    async fn release(&mut self) {
        if let Some(pump) = self.mic_pump.take() {
            pump.abort();
        }
        self.capture_handle.stop();
        if let Err(e) = self.data_channel.close().await {
            debug!(error = %e, "data channel close failed");
        }
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
        self.sink.close().await;
    }
}

/// Closes the peer connection unless establishment completed.
///
/// A cancelled `establish()` drops the in-flight future without reaching its
/// error paths, and dropping the `Arc` alone does not release the ICE agent
/// or its sockets. The guard spawns the close so it also fires from a drop.
struct CloseOnDrop {
    pc: Option<Arc<RTCPeerConnection>>,
}

impl CloseOnDrop {
    fn arm(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc: Some(pc) }
    }

    fn disarm(&mut self) {
        self.pc = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(pc) = self.pc.take() {
            tokio::spawn(async move {
                if let Err(e) = pc.close().await {
                    debug!(error = %e, "peer connection close failed");
                }
            });
        }
    }
}

pub struct PeerConnectionManager {
    signaling: SignalingClient,
    config: ClientConfig,
    capture: Arc<dyn AudioCapture>,
    sink: Arc<dyn AudioSink>,
    handle: Option<TransportHandle>,
}

impl PeerConnectionManager {
    pub fn new(
        signaling: SignalingClient,
        config: ClientConfig,
        capture: Arc<dyn AudioCapture>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            signaling,
            config,
            capture,
            sink,
            handle: None,
        }
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        Ok(Arc::new(api.new_peer_connection(rtc_config).await?))
    }

    async fn connect(
        &self,
        ephemeral_key: &str,
    ) -> Result<(TransportHandle, TransportLink), TransportError> {
        let pc = self.new_peer_connection().await?;
        // Any early return or drop below must not leak the connection.
        let mut close_guard = CloseOnDrop::arm(Arc::clone(&pc));

        // Microphone first: without it there is nothing to negotiate.
        let CaptureStream {
            frames: capture_frames,
            handle: mut capture_handle,
        } = self.capture.open().await?;

        let mut mic_pump: Option<JoinHandle<()>> = None;
        let setup = async {
            // Data channel before the offer, so it rides the initial SDP.
            let data_channel = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
            let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_EVENT_CAPACITY);
            wire_data_channel(&data_channel, event_tx);

            let (status_tx, status_rx) = mpsc::channel::<TransportStatus>(STATUS_CAPACITY);
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>(4);
            watch_ice(&pc, ready_tx, status_tx);

            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48_000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                "fitvoice-mic".to_owned(),
            ));
            pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            mic_pump = Some(spawn_mic_pump(track, capture_frames));

            attach_remote_audio(&pc, Arc::clone(&self.sink));

            let offer = pc.create_offer(None).await?;
            let mut gather_complete = pc.gathering_complete_promise().await;
            pc.set_local_description(offer).await?;
            if tokio::time::timeout(self.config.sdp_timeout, gather_complete.recv())
                .await
                .is_err()
            {
                return Err(TransportError::SdpTimeout(self.config.sdp_timeout));
            }
            let local = pc
                .local_description()
                .await
                .ok_or_else(|| TransportError::IceFailed("missing local description".to_string()))?;

            let answer_sdp = tokio::time::timeout(
                self.config.sdp_timeout,
                self.signaling.exchange_sdp(ephemeral_key, &local.sdp),
            )
            .await
            .map_err(|_| TransportError::SdpTimeout(self.config.sdp_timeout))??;
            pc.set_remote_description(RTCSessionDescription::answer(answer_sdp)?)
                .await?;

            Ok::<_, TransportError>((data_channel, event_rx, status_rx, ready_rx))
        }
        .await;

        let (data_channel, event_rx, status_rx, mut ready_rx) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                if let Some(pump) = mic_pump.take() {
                    pump.abort();
                }
                capture_handle.stop();
                // close_guard releases the connection and its data channel
                return Err(e);
            }
        };

        // Usable only once ICE connects.
        let ready = match tokio::time::timeout(self.config.ice_timeout, ready_rx.recv()).await {
            Ok(Some(Ok(()))) => Ok(()),
            Ok(Some(Err(reason))) => Err(TransportError::IceFailed(reason)),
            Ok(None) => Err(TransportError::IceFailed("ICE watcher closed".to_string())),
            Err(_) => Err(TransportError::IceTimeout(self.config.ice_timeout)),
        };
        if let Err(e) = ready {
            if let Some(pump) = mic_pump.take() {
                pump.abort();
            }
            capture_handle.stop();
            return Err(e);
        }
        close_guard.disarm();
        info!("webrtc transport established");

        let writer = Arc::new(RtcChannelWriter {
            data_channel: Arc::clone(&data_channel),
        });
        let handle = TransportHandle {
            pc,
            data_channel,
            capture_handle,
            mic_pump,
            sink: Arc::clone(&self.sink),
        };
        let link = TransportLink {
            writer,
            channel_events: event_rx,
            status_events: status_rx,
        };
        Ok((handle, link))
    }
}

#[async_trait]
impl Transport for PeerConnectionManager {
    async fn establish(&mut self, ephemeral_key: &str) -> Result<TransportLink, TransportError> {
        // Stale connection from a previous failed session, if any.
        self.teardown().await;
        let (handle, link) = self.connect(ephemeral_key).await?;
        self.handle = Some(handle);
        Ok(link)
    }

    async fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release().await;
            debug!("webrtc transport released");
        }
    }
}

fn wire_data_channel(data_channel: &Arc<RTCDataChannel>, event_tx: mpsc::Sender<ChannelEvent>) {
    let tx = event_tx.clone();
    data_channel.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Open).await;
        })
    }));

    let tx = event_tx.clone();
    data_channel.on_message(Box::new(move |message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Message(message.data)).await;
        })
    }));

    let tx = event_tx.clone();
    data_channel.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Closed).await;
        })
    }));

    data_channel.on_error(Box::new(move |error| {
        let tx = event_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Error(error.to_string())).await;
        })
    }));
}

fn watch_ice(
    pc: &Arc<RTCPeerConnection>,
    ready_tx: mpsc::Sender<Result<(), String>>,
    status_tx: mpsc::Sender<TransportStatus>,
) {
    pc.on_ice_connection_state_change(Box::new(move |state| {
        let ready = ready_tx.clone();
        let status = status_tx.clone();
        Box::pin(async move {
            debug!(%state, "ICE connection state changed");
            match state {
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                    let _ = ready.send(Ok(())).await;
                    let _ = status.send(TransportStatus::Ready).await;
                }
                RTCIceConnectionState::Failed | RTCIceConnectionState::Disconnected => {
                    let reason = format!("ICE connection {state}");
                    let _ = ready.send(Err(reason.clone())).await;
                    let _ = status.send(TransportStatus::Failed(reason)).await;
                }
                _ => {}
            }
        })
    }));
}

fn spawn_mic_pump(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<AudioFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let sample = Sample {
                data: frame.data,
                duration: frame.duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(error = %e, "stopping microphone pump");
                break;
            }
        }
    })
}

/// Attach the first remote audio track to the sink; later tracks are ignored.
fn attach_remote_audio(pc: &Arc<RTCPeerConnection>, sink: Arc<dyn AudioSink>) {
    let attached = Arc::new(AtomicBool::new(false));
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = Arc::clone(&sink);
            let attached = Arc::clone(&attached);
            Box::pin(async move {
                if attached.swap(true, Ordering::SeqCst) {
                    debug!("remote track already attached, ignoring");
                    return;
                }
                info!("remote audio track attached");
                tokio::spawn(async move {
                    loop {
                        match track.read_rtp().await {
                            Ok((packet, _)) => {
                                sink.play(AudioFrame::new(packet.payload)).await;
                            }
                            Err(e) => {
                                debug!(error = %e, "remote track ended");
                                break;
                            }
                        }
                    }
                });
            })
        },
    ));
}

struct RtcChannelWriter {
    data_channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl ChannelWriter for RtcChannelWriter {
    fn is_open(&self) -> bool {
        self.data_channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let payload = serde_json::to_string(event)?;
        self.data_channel.send_text(payload).await?;
        Ok(())
    }
}
