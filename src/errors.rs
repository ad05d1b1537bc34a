//! Error taxonomy for the client.
//!
//! Each layer owns its own error enum; everything converts into
//! [`SessionError`] at the controller boundary. Function-call failures are
//! deliberately absent here: they are reported back over the data channel as
//! structured results, never surfaced as `Err` (see `functions`).

use thiserror::Error;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Failures talking to the backend signaling endpoints.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Non-success HTTP status from a signaling endpoint.
    #[error("signaling request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body parsed, but required fields were absent or unusable.
    #[error("malformed signaling response: {0}")]
    MalformedResponse(String),

    #[error("signaling transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Local audio capture/playback failures.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("microphone access denied: {0}")]
    AccessDenied(String),

    #[error("no audio capture device available")]
    NoDevice,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio codec error: {0}")]
    Codec(String),
}

/// Failures establishing or operating the WebRTC transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("SDP exchange failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("SDP exchange timed out after {0:?}")]
    SdpTimeout(std::time::Duration),

    #[error("ICE connection timed out after {0:?}")]
    IceTimeout(std::time::Duration),

    #[error("ICE connection failed: {0}")]
    IceFailed(String),

    #[error("data channel is not open")]
    ChannelClosed,

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
}

/// A data channel payload that could not be parsed as JSON.
///
/// Protocol errors never tear the session down; the offending message is
/// logged and discarded.
#[derive(Debug, Error)]
#[error("malformed data channel payload: {reason}")]
pub struct ProtocolError {
    pub reason: String,
}

/// Top-level session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend granted no usable session (missing ephemeral key or
    /// session id). The controller stays Idle.
    #[error("session start failed: {0}")]
    Start(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `stop()` arrived while establishment was still in flight.
    #[error("session start cancelled")]
    Cancelled,
}
