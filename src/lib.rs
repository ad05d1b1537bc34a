//! Realtime voice-assistant session client.
//!
//! Negotiates a WebRTC audio transport with a remote realtime AI service
//! through a backend signaling facade, speaks the JSON event protocol over
//! the negotiated data channel, and dispatches the assistant's function
//! calls to backend capability endpoints.
//!
//! Entry point is [`SessionController`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use fitvoice_client::{ClientConfig, SessionController};
//! use fitvoice_client::media::{NullSink, QueueCapture};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("http://localhost:8000/api".parse()?);
//! let (_mic, capture) = QueueCapture::channel(64);
//! let controller = SessionController::new(config, Arc::new(capture), Arc::new(NullSink))?;
//! controller.start("athlete@example.com").await?;
//! // ... session runs ...
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! Real microphone and speaker support lives behind the `audio-device`
//! feature.

pub mod config;
pub mod errors;
pub mod functions;
pub mod media;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::ClientConfig;
pub use errors::{
    ConfigError, MediaError, ProtocolError, SessionError, SignalingError, TransportError,
};
pub use functions::{FunctionCall, FunctionDispatcher, FunctionResult};
pub use protocol::{DataChannelProtocol, FixedDelayGreeting, GreetingStrategy};
pub use session::{
    Session, SessionController, SessionState, TranscriptEntry, TranscriptLog, TranscriptRole,
};
pub use signaling::{SessionGrant, SessionSettings, SignalingClient};
pub use transport::{PeerConnectionManager, Transport, TransportLink};
