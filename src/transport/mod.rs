//! Transport seam between the session controller and WebRTC.
//!
//! [`Transport`] hides the peer connection behind an establish/teardown pair
//! so the controller and protocol can be driven by fakes in tests. The real
//! implementation is [`PeerConnectionManager`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::protocol::events::ClientEvent;

pub mod peer;
pub use peer::PeerConnectionManager;

/// Data channel lifecycle and traffic, in arrival order.
#[derive(Debug)]
pub enum ChannelEvent {
    Open,
    Message(Bytes),
    Closed,
    Error(String),
}

/// Transport health after establishment.
#[derive(Debug, Clone)]
pub enum TransportStatus {
    Ready,
    Failed(String),
}

/// Write half of the data channel.
#[async_trait]
pub trait ChannelWriter: Send + Sync {
    fn is_open(&self) -> bool;

    /// Serialize and send one event. Fails with
    /// [`TransportError::ChannelClosed`] when the channel is not open.
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError>;
}

/// Everything an established transport hands to the session: the write half
/// and the two receive streams. The transport itself keeps ownership of the
/// underlying connection and releases it on teardown.
pub struct TransportLink {
    pub writer: Arc<dyn ChannelWriter>,
    pub channel_events: mpsc::Receiver<ChannelEvent>,
    pub status_events: mpsc::Receiver<TransportStatus>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Build the full media path and block until the connection is usable.
    /// On failure everything partially created has already been released.
    async fn establish(&mut self, ephemeral_key: &str) -> Result<TransportLink, TransportError>;

    /// Release the connection, the capture device and the sink. Safe to call
    /// at any time, including when nothing is established.
    async fn teardown(&mut self);
}
