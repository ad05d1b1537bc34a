//! Shared test fakes: an in-memory transport and channel writer.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use fitvoice_client::TransportError;
use fitvoice_client::protocol::events::ClientEvent;
use fitvoice_client::transport::{
    ChannelEvent, ChannelWriter, Transport, TransportLink, TransportStatus,
};
use tokio::sync::mpsc;

#[derive(Default)]
pub struct FakeWriter {
    closed: AtomicBool,
    sent: parking_lot::Mutex<Vec<serde_json::Value>>,
}

impl FakeWriter {
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelWriter for FakeWriter {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().push(serde_json::to_value(event)?);
        Ok(())
    }
}

/// Shared view into a [`FakeTransport`] owned by the controller.
#[derive(Clone)]
pub struct FakeTransportHandle {
    pub establishes: Arc<AtomicUsize>,
    pub teardowns: Arc<AtomicUsize>,
    pub writer: Arc<FakeWriter>,
    channel_tx: Arc<parking_lot::Mutex<Option<mpsc::Sender<ChannelEvent>>>>,
    status_tx: Arc<parking_lot::Mutex<Option<mpsc::Sender<TransportStatus>>>>,
}

impl FakeTransportHandle {
    pub fn establish_count(&self) -> usize {
        self.establishes.load(Ordering::SeqCst)
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub async fn send_channel_event(&self, event: ChannelEvent) {
        let tx = self
            .channel_tx
            .lock()
            .clone()
            .expect("transport not established");
        tx.send(event).await.expect("protocol loop gone");
    }

    pub async fn send_status(&self, status: TransportStatus) {
        let tx = self
            .status_tx
            .lock()
            .clone()
            .expect("transport not established");
        tx.send(status).await.expect("status watcher gone");
    }
}

pub struct FakeTransport {
    handle: FakeTransportHandle,
    /// establish() fails this many times before succeeding.
    fail_times: AtomicUsize,
    /// When set, establish() parks here until notified.
    gate: Option<Arc<tokio::sync::Notify>>,
}

/// Build a fake transport plus the handle tests drive it with.
pub fn fake_transport(fail_times: usize) -> (Box<dyn Transport>, FakeTransportHandle) {
    let (transport, handle, _gate) = build_transport(fail_times, false);
    (transport, handle)
}

/// Transport whose establish() blocks on the returned gate, for tests that
/// race stop() against an in-flight start().
pub fn gated_transport() -> (
    Box<dyn Transport>,
    FakeTransportHandle,
    Arc<tokio::sync::Notify>,
) {
    build_transport(0, true)
}

fn build_transport(
    fail_times: usize,
    gated: bool,
) -> (
    Box<dyn Transport>,
    FakeTransportHandle,
    Arc<tokio::sync::Notify>,
) {
    let handle = FakeTransportHandle {
        establishes: Arc::new(AtomicUsize::new(0)),
        teardowns: Arc::new(AtomicUsize::new(0)),
        writer: Arc::new(FakeWriter::default()),
        channel_tx: Arc::new(parking_lot::Mutex::new(None)),
        status_tx: Arc::new(parking_lot::Mutex::new(None)),
    };
    let gate = Arc::new(tokio::sync::Notify::new());
    let transport = FakeTransport {
        handle: handle.clone(),
        fail_times: AtomicUsize::new(fail_times),
        gate: gated.then(|| Arc::clone(&gate)),
    };
    (Box::new(transport), handle, gate)
}

#[async_trait]
impl Transport for FakeTransport {
    async fn establish(&mut self, _ephemeral_key: &str) -> Result<TransportLink, TransportError> {
        self.handle.establishes.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::IceFailed("simulated failure".to_string()));
        }

        let (channel_tx, channel_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = mpsc::channel(8);
        *self.handle.channel_tx.lock() = Some(channel_tx);
        *self.handle.status_tx.lock() = Some(status_tx);
        Ok(TransportLink {
            writer: Arc::clone(&self.handle.writer) as Arc<dyn ChannelWriter>,
            channel_events: channel_rx,
            status_events: status_rx,
        })
    }

    async fn teardown(&mut self) {
        self.handle.teardowns.fetch_add(1, Ordering::SeqCst);
        *self.handle.channel_tx.lock() = None;
        *self.handle.status_tx.lock() = None;
    }
}
