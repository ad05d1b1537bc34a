//! Data channel protocol loop.
//!
//! A single task consumes [`ChannelEvent`]s in arrival order: on open it
//! pushes the session configuration and schedules the greeting, on each
//! message it parses and dispatches by `type` tag. Function calls are
//! awaited inline so their results go back in the order the calls arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::errors::ProtocolError;
use crate::functions::{FunctionCall, FunctionDispatcher, FunctionResult};
use crate::session::transcript::{TranscriptLog, TranscriptRole};
use crate::signaling::SessionSettings;
use crate::transport::{ChannelEvent, ChannelWriter};

pub mod events;
use events::{ClientEvent, ConversationItem, InboundEvent, ServerEvent, SessionUpdate};

/// Decides when the remote session is ready to be greeted.
///
/// The greeting `response.create` must not race the `session.update` that
/// precedes it, but the wire protocol gives no acknowledgment to key off.
/// The default strategy waits a fixed delay; this seam exists so an
/// ack-based signal can replace the timer without touching the protocol.
#[async_trait]
pub trait GreetingStrategy: Send + Sync {
    /// Resolves when the greeting should be sent.
    async fn ready(&self);
}

/// Fixed-delay greeting. The delay is a timing assumption, not a guarantee.
pub struct FixedDelayGreeting {
    delay: Duration,
}

impl FixedDelayGreeting {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl GreetingStrategy for FixedDelayGreeting {
    async fn ready(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

pub struct DataChannelProtocol {
    writer: Arc<dyn ChannelWriter>,
    settings: Option<SessionSettings>,
    transcript: Arc<TranscriptLog>,
    dispatcher: Arc<FunctionDispatcher>,
    greeting: Arc<dyn GreetingStrategy>,
    /// call_id -> function name, learned from `response.output_item.added`.
    pending_calls: HashMap<String, String>,
}

impl DataChannelProtocol {
    pub fn new(
        writer: Arc<dyn ChannelWriter>,
        settings: Option<SessionSettings>,
        transcript: Arc<TranscriptLog>,
        dispatcher: Arc<FunctionDispatcher>,
        greeting: Arc<dyn GreetingStrategy>,
    ) -> Self {
        Self {
            writer,
            settings,
            transcript,
            dispatcher,
            greeting,
            pending_calls: HashMap::new(),
        }
    }

    /// Consume channel events until the sender side is dropped.
    pub async fn run(mut self, mut channel_events: mpsc::Receiver<ChannelEvent>) {
        while let Some(event) = channel_events.recv().await {
            match event {
                ChannelEvent::Open => self.handle_open().await,
                ChannelEvent::Message(payload) => self.handle_message(&payload).await,
                ChannelEvent::Closed => {
                    info!("data channel closed");
                    self.transcript.system("data channel closed");
                }
                ChannelEvent::Error(reason) => {
                    warn!(%reason, "data channel error");
                    self.transcript.system(format!("data channel error: {reason}"));
                }
            }
        }
        debug!("protocol loop finished");
    }

    async fn handle_open(&mut self) {
        info!("data channel open");
        self.transcript.system("data channel open");

        match &self.settings {
            Some(settings) => {
                let update = ClientEvent::SessionUpdate {
                    session: SessionUpdate::from_settings(settings),
                };
                if let Err(e) = self.writer.send(&update).await {
                    warn!(error = %e, "failed to send session.update");
                }
            }
            None => warn!("no session configuration available, skipping session.update"),
        }

        let writer = Arc::clone(&self.writer);
        let greeting = Arc::clone(&self.greeting);
        tokio::spawn(async move {
            greeting.ready().await;
            if !writer.is_open() {
                debug!("channel no longer open, skipping greeting");
                return;
            }
            if let Err(e) = writer.send(&ClientEvent::ResponseCreate).await {
                warn!(error = %e, "failed to send greeting response.create");
            }
        });
    }

    async fn handle_message(&mut self, payload: &[u8]) {
        let inbound: InboundEvent = match serde_json::from_slice(payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                let error = ProtocolError {
                    reason: e.to_string(),
                };
                warn!(%error, "discarding malformed data channel message");
                return;
            }
        };
        match inbound {
            InboundEvent::Event(event) => self.handle_server_event(event).await,
            InboundEvent::Other(value) => {
                let kind = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("unknown");
                trace!(%kind, "ignoring event");
            }
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AudioTranscriptDone { transcript } => {
                self.transcript.append(TranscriptRole::Bot, transcript);
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                self.transcript.append(TranscriptRole::User, transcript);
            }
            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id, item.name)
                {
                    debug!(%call_id, %name, "function call announced");
                    self.pending_calls.insert(call_id, name);
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                let name = match name {
                    Some(name) => {
                        self.pending_calls.remove(&call_id);
                        name
                    }
                    None => self.pending_calls.remove(&call_id).unwrap_or_default(),
                };
                let call = FunctionCall {
                    name,
                    call_id,
                    arguments,
                };
                info!(name = %call.name, call_id = %call.call_id, "dispatching function call");
                let result = self.dispatcher.dispatch(&call).await;
                self.send_result(result).await;
            }
        }
    }

    async fn send_result(&self, result: FunctionResult) {
        if !self.writer.is_open() {
            warn!(call_id = %result.call_id, "data channel closed, dropping function result");
            return;
        }
        let item = ConversationItem::function_call_output(&result.call_id, &result.output);
        if let Err(e) = self
            .writer
            .send(&ClientEvent::ConversationItemCreate { item })
            .await
        {
            warn!(call_id = %result.call_id, error = %e, "failed to send function result");
            return;
        }
        // Nudge the assistant to speak to the result.
        if let Err(e) = self.writer.send(&ClientEvent::ResponseCreate).await {
            warn!(error = %e, "failed to request follow-up response");
        }
    }
}
