//! Session lifecycle orchestration.
//!
//! [`SessionController`] drives the whole flow: request a session from the
//! backend, establish the WebRTC transport, hand the data channel to the
//! protocol loop, and tear everything down on stop or failure. State
//! transitions are recorded as system entries in the transcript.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::errors::{SessionError, SignalingError};
use crate::functions::FunctionDispatcher;
use crate::media::{AudioCapture, AudioSink};
use crate::protocol::{DataChannelProtocol, FixedDelayGreeting, GreetingStrategy};
use crate::signaling::SignalingClient;
use crate::transport::{PeerConnectionManager, Transport, TransportLink, TransportStatus};

pub mod transcript;
pub use transcript::{TranscriptEntry, TranscriptLog, TranscriptRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    /// Terminal until the next `start()`.
    Error,
    /// Transitional label while stopping; the controller rests at Idle.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Error => write!(f, "error"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Credentials of the live session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub ephemeral_key: String,
}

pub struct SessionController {
    config: ClientConfig,
    signaling: SignalingClient,
    dispatcher: Arc<FunctionDispatcher>,
    greeting: Arc<dyn GreetingStrategy>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    state: Arc<RwLock<SessionState>>,
    transcript: Arc<TranscriptLog>,
    session: Mutex<Option<Session>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
}

impl SessionController {
    /// Full production wiring: shared HTTP client, WebRTC transport, fixed
    /// delay greeting.
    pub fn new(
        config: ClientConfig,
        capture: Arc<dyn AudioCapture>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(SignalingError::from)?;
        let signaling = SignalingClient::new(http.clone(), &config);
        let dispatcher = Arc::new(FunctionDispatcher::new(http, &config));
        let transport = Box::new(PeerConnectionManager::new(
            signaling.clone(),
            config.clone(),
            capture,
            sink,
        ));
        let greeting = Arc::new(FixedDelayGreeting::new(config.greeting_delay));
        Ok(Self::with_parts(
            config, signaling, dispatcher, transport, greeting,
        ))
    }

    /// Wiring seam: inject a transport and greeting strategy.
    pub fn with_parts(
        config: ClientConfig,
        signaling: SignalingClient,
        dispatcher: Arc<FunctionDispatcher>,
        transport: Box<dyn Transport>,
        greeting: Arc<dyn GreetingStrategy>,
    ) -> Self {
        Self {
            config,
            signaling,
            dispatcher,
            greeting,
            transport: tokio::sync::Mutex::new(transport),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            transcript: Arc::new(TranscriptLog::new()),
            session: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn transcript(&self) -> Arc<TranscriptLog> {
        Arc::clone(&self.transcript)
    }

    /// Spoken turns only, system diagnostics filtered out.
    pub fn conversation(&self) -> Vec<TranscriptEntry> {
        self.transcript.conversation()
    }

    /// Start a session for the given user.
    ///
    /// No-op when already Connecting or Active. On a malformed session grant
    /// the state stays Idle; failures after the grant transition to Error
    /// with nothing left allocated.
    pub async fn start(&self, user_email: &str) -> Result<(), SessionError> {
        // Also serializes concurrent start() calls.
        let mut transport = self.transport.lock().await;

        let state = self.state();
        if matches!(state, SessionState::Connecting | SessionState::Active) {
            debug!(%state, "start ignored, session already running");
            return Ok(());
        }

        // Leftovers from a previous Error state.
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        info!(user_email, bot_type = %self.config.bot_type, "starting session");
        let grant = match self
            .signaling
            .request_session(&self.config.bot_type, user_email)
            .await
        {
            Ok(grant) => grant,
            Err(SignalingError::MalformedResponse(reason)) => {
                warn!(%reason, "unusable session grant");
                return Err(SessionError::Start(reason));
            }
            Err(e) => {
                warn!(error = %e, "session request failed");
                return Err(e.into());
            }
        };
        *self.session.lock() = Some(Session {
            session_id: grant.session_id.clone(),
            ephemeral_key: grant.ephemeral_key.clone(),
        });
        self.transition(SessionState::Connecting);

        let established = tokio::select! {
            _ = cancel.cancelled() => None,
            result = transport.establish(&grant.ephemeral_key) => Some(result),
        };
        let link = match established {
            None => {
                debug!("session start cancelled");
                transport.teardown().await;
                *self.session.lock() = None;
                self.transition(SessionState::Idle);
                return Err(SessionError::Cancelled);
            }
            Some(Ok(link)) => link,
            Some(Err(e)) => {
                error!(error = %e, "transport establishment failed");
                transport.teardown().await;
                *self.session.lock() = None;
                self.transcript.system(format!("session error: {e}"));
                self.transition(SessionState::Error);
                return Err(e.into());
            }
        };

        // Best effort: without the configuration the session still runs on
        // remote defaults, it just never receives a session.update.
        let settings = match self.signaling.fetch_session_config().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(error = %e, "session configuration unavailable, continuing without it");
                None
            }
        };

        let TransportLink {
            writer,
            channel_events,
            mut status_events,
        } = link;
        let protocol = DataChannelProtocol::new(
            writer,
            settings,
            Arc::clone(&self.transcript),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.greeting),
        );
        let protocol_task = tokio::spawn(protocol.run(channel_events));

        let state = Arc::clone(&self.state);
        let transcript = Arc::clone(&self.transcript);
        let watch_task = tokio::spawn(async move {
            while let Some(status) = status_events.recv().await {
                if let TransportStatus::Failed(reason) = status {
                    error!(%reason, "transport failed");
                    Self::record_transition(&state, &transcript, SessionState::Error);
                    break;
                }
            }
        });
        *self.tasks.lock() = vec![protocol_task, watch_task];

        self.transition(SessionState::Active);
        info!(session_id = %grant.session_id, "session active");
        Ok(())
    }

    /// Stop the session and release all resources. Safe from any state;
    /// calling it twice performs one teardown. A `stop()` that arrives while
    /// `start()` is still establishing cancels the establishment.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let mut transport = self.transport.lock().await;

        let had_session = self.session.lock().take().is_some();
        if !had_session && self.state() == SessionState::Idle {
            debug!("stop ignored, nothing to tear down");
            return;
        }

        info!("stopping session");
        self.transition(SessionState::Closed);
        transport.teardown().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.transition(SessionState::Idle);
    }

    fn transition(&self, next: SessionState) {
        Self::record_transition(&self.state, &self.transcript, next);
    }

    fn record_transition(
        state: &RwLock<SessionState>,
        transcript: &TranscriptLog,
        next: SessionState,
    ) {
        let previous = {
            let mut guard = state.write();
            let previous = *guard;
            *guard = next;
            previous
        };
        if previous != next {
            debug!(%previous, %next, "session state changed");
            transcript.system(format!("session state: {previous} -> {next}"));
        }
    }
}
