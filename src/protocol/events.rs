//! Data channel wire event types.
//!
//! All events are JSON-encoded with a `type` tag and exchanged over the
//! negotiated WebRTC data channel.
//!
//! Client events (sent to the remote session):
//! - session.update - Apply the fetched session configuration
//! - response.create - Ask the assistant to produce a response
//! - conversation.item.create - Insert a function_call_output item
//!
//! Server events (received and acted on):
//! - response.audio_transcript.done - Finished assistant utterance
//! - conversation.item.input_audio_transcription.completed - Finished user utterance
//! - response.output_item.added - Carries function name for a pending call
//! - response.function_call_arguments.done - Function call ready to dispatch
//!
//! Every other inbound event type is ignored.

use serde::{Deserialize, Serialize};

use crate::signaling::SessionSettings;

// =============================================================================
// Client events
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

/// Session configuration payload for `session.update`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl SessionUpdate {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            instructions: settings.instructions.clone(),
            input_audio_transcription: settings
                .transcription_model
                .clone()
                .map(|model| InputAudioTranscription { model }),
            turn_detection: settings.turn_detection.clone(),
            tools: settings.tools.clone(),
            tool_choice: settings.tool_choice.clone(),
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Conversation item payload for `conversation.item.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// Function call result item, paired to the call by `call_id`.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
        }
    }
}

// =============================================================================
// Server events
// =============================================================================

/// The server event types this client acts on. Fields are deserialized
/// liberally: anything absent falls back to its default.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Assistant finished an utterance; transcript is complete.
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    /// User's speech was transcribed.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// A response output item appeared. For `function_call` items this is
    /// where the function name is learned.
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        item: AddedItem,
    },

    /// Function call arguments are complete; the call can be dispatched.
    /// `name` may be absent here and recovered from an earlier
    /// `response.output_item.added`.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddedItem {
    #[serde(rename = "type", default)]
    pub item_type: String,

    #[serde(default)]
    pub call_id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

/// Any valid JSON message from the channel.
///
/// Known event types parse into [`ServerEvent`]; everything else (including
/// known types with unexpected shapes) lands in `Other` and is ignored by the
/// protocol loop. Only invalid JSON is an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundEvent {
    Event(ServerEvent),
    Other(serde_json::Value),
}
