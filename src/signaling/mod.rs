//! Typed HTTP client for the backend signaling endpoints.
//!
//! Three endpoints, no retries:
//! - `POST start-session`          -> session id + ephemeral key
//! - `POST webrtc-sdp`             -> SDP answer for our offer
//! - `GET  get-session-configuration` -> remote session settings
//!
//! The backend's contract is loose: `start-session` may omit fields, and the
//! SDP answer arrives with status 200 or 201 depending on what the upstream
//! realtime service returned.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::SignalingError;

/// Credentials granted by `start-session`.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: String,
    pub ephemeral_key: String,
}

/// Remote session settings served by `get-session-configuration`.
///
/// Every field is optional; absent fields are simply not sent in the
/// subsequent `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub transcription_model: Option<String>,
    #[serde(default)]
    pub turn_detection: Option<serde_json::Value>,
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_choice: Option<String>,
}

#[derive(Serialize)]
struct StartSessionRequest<'a> {
    #[serde(rename = "botType")]
    bot_type: &'a str,
    user_email: &'a str,
}

#[derive(Deserialize)]
struct StartSessionResponse {
    #[serde(default)]
    ephemeral_key: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct SdpExchangeRequest<'a> {
    ephemeral_key: &'a str,
    offer_sdp: &'a str,
}

#[derive(Deserialize)]
struct SdpExchangeResponse {
    answer_sdp: String,
}

#[derive(Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    base: String,
}

impl SignalingClient {
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            base: config.endpoint_base(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Request a new session for the given persona and user.
    ///
    /// Fails with [`SignalingError::MalformedResponse`] when the backend
    /// answers 2xx but omits the ephemeral key or session id.
    pub async fn request_session(
        &self,
        bot_type: &str,
        user_email: &str,
    ) -> Result<SessionGrant, SignalingError> {
        let response = self
            .http
            .post(self.endpoint("start-session"))
            .json(&StartSessionRequest {
                bot_type,
                user_email,
            })
            .send()
            .await?;
        let body: StartSessionResponse = Self::read_json(response).await?;
        match (body.ephemeral_key, body.session_id) {
            (Some(ephemeral_key), Some(session_id)) => {
                debug!(%session_id, "session granted");
                Ok(SessionGrant {
                    session_id,
                    ephemeral_key,
                })
            }
            (None, _) => Err(SignalingError::MalformedResponse(
                "start-session response missing ephemeral_key".to_string(),
            )),
            (_, None) => Err(SignalingError::MalformedResponse(
                "start-session response missing session_id".to_string(),
            )),
        }
    }

    /// Exchange our SDP offer for the remote answer. 200 and 201 are both
    /// success.
    pub async fn exchange_sdp(
        &self,
        ephemeral_key: &str,
        offer_sdp: &str,
    ) -> Result<String, SignalingError> {
        let response = self
            .http
            .post(self.endpoint("webrtc-sdp"))
            .json(&SdpExchangeRequest {
                ephemeral_key,
                offer_sdp,
            })
            .send()
            .await?;
        let body: SdpExchangeResponse = Self::read_json(response).await?;
        Ok(body.answer_sdp)
    }

    pub async fn fetch_session_config(&self) -> Result<SessionSettings, SignalingError> {
        let response = self
            .http
            .get(self.endpoint("get-session-configuration"))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SignalingError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SignalingError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SignalingError::MalformedResponse(e.to_string()))
    }
}
