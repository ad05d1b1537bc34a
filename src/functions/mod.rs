//! Function-call dispatch to the backend capability endpoints.
//!
//! The assistant can call a fixed set of functions; each maps to a backend
//! `POST functions/{name}` endpoint. Dispatch never fails at the API
//! boundary: unknown names, bad arguments and downstream failures all come
//! back as a structured `{"error": ...}` result so the assistant can recover
//! conversationally.

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClientConfig;

/// Fixed function route table.
static FUNCTION_ROUTES: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "get_fitness_recommendations" => "functions/get_fitness_recommendations",
    "get_user_profile" => "functions/get_user_profile",
    "get_progress_data" => "functions/get_progress_data",
    "get_todays_plan" => "functions/get_todays_plan",
};

/// A function call requested by the assistant.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub call_id: String,
    /// Raw JSON arguments string as received on the wire.
    pub arguments: String,
}

/// The result paired back to the call. `output` is always a JSON string.
#[derive(Debug, Clone)]
pub struct FunctionResult {
    pub call_id: String,
    pub output: String,
}

#[derive(Debug, Error)]
enum FunctionError {
    // This exact message is surfaced to the assistant.
    #[error("Unknown function: {0}")]
    Unknown(String),

    #[error("invalid function arguments: {0}")]
    BadArguments(String),

    #[error("function endpoint returned status {0}")]
    Endpoint(u16),

    #[error("function request failed: {0}")]
    Request(String),
}

pub struct FunctionDispatcher {
    http: reqwest::Client,
    base: String,
}

impl FunctionDispatcher {
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            base: config.endpoint_base(),
        }
    }

    pub fn known_function(name: &str) -> bool {
        FUNCTION_ROUTES.contains_key(name)
    }

    /// Dispatch one call. Always returns a result for the given `call_id`.
    pub async fn dispatch(&self, call: &FunctionCall) -> FunctionResult {
        let output = match self.invoke(call).await {
            Ok(output) => {
                debug!(name = %call.name, call_id = %call.call_id, "function call succeeded");
                output
            }
            Err(e) => {
                warn!(name = %call.name, call_id = %call.call_id, error = %e, "function call failed");
                json!({ "error": e.to_string() }).to_string()
            }
        };
        FunctionResult {
            call_id: call.call_id.clone(),
            output,
        }
    }

    async fn invoke(&self, call: &FunctionCall) -> Result<String, FunctionError> {
        let Some(route) = FUNCTION_ROUTES.get(call.name.as_str()) else {
            return Err(FunctionError::Unknown(call.name.clone()));
        };

        let arguments: serde_json::Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.arguments)
                .map_err(|e| FunctionError::BadArguments(e.to_string()))?
        };

        let response = self
            .http
            .post(format!("{}{route}", self.base))
            .json(&arguments)
            .send()
            .await
            .map_err(|e| FunctionError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FunctionError::Endpoint(status.as_u16()));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FunctionError::Request(e.to_string()))?;
        Ok(body.to_string())
    }
}
