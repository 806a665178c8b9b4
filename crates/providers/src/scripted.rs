//! Scripted response source for tests and dry runs.
//!
//! Canned responses are registered per subroutine. For each call the
//! source picks, in order:
//!
//! 1. a response tagged with the call's attempt number (the step
//!    executor's attempt, so every call made during that attempt gets it,
//!    and concurrent runs of the same subroutine do not interfere),
//! 2. a response whose `input` equals the call's input structurally,
//! 3. the next untagged default for that subroutine, rotating,
//! 4. the next default registered under the `*` wildcard, rotating.
//!
//! A response can carry an artificial delay and can fail with a configured
//! error instead of answering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use swarmclaw_core::error::ProviderError;
use swarmclaw_core::message::{Message, MessageToolCall};
use swarmclaw_core::provider::*;
use tracing::debug;

/// Subroutine id matching every subroutine.
pub const ANY_SUBROUTINE: &str = "*";

/// Error a scripted response fails with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedErrorKind {
    Timeout,
    RateLimited,
    Network,
    ServerError,
    AuthenticationFailed,
    InvalidResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedError {
    pub kind: ScriptedErrorKind,
    #[serde(default)]
    pub message: String,
}

impl ScriptedError {
    fn to_provider_error(&self) -> ProviderError {
        let message = self.message.clone();
        match self.kind {
            ScriptedErrorKind::Timeout => ProviderError::Timeout(message),
            ScriptedErrorKind::RateLimited => ProviderError::RateLimited { retry_after_secs: 1 },
            ScriptedErrorKind::Network => ProviderError::Network(message),
            ScriptedErrorKind::ServerError => ProviderError::ApiError {
                status_code: 503,
                message,
            },
            ScriptedErrorKind::AuthenticationFailed => ProviderError::AuthenticationFailed(message),
            ScriptedErrorKind::InvalidResponse => ProviderError::InvalidResponse(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One canned response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedResponse {
    pub subroutine_id: String,
    /// Only served during this attempt of the step (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Only served when the call input equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ScriptedToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Reported token usage. Estimated from the content when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
}

impl ScriptedResponse {
    pub fn text(subroutine_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subroutine_id: subroutine_id.into(),
            attempt: None,
            input: None,
            content: content.into(),
            tool_calls: Vec::new(),
            error: None,
            delay_ms: None,
            tokens: None,
        }
    }

    pub fn error(subroutine_id: impl Into<String>, kind: ScriptedErrorKind) -> Self {
        let mut response = Self::text(subroutine_id, "");
        response.error = Some(ScriptedError {
            kind,
            message: format!("scripted {kind:?}"),
        });
        response
    }

    pub fn tool_call(
        subroutine_id: impl Into<String>,
        tool: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        let mut response = Self::text(subroutine_id, "");
        response.tool_calls.push(ScriptedToolCall {
            name: tool.into(),
            arguments,
        });
        response
    }

    pub fn on_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn on_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn is_default(&self) -> bool {
        self.attempt.is_none() && self.input.is_none()
    }

    fn to_response(&self, call_index: usize) -> ProviderResponse {
        let mut message = Message::assistant(self.content.clone());
        message.tool_calls = self
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, tc)| MessageToolCall {
                id: format!("call_{call_index}_{i}"),
                name: tc.name.clone(),
                arguments: tc.arguments.to_string(),
            })
            .collect();

        let completion = self
            .tokens
            .unwrap_or_else(|| (self.content.len() as u32).div_ceil(4));
        ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 0,
                completion_tokens: completion,
                total_tokens: completion,
            }),
            model: "scripted".into(),
        }
    }
}

#[derive(Default)]
struct ScriptState {
    calls: HashMap<String, u32>,
    rotation: HashMap<String, usize>,
    total_calls: usize,
}

/// A [`ResponseSource`] replaying registered responses.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Vec<ScriptedResponse>,
    state: Mutex<ScriptState>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Register another response.
    pub fn on(mut self, response: ScriptedResponse) -> Self {
        self.responses.push(response);
        self
    }

    /// Parse a JSON array of responses.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let responses: Vec<ScriptedResponse> = serde_json::from_str(json)?;
        Ok(Self::with_responses(responses))
    }

    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::NotConfigured(format!("cannot read script {}: {e}", path.display()))
        })?;
        Self::from_json(&content).map_err(|e| {
            ProviderError::NotConfigured(format!("invalid script {}: {e}", path.display()))
        })
    }

    /// Calls received so far for one subroutine.
    pub fn call_count(&self, subroutine_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(subroutine_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().total_calls
    }

    fn select(
        &self,
        subroutine_id: &str,
        attempt: u32,
        input: &serde_json::Value,
    ) -> Option<&ScriptedResponse> {
        let own = || self.responses.iter().filter(move |r| r.subroutine_id == subroutine_id);

        own()
            .find(|r| r.attempt == Some(attempt))
            .or_else(|| own().find(|r| r.attempt.is_none() && r.input.as_ref() == Some(input)))
            .or_else(|| self.rotate(subroutine_id, own()))
            .or_else(|| {
                let wildcard = self
                    .responses
                    .iter()
                    .filter(|r| r.subroutine_id == ANY_SUBROUTINE);
                self.rotate(ANY_SUBROUTINE, wildcard)
            })
    }

    /// Next untagged default from `pool`, advancing the pool's rotation.
    fn rotate<'a>(
        &self,
        pool_key: &str,
        pool: impl Iterator<Item = &'a ScriptedResponse>,
    ) -> Option<&'a ScriptedResponse> {
        let defaults: Vec<&ScriptedResponse> = pool.filter(|r| r.is_default()).collect();
        if defaults.is_empty() {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        let slot = state.rotation.entry(pool_key.to_string()).or_insert(0);
        let chosen = defaults[*slot % defaults.len()];
        *slot += 1;
        Some(chosen)
    }
}

#[async_trait]
impl ResponseSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn respond(
        &self,
        request: SourceRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let (call, call_index) = {
            let mut state = self.state.lock().unwrap();
            state.total_calls += 1;
            let n = state.calls.entry(request.subroutine_id.clone()).or_insert(0);
            *n += 1;
            (*n, state.total_calls)
        };

        let response = self
            .select(&request.subroutine_id, request.attempt, &request.input)
            .cloned()
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "no scripted response for '{}' (attempt {}, call {call})",
                    request.subroutine_id, request.attempt
                ))
            })?;

        debug!(
            subroutine = %request.subroutine_id,
            attempt = request.attempt,
            call,
            "Serving scripted response"
        );

        if let Some(ms) = response.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        match &response.error {
            Some(err) => Err(err.to_provider_error()),
            None => Ok(response.to_response(call_index)),
        }
    }
}
