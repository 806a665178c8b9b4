//! Generative backend abstractions.
//!
//! Two layers:
//!
//! - [`Provider`]: an actual LLM backend (OpenAI-compatible HTTP, ...).
//! - [`ResponseSource`]: what execution strategies talk to. Production wires
//!   a source that forwards to a `Provider`; tests wire a scripted source.
//!   The choice is made once, at construction time, and business logic never
//!   branches on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// A request to the generative backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the backend so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub message: Message,

    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

impl ProviderResponse {
    /// A plain text response with the given usage.
    pub fn text(content: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            message: Message::assistant(content),
            usage,
            model: "unknown".into(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An LLM backend.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}

/// One call from a strategy to its response source.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// Subroutine the call is made for.
    pub subroutine_id: String,
    /// Tier 3 attempt number (1-based).
    pub attempt: u32,
    /// Resolved subroutine inputs.
    pub input: serde_json::Value,
    pub request: ProviderRequest,
}

/// Where execution strategies get generative responses from.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, request: SourceRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_temperature_defaults_when_missing() {
        let req: ProviderRequest =
            serde_json::from_str(r#"{"model":"m","messages":[]}"#).unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.tools.is_empty());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "find_team".into(),
            description: "Search for an existing team".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("find_team"));
        assert!(json.contains("query"));
    }
}
