//! Token estimation.
//!
//! Character heuristic: roughly 4 characters per token, rounded up. Close
//! enough for BPE tokenizers on English text and stable for tests.

use swarmclaw_core::message::Message;
use swarmclaw_core::provider::ToolDefinition;

/// Role name, delimiters and formatting markers on the wire.
const MESSAGE_OVERHEAD: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Tokens for one message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Tokens for a tool definition as it is sent (serialized JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    serde_json::to_string(tool)
        .map(|json| estimate_tokens(&json))
        .unwrap_or_default()
}

pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmclaw_core::message::MessageToolCall;

    #[test]
    fn rounds_up_to_whole_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("team"), 1);
        assert_eq!(estimate_tokens("teams"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn messages_carry_overhead() {
        // "hello" → 2 tokens + 4 overhead, twice
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }

    #[test]
    fn tool_calls_count_towards_message() {
        let mut msg = Message::assistant("");
        msg.tool_calls.push(MessageToolCall {
            id: "c1".into(),
            name: "find".into(),
            arguments: r#"{"q":"x"}"#.into(),
        });
        // 4 overhead + "find" (1) + 9 chars of arguments (3)
        assert_eq!(estimate_message_tokens(&msg), 8);
    }

    #[test]
    fn tool_schemas_are_counted() {
        let tool = ToolDefinition {
            name: "lookup".into(),
            description: "Look up an answer".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        assert!(estimate_tool_tokens(&tool) > 0);
        assert_eq!(estimate_tools_tokens(&[]), 0);
    }
}
