//! Conversion between the internal message format and the neutral wire
//! representation, plus classification of a model turn into the decision the
//! agent loop acts on.
//!
//! Provider-specific payload shapes (openai function calls, anthropic
//! tool_use blocks) are handled in `providers::utils`; by the time a message
//! reaches this module it is already in the internal format, so the loop
//! never has to inspect a provider payload directly.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::models::message::{Message, ToolRequest};

/// The decision carried by a single assistant turn
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// The model produced its answer and the loop should terminate
    FinalAnswer(String),
    /// The model requested one or more tool invocations. Requests whose
    /// arguments could not be parsed are preserved as `Err` entries so each
    /// id still receives a response.
    ToolCalls(Vec<ToolRequest>),
    /// The turn carried neither text nor a tool request
    Malformed(String),
}

/// Map messages to the neutral wire representation.
///
/// Lossless for role and content: `from_wire(to_wire(m))` reproduces the
/// original messages.
pub fn to_wire(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role,
                "created": message.created,
                "content": message.content,
            })
        })
        .collect()
}

/// Parse the neutral wire representation back into messages
pub fn from_wire(values: &[Value]) -> Result<Vec<Message>> {
    values
        .iter()
        .map(|value| {
            serde_json::from_value(value.clone())
                .map_err(|e| anyhow!("Malformed wire message: {}", e))
        })
        .collect()
}

/// Classify an assistant turn as a final answer, tool calls, or malformed
pub fn decode_response(message: &Message) -> ModelResponse {
    // Tool requests take precedence over any accompanying text, and a turn
    // may carry several of them
    let requests: Vec<ToolRequest> = message
        .content
        .iter()
        .filter_map(|c| c.as_tool_request())
        .cloned()
        .collect();
    if !requests.is_empty() {
        return ModelResponse::ToolCalls(requests);
    }

    let text = message.text();
    if text.trim().is_empty() {
        ModelResponse::Malformed("The response contained neither text nor a tool call".to_string())
    } else {
        ModelResponse::FinalAnswer(text)
    }
}
