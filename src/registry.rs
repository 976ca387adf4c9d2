use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

/// A named external capability the model may invoke.
///
/// Implementations wrap collaborators such as the dependency scanner, the
/// code editor, git, or the build runner. The registry only looks them up and
/// dispatches; any business logic lives behind this trait.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The tool contract presented to the model
    fn spec(&self) -> &Tool;

    /// Execute the capability with schema-valid arguments
    async fn call(&self, arguments: Value) -> AgentResult<Value>;
}

/// Fixed, ordered lookup-and-dispatch table of capabilities
pub struct ToolRegistry {
    capabilities: Vec<Box<dyn Capability>>,
}

impl ToolRegistry {
    /// Build a registry, rejecting duplicate tool names
    pub fn new(capabilities: Vec<Box<dyn Capability>>) -> AgentResult<Self> {
        let mut names = HashSet::new();
        for capability in &capabilities {
            let name = &capability.spec().name;
            if !names.insert(name.clone()) {
                return Err(AgentError::Configuration(format!(
                    "Duplicate tool name: {}",
                    name
                )));
            }
        }
        Ok(Self { capabilities })
    }

    /// The tool specs in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.capabilities
            .iter()
            .map(|c| c.spec().clone())
            .collect()
    }

    /// Dispatch a tool call to the matching capability.
    ///
    /// The name must match exactly; there is no partial or fuzzy matching.
    pub async fn dispatch(&self, call: &ToolCall) -> AgentResult<Value> {
        let capability = self
            .capabilities
            .iter()
            .find(|c| c.spec().name == call.name)
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;

        validate_arguments(capability.spec(), &call.arguments)?;

        debug!(tool = %call.name, "dispatching tool call");
        capability.call(call.arguments.clone()).await
    }
}

/// Check arguments against the declared input schema.
///
/// This covers the shapes the collaborators declare: a top-level object,
/// required property names, and primitive property types. It is not a full
/// JSON Schema validator.
fn validate_arguments(tool: &Tool, arguments: &Value) -> AgentResult<()> {
    let args = arguments.as_object().ok_or_else(|| {
        AgentError::InvalidParameters(format!(
            "Arguments for {} must be a JSON object",
            tool.name
        ))
    })?;

    if let Some(required) = tool.input_schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !args.contains_key(name) {
                return Err(AgentError::InvalidParameters(format!(
                    "Missing required parameter '{}' for {}",
                    name, tool.name
                )));
            }
        }
    }

    if let Some(properties) = tool
        .input_schema
        .get("properties")
        .and_then(|p| p.as_object())
    {
        for (name, value) in args {
            let Some(expected) = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(AgentError::InvalidParameters(format!(
                    "Parameter '{}' for {} must be of type {}",
                    name, tool.name, expected
                )));
            }
        }
    }

    Ok(())
}
