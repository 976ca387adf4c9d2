use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::Tool;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TEST_SYSTEM_TEMPLATE: &str = include_str!("prompts/test_system.md");

fn render<T: Serialize>(template: &str, context_data: &T) -> AgentResult<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    let context =
        Context::from_serialize(context_data).map_err(|e| AgentError::Internal(e.to_string()))?;
    tera.render("inline_template", &context)
        .map_err(|e| AgentError::Internal(e.to_string()))
}

#[derive(Serialize)]
struct PromptContext<'a> {
    tools: &'a [Tool],
}

/// Render the fixed system instruction, enumerating the registered tools and
/// the required upgrade workflow
pub fn render_system_prompt(tools: &[Tool]) -> AgentResult<String> {
    render(SYSTEM_TEMPLATE, &PromptContext { tools })
}

/// Render the system instruction for a test-generation session
pub fn render_test_system_prompt(tools: &[Tool]) -> AgentResult<String> {
    render(TEST_SYSTEM_TEMPLATE, &PromptContext { tools })
}

/// Compose the full prompt for one model call: the system instruction first,
/// then the memory snapshot, the scratchpad of in-progress tool interactions,
/// and the current user goal last.
///
/// No randomness is introduced here; for identical inputs the assembled
/// sequence is identical.
pub fn assemble(
    system_prompt: &str,
    memory: &[Message],
    scratchpad: &[Message],
    goal: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(memory.len() + scratchpad.len() + 2);
    messages.push(Message::system().with_text(system_prompt));
    messages.extend_from_slice(memory);
    messages.extend_from_slice(scratchpad);
    messages.push(Message::user().with_text(goal));
    messages
}
