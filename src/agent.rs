use indoc::indoc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{AgentError, AgentResult};
use crate::formatter::{decode_response, ModelResponse};
use crate::index::CodeIndex;
use crate::memory::ConversationMemory;
use crate::models::message::Message;
use crate::prompt;
use crate::providers::base::Provider;
use crate::registry::ToolRegistry;

const DEFAULT_MAX_ITERATIONS: usize = 15;

/// Agent that drives dependency upgrades by pairing an LLM with the
/// capabilities it needs to act on a project.
///
/// The provider, registry and index are injected at construction and shared
/// across calls; only the conversation memory mutates between runs, and each
/// `run` call owns its own transient state.
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: ToolRegistry,
    index: Option<Arc<RwLock<CodeIndex>>>,
    memory: ConversationMemory,
    system_prompt: String,
    max_iterations: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider and tool registry
    pub fn new(provider: Box<dyn Provider>, registry: ToolRegistry) -> AgentResult<Self> {
        let system_prompt = prompt::render_system_prompt(&registry.tools())?;
        Ok(Self {
            provider,
            registry,
            index: None,
            memory: ConversationMemory::new(),
            system_prompt,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Create an agent specialized for test generation rather than upgrades.
    ///
    /// The registry is expected to carry the analysis, test-generation and
    /// build capabilities; the system instruction enumerates whatever it
    /// holds.
    pub fn new_test_agent(provider: Box<dyn Provider>, registry: ToolRegistry) -> AgentResult<Self> {
        let system_prompt = prompt::render_test_system_prompt(&registry.tools())?;
        Ok(Self {
            provider,
            registry,
            index: None,
            memory: ConversationMemory::new(),
            system_prompt,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Attach a retrieval index so `initialize_index` and the `code_search`
    /// tool have something to work against
    pub fn with_index(mut self, index: Arc<RwLock<CodeIndex>>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// The conversation so far, including partial transcripts of failed runs
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Ensure the retrieval index is available before a session begins
    pub async fn initialize_index(&self, force_refresh: bool) -> AgentResult<()> {
        let index = self.index.as_ref().ok_or_else(|| {
            AgentError::Configuration("No retrieval index attached to this agent".to_string())
        })?;
        index
            .write()
            .await
            .ensure_built(force_refresh)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))
    }

    /// Execute the full reasoning loop for a natural-language goal and return
    /// the final answer.
    ///
    /// Every message the loop produces is appended to memory as it happens,
    /// so the transcript stays truthful even when a run ends in an error.
    pub async fn run(&mut self, goal: &str) -> AgentResult<String> {
        info!(goal, "starting agent run");
        let tools = self.registry.tools();

        // The prompt sees history from before this run; the current run's
        // progress is carried by the scratchpad
        let history_len = self.memory.len();
        self.memory.append(Message::user().with_text(goal));

        let mut scratchpad: Vec<Message> = Vec::new();
        let mut iterations = 0;

        loop {
            if iterations >= self.max_iterations {
                warn!(iterations, "iteration limit exceeded");
                return Err(AgentError::IterationLimit(self.max_iterations));
            }
            iterations += 1;

            let assembled = prompt::assemble(
                &self.system_prompt,
                &self.memory.snapshot()[..history_len],
                &scratchpad,
                goal,
            );
            // The system instruction travels out of band; the providers place
            // it themselves
            let dialogue = &assembled[1..];

            let (response, _usage) = self
                .provider
                .complete(&self.system_prompt, dialogue, &tools)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?;

            match decode_response(&response) {
                ModelResponse::FinalAnswer(answer) => {
                    self.memory.append(response);
                    info!(iterations, "agent run finished");
                    return Ok(answer);
                }
                ModelResponse::ToolCalls(requests) => {
                    self.memory.append(response.clone());
                    scratchpad.push(response);

                    // Every requested id gets a response; leaving one
                    // unanswered invalidates the next backend call
                    for request in requests {
                        let observation = match &request.tool_call {
                            Ok(call) => {
                                info!(tool = %call.name, "model requested tool");
                                match self.registry.dispatch(call).await {
                                    Ok(value) => Message::tool()
                                        .with_tool_response(&request.id, Ok(render_result(&value))),
                                    // Unknown names, schema mismatches and
                                    // failed executions all go back to the
                                    // model as data so it can correct itself;
                                    // only the iteration cap bounds the
                                    // retries
                                    Err(
                                        e @ (AgentError::UnknownTool(_)
                                        | AgentError::InvalidParameters(_)
                                        | AgentError::ExecutionError(_)),
                                    ) => {
                                        warn!(tool = %call.name, error = %e, "tool call failed");
                                        Message::tool().with_tool_response(&request.id, Err(e))
                                    }
                                    Err(other) => return Err(other),
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "unparseable tool request");
                                Message::tool().with_tool_response(&request.id, Err(e.clone()))
                            }
                        };
                        self.memory.append(observation.clone());
                        scratchpad.push(observation);
                    }
                }
                ModelResponse::Malformed(reason) => {
                    warn!(%reason, "malformed model response");
                    self.memory.append(response.clone());
                    scratchpad.push(response);

                    let correction = Message::user().with_text(format!(
                        "Your previous response could not be interpreted: {}. \
                         Respond with either a single call to one of the available \
                         tools or a final answer.",
                        reason
                    ));
                    self.memory.append(correction.clone());
                    scratchpad.push(correction);
                }
            }
        }
    }

    /// Upgrade a specific dependency, optionally to a target version
    pub async fn upgrade_dependency(
        &mut self,
        dependency_name: &str,
        target_version: Option<&str>,
    ) -> AgentResult<String> {
        let mut goal = format!("Upgrade the dependency {}", dependency_name);
        if let Some(version) = target_version {
            goal.push_str(&format!(" to version {}", version));
        }
        self.run(&goal).await
    }

    /// Scan the project and upgrade all dependencies that need updating
    pub async fn scan_and_upgrade_all(&mut self) -> AgentResult<String> {
        let goal = indoc! {"
            Please scan the project for dependencies that need upgrading.
            For each dependency that needs an upgrade:
            1. Analyze the potential impact
            2. Create a separate branch for each upgrade
            3. Implement necessary code changes
            4. Generate and run tests
            5. Create a pull request for each successful upgrade

            Start by scanning the dependencies, then proceed with the upgrades one by one.
        "};
        self.run(goal).await
    }

    /// Scan the project and report upgrade candidates without making changes
    pub async fn scan_and_find_upgrade_candidates(&mut self) -> AgentResult<String> {
        let goal = "Scan the project for dependencies and find upgrade candidates. \
                    Report what you find without making any changes.";
        self.run(goal).await
    }

    /// Generate tests for a specific file, optionally pinning the framework
    /// and the output location
    pub async fn generate_tests_for_file(
        &mut self,
        file_path: &str,
        test_framework: Option<&str>,
        output_path: Option<&str>,
    ) -> AgentResult<String> {
        let mut goal = format!("Generate tests for the file {}", file_path);
        if let Some(framework) = test_framework {
            goal.push_str(&format!(" using the {} framework", framework));
        }
        if let Some(path) = output_path {
            goal.push_str(&format!(" and save them to {}", path));
        }
        self.run(&goal).await
    }

    /// Run the whole test suite, or only the named test files
    pub async fn run_tests(&mut self, test_files: &[&str]) -> AgentResult<String> {
        let goal = if test_files.is_empty() {
            "Run all tests for the project".to_string()
        } else {
            format!("Run the following test files: {}", test_files.join(", "))
        };
        self.run(&goal).await
    }
}

fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::models::tool::{Tool, ToolCall};
    use crate::providers::mock::{FailingProvider, MockProvider};
    use crate::registry::Capability;
    use async_trait::async_trait;
    use serde_json::json;

    struct ScannerCapability {
        spec: Tool,
        fail: bool,
    }

    impl ScannerCapability {
        fn new(fail: bool) -> Self {
            Self {
                spec: Tool::new(
                    "dependency_scanner",
                    "Scans a project for dependencies and identifies upgrade candidates",
                    json!({
                        "type": "object",
                        "properties": {
                            "project_path": {"type": "string"}
                        }
                    }),
                ),
                fail,
            }
        }
    }

    #[async_trait]
    impl Capability for ScannerCapability {
        fn spec(&self) -> &Tool {
            &self.spec
        }

        async fn call(&self, _arguments: Value) -> AgentResult<Value> {
            if self.fail {
                Err(AgentError::ExecutionError(
                    "scanner exited with status 1".to_string(),
                ))
            } else {
                Ok(json!({
                    "upgrade_candidates": [
                        {"name": "left-pad", "current_version": "1.0.0", "available_version": "2.0.0"}
                    ]
                }))
            }
        }
    }

    fn agent_with(responses: Vec<Message>, fail_tool: bool) -> Agent {
        let registry =
            ToolRegistry::new(vec![Box::new(ScannerCapability::new(fail_tool))]).unwrap();
        Agent::new(Box::new(MockProvider::new(responses)), registry).unwrap()
    }

    #[tokio::test]
    async fn test_simple_final_answer() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![Message::assistant().with_text("All dependencies are current.")],
            false,
        );

        let answer = agent.run("Check the project").await?;
        assert_eq!(answer, "All dependencies are current.");

        // Goal and answer both recorded
        assert_eq!(agent.memory().len(), 2);
        assert_eq!(agent.memory().snapshot()[0].role, Role::User);
        assert_eq!(agent.memory().snapshot()[1].role, Role::Assistant);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_tool_request(
                    "1",
                    Ok(ToolCall::new("dependency_scanner", json!({"project_path": "."}))),
                ),
                Message::assistant().with_text("left-pad can be upgraded to 2.0.0."),
            ],
            false,
        );

        let answer = agent.run("Scan the project").await?;
        assert_eq!(answer, "left-pad can be upgraded to 2.0.0.");

        // goal, tool request, observation, final answer
        assert_eq!(agent.memory().len(), 4);
        let observation = &agent.memory().snapshot()[2];
        assert_eq!(observation.role, Role::Tool);
        let result = observation.content[0].as_tool_response().unwrap();
        assert!(result.tool_result.as_ref().unwrap().contains("left-pad"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool_feeds_corrective_observation() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant()
                    .with_tool_request("1", Ok(ToolCall::new("does_not_exist", json!({})))),
                Message::assistant().with_text("Sorry, let me try again."),
            ],
            false,
        );

        let answer = agent.run("Scan the project").await?;
        assert_eq!(answer, "Sorry, let me try again.");

        let observation = &agent.memory().snapshot()[2];
        assert_eq!(observation.role, Role::Tool);
        let response = observation.content[0].as_tool_response().unwrap();
        assert!(matches!(
            response.tool_result,
            Err(AgentError::UnknownTool(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_schema_mismatch_feeds_corrective_observation() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_tool_request(
                    "1",
                    Ok(ToolCall::new("dependency_scanner", json!({"project_path": 7}))),
                ),
                Message::assistant().with_text("Retrying with a string path."),
            ],
            false,
        );

        let answer = agent.run("Scan the project").await?;
        assert_eq!(answer, "Retrying with a string path.");

        let response = agent.memory().snapshot()[2].content[0]
            .as_tool_response()
            .unwrap();
        assert!(matches!(
            response.tool_result,
            Err(AgentError::InvalidParameters(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_execution_error_does_not_abort_run() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_tool_request(
                    "1",
                    Ok(ToolCall::new("dependency_scanner", json!({"project_path": "."}))),
                ),
                Message::assistant().with_text("The scanner is broken; I could not proceed."),
            ],
            true,
        );

        // The failure is surfaced to the model, not to the caller, and the
        // loop gets at least one further thinking cycle
        let answer = agent.run("Scan the project").await?;
        assert_eq!(answer, "The scanner is broken; I could not proceed.");

        let observation = &agent.memory().snapshot()[2];
        assert_eq!(observation.role, Role::Tool);
        let response = observation.content[0].as_tool_response().unwrap();
        assert!(matches!(
            response.tool_result,
            Err(AgentError::ExecutionError(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_parallel_tool_calls_each_get_a_response() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant()
                    .with_tool_request(
                        "call_1",
                        Ok(ToolCall::new("dependency_scanner", json!({"project_path": "."}))),
                    )
                    .with_tool_request(
                        "call_2",
                        Ok(ToolCall::new("dependency_scanner", json!({"project_path": "./sub"}))),
                    ),
                Message::assistant().with_text("Both scans came back clean."),
            ],
            false,
        );

        let answer = agent.run("Scan everything").await?;
        assert_eq!(answer, "Both scans came back clean.");

        // goal, request turn, one observation per id, final answer
        assert_eq!(agent.memory().len(), 5);
        let ids: Vec<String> = agent.memory().snapshot()[2..4]
            .iter()
            .map(|m| m.content[0].as_tool_response().unwrap().id.clone())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_request_answered_by_id() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_tool_request(
                    "call_1",
                    Err(AgentError::InvalidParameters("bad json".to_string())),
                ),
                Message::assistant().with_text("Let me retry with valid arguments."),
            ],
            false,
        );

        let answer = agent.run("Scan the project").await?;
        assert_eq!(answer, "Let me retry with valid arguments.");

        let response = agent.memory().snapshot()[2].content[0]
            .as_tool_response()
            .unwrap();
        assert_eq!(response.id, "call_1");
        assert!(matches!(
            response.tool_result,
            Err(AgentError::InvalidParameters(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_responses_hit_iteration_limit() {
        // The mock provider returns empty turns once exhausted, which decode
        // as malformed
        let mut agent = agent_with(vec![], false).with_max_iterations(3);

        let result = agent.run("Scan the project").await;
        assert!(matches!(result, Err(AgentError::IterationLimit(3))));

        // goal + 3 * (malformed turn + corrective observation)
        assert_eq!(agent.memory().len(), 7);
        let correction = &agent.memory().snapshot()[2];
        assert_eq!(correction.role, Role::User);
        assert!(correction.text().contains("could not be interpreted"));
    }

    #[tokio::test]
    async fn test_single_malformed_response_recovers() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant(), // empty turn, malformed
                Message::assistant().with_text("Recovered."),
            ],
            false,
        );

        let answer = agent.run("Scan the project").await?;
        assert_eq!(answer, "Recovered.");
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_error_is_fatal() {
        let registry = ToolRegistry::new(vec![Box::new(ScannerCapability::new(false))]).unwrap();
        let mut agent = Agent::new(Box::new(FailingProvider), registry).unwrap();

        let result = agent.run("Scan the project").await;
        assert!(matches!(result, Err(AgentError::Provider(_))));

        // The goal is still on record for diagnosis
        assert_eq!(agent.memory().len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_dependency_goal_text() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_text("done"),
                Message::assistant().with_text("done"),
            ],
            false,
        );

        agent.upgrade_dependency("left-pad", None).await?;
        assert_eq!(
            agent.memory().snapshot()[0].text(),
            "Upgrade the dependency left-pad"
        );

        agent.upgrade_dependency("left-pad", Some("2.0.0")).await?;
        assert_eq!(
            agent.memory().snapshot()[2].text(),
            "Upgrade the dependency left-pad to version 2.0.0"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_goals() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_text("done"),
                Message::assistant().with_text("done"),
            ],
            false,
        );

        agent.scan_and_upgrade_all().await?;
        let goal = agent.memory().snapshot()[0].text();
        assert!(goal.contains("scan the project for dependencies"));
        assert!(goal.contains("pull request"));

        agent.scan_and_find_upgrade_candidates().await?;
        let goal = agent.memory().snapshot()[2].text();
        assert!(goal.contains("without making any changes"));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_tests_goal_text() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_text("done"),
                Message::assistant().with_text("done"),
            ],
            false,
        );

        agent
            .generate_tests_for_file("src/pad.py", None, None)
            .await?;
        assert_eq!(
            agent.memory().snapshot()[0].text(),
            "Generate tests for the file src/pad.py"
        );

        agent
            .generate_tests_for_file("src/pad.py", Some("pytest"), Some("tests/test_pad.py"))
            .await?;
        assert_eq!(
            agent.memory().snapshot()[2].text(),
            "Generate tests for the file src/pad.py using the pytest framework \
             and save them to tests/test_pad.py"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_run_tests_goal_text() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_text("done"),
                Message::assistant().with_text("done"),
            ],
            false,
        );

        agent.run_tests(&[]).await?;
        assert_eq!(
            agent.memory().snapshot()[0].text(),
            "Run all tests for the project"
        );

        agent.run_tests(&["tests/test_pad.py", "tests/test_cli.py"]).await?;
        assert_eq!(
            agent.memory().snapshot()[2].text(),
            "Run the following test files: tests/test_pad.py, tests/test_cli.py"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_test_agent_uses_test_prompt() -> AgentResult<()> {
        let registry = ToolRegistry::new(vec![Box::new(ScannerCapability::new(false))])?;
        let agent = Agent::new_test_agent(Box::new(MockProvider::new(vec![])), registry)?;
        assert!(agent.system_prompt.contains("expert test engineer"));
        assert!(agent.system_prompt.contains("dependency_scanner"));
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_persists_across_runs() -> AgentResult<()> {
        let mut agent = agent_with(
            vec![
                Message::assistant().with_text("first answer"),
                Message::assistant().with_text("second answer"),
            ],
            false,
        );

        agent.run("first goal").await?;
        let len_after_first = agent.memory().len();

        agent.run("second goal").await?;
        assert!(agent.memory().len() > len_after_first);

        // Earlier exchange still present and in order
        let snapshot = agent.memory().snapshot();
        assert_eq!(snapshot[0].text(), "first goal");
        assert_eq!(snapshot[1].text(), "first answer");
        assert_eq!(snapshot[2].text(), "second goal");
        assert_eq!(snapshot[3].text(), "second answer");
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_index_without_index_fails() {
        let agent = agent_with(vec![], false);
        let result = agent.initialize_index(false).await;
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }
}
