//! Tool contracts for the external collaborators the agent drives.
//!
//! The upgrade capabilities (scanning, code edits, git, builds, test
//! generation) are separate programs with their own semantics; this module
//! only fixes the names, descriptions and input schemas they are reached
//! through. The one capability implemented in-crate is `code_search`, backed
//! by the retrieval index.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{AgentError, AgentResult};
use crate::index::CodeIndex;
use crate::models::tool::Tool;
use crate::registry::Capability;

pub fn dependency_scanner_spec() -> Tool {
    Tool::new(
        "dependency_scanner",
        "Scans a project for dependencies and identifies upgrade candidates",
        json!({
            "type": "object",
            "properties": {
                "project_path": {
                    "type": "string",
                    "description": "Path to the project directory"
                }
            }
        }),
    )
}

pub fn code_analysis_spec() -> Tool {
    Tool::new(
        "code_analysis",
        "Analyzes and modifies code files, searches codebase for relevant code",
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "Operation to perform: analyze_file, modify_file, search_code, or get_file"
                },
                "file_path": {
                    "type": "string",
                    "description": "Path to the file relative to project root"
                },
                "query": {
                    "type": "string",
                    "description": "Query for searching code"
                },
                "new_content": {
                    "type": "string",
                    "description": "New content for file modification"
                },
                "n_results": {
                    "type": "integer",
                    "description": "Number of results to return for search operation"
                }
            },
            "required": ["operation"]
        }),
    )
}

pub fn git_operations_spec() -> Tool {
    Tool::new(
        "git_operations",
        "Performs Git operations like creating branches, committing changes, pushing to remote, and creating pull requests",
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "Git operation to perform: create_branch, commit, push, or create_pr"
                },
                "branch_name": {
                    "type": "string",
                    "description": "Branch name for create_branch, push, or create_pr"
                },
                "commit_message": {
                    "type": "string",
                    "description": "Commit message for commit operation"
                },
                "pr_title": {
                    "type": "string",
                    "description": "Pull request title for create_pr operation"
                },
                "pr_description": {
                    "type": "string",
                    "description": "Pull request description for create_pr operation"
                },
                "files": {
                    "type": "array",
                    "description": "List of files to add for commit operation"
                },
                "base_branch": {
                    "type": "string",
                    "description": "Base branch for create_pr operation"
                }
            },
            "required": ["operation"]
        }),
    )
}

pub fn compilation_spec() -> Tool {
    Tool::new(
        "compilation",
        "Compiles the project and runs tests",
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "Operation to perform: compile or test"
                },
                "test_files": {
                    "type": "array",
                    "description": "List of test files to run"
                },
                "test_command": {
                    "type": "string",
                    "description": "Custom test command to run"
                },
                "build_command": {
                    "type": "string",
                    "description": "Custom build command to run"
                }
            },
            "required": ["operation"]
        }),
    )
}

pub fn test_generator_spec() -> Tool {
    Tool::new(
        "test_generator",
        "Generates test cases for code files",
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to generate tests for"
                },
                "test_framework": {
                    "type": "string",
                    "description": "Test framework to use (e.g., pytest, junit)"
                },
                "output_path": {
                    "type": "string",
                    "description": "Path to save the generated tests"
                }
            },
            "required": ["file_path"]
        }),
    )
}

/// Retrieves relevant code snippets from the project index
pub struct CodeSearchCapability {
    spec: Tool,
    index: Arc<RwLock<CodeIndex>>,
}

impl CodeSearchCapability {
    pub fn new(index: Arc<RwLock<CodeIndex>>) -> Self {
        Self {
            spec: Tool::new(
                "code_search",
                "Searches the indexed project source for code relevant to a query",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Natural language description of the code to find"
                        },
                        "n_results": {
                            "type": "integer",
                            "description": "Number of snippets to return"
                        }
                    },
                    "required": ["query"]
                }),
            ),
            index,
        }
    }
}

#[async_trait]
impl Capability for CodeSearchCapability {
    fn spec(&self) -> &Tool {
        &self.spec
    }

    async fn call(&self, arguments: Value) -> AgentResult<Value> {
        let query = arguments
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| AgentError::InvalidParameters("query is required".to_string()))?;
        let n_results = arguments
            .get("n_results")
            .and_then(|n| n.as_u64())
            .unwrap_or(5) as usize;

        let mut index = self.index.write().await;
        index
            .ensure_built(false)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        let results = index
            .search(query, n_results)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        Ok(json!(results
            .into_iter()
            .map(|(snippet, score)| {
                json!({
                    "source": snippet.source,
                    "content": snippet.text,
                    "score": score,
                })
            })
            .collect::<Vec<_>>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Embedder;
    use anyhow::Result;
    use std::collections::HashSet;
    use std::fs;

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn test_spec_names_are_unique() {
        let specs = [
            dependency_scanner_spec(),
            code_analysis_spec(),
            git_operations_spec(),
            compilation_spec(),
            test_generator_spec(),
        ];
        let names: HashSet<&str> = specs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn test_specs_declare_required_operations() {
        for spec in [code_analysis_spec(), git_operations_spec(), compilation_spec()] {
            let required = spec.input_schema["required"].as_array().unwrap();
            assert!(required.contains(&json!("operation")), "{}", spec.name);
        }
        let required = test_generator_spec().input_schema["required"]
            .as_array()
            .unwrap()
            .clone();
        assert!(required.contains(&json!("file_path")));
    }

    #[tokio::test]
    async fn test_code_search_builds_lazily_and_returns_snippets() -> AgentResult<()> {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print('hello')\n").unwrap();

        let index = Arc::new(RwLock::new(CodeIndex::new(
            dir.path().to_path_buf(),
            Box::new(FlatEmbedder),
        )));
        let capability = CodeSearchCapability::new(index.clone());

        let result = capability
            .call(json!({"query": "entry point", "n_results": 3}))
            .await?;

        let results = result.as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["source"], "main.py");
        assert!(index.read().await.is_built());
        Ok(())
    }

    #[tokio::test]
    async fn test_code_search_requires_query() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(RwLock::new(CodeIndex::new(
            dir.path().to_path_buf(),
            Box::new(FlatEmbedder),
        )));
        let capability = CodeSearchCapability::new(index);

        let result = capability.call(json!({})).await;
        assert!(matches!(result, Err(AgentError::InvalidParameters(_))));
    }
}
