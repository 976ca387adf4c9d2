//! Searchable embedding of the project source.
//!
//! The index is a derived, rebuildable artifact: it is built lazily from the
//! current project tree, reused until a caller forces a refresh, and never
//! invalidated automatically. The agent loop only reaches it through the
//! `code_search` tool.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

const CHUNK_SIZE: usize = 2000;
const CHUNK_OVERLAP: usize = 200;
const EMBED_BATCH_SIZE: usize = 64;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "java", "js", "ts", "jsx", "tsx", "html", "css", "c", "cpp", "h", "hpp", "cs", "go",
    "rs", "rb", "php", "scala", "kt", "groovy", "sh", "bash", "yml", "yaml", "json", "xml", "md",
    "txt", "gradle", "properties", "toml",
];

const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    ".git",
    ".idea",
    ".vscode",
    "target",
    "build",
    "dist",
];

/// Produces vector embeddings for text chunks
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embedder backed by the OpenAI embeddings endpoint
pub struct OpenAiEmbedder {
    client: Client,
    host: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(host: String, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            client,
            host,
            api_key,
            model: "text-embedding-3-small".to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({"model": self.model, "input": texts}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Embedding request failed: {}", response.status()));
        }

        let body: Value = response.json().await?;
        let data = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow!("Malformed embeddings response"))?;

        data.iter()
            .map(|entry| {
                entry
                    .get("embedding")
                    .and_then(|e| e.as_array())
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .ok_or_else(|| anyhow!("Malformed embeddings response"))
            })
            .collect()
    }
}

/// A retrieved piece of source code
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    /// Path of the source file, relative to the project root
    pub source: String,
    pub text: String,
}

struct IndexedChunk {
    snippet: Snippet,
    embedding: Vec<f32>,
}

/// In-memory embedding index over the project's code files
pub struct CodeIndex {
    project_path: PathBuf,
    embedder: Box<dyn Embedder>,
    chunks: Option<Vec<IndexedChunk>>,
}

impl CodeIndex {
    pub fn new<P: Into<PathBuf>>(project_path: P, embedder: Box<dyn Embedder>) -> Self {
        Self {
            project_path: project_path.into(),
            embedder,
            chunks: None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.chunks.is_some()
    }

    /// Build the index from the current project snapshot, or reuse the
    /// existing one unless `force_refresh` is set
    pub async fn ensure_built(&mut self, force_refresh: bool) -> Result<()> {
        if self.chunks.is_some() && !force_refresh {
            return Ok(());
        }

        info!(path = %self.project_path.display(), "building code index");
        let files = collect_code_files(&self.project_path);
        info!(count = files.len(), "found code files");

        let mut snippets = Vec::new();
        for file in &files {
            let content = match std::fs::read_to_string(file) {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %file.display(), "could not load file: {}", e);
                    continue;
                }
            };
            let source = file
                .strip_prefix(&self.project_path)
                .unwrap_or(file)
                .to_string_lossy()
                .to_string();
            for chunk in chunk_text(&content, CHUNK_SIZE, CHUNK_OVERLAP) {
                snippets.push(Snippet {
                    source: source.clone(),
                    text: chunk,
                });
            }
        }

        let mut chunks = Vec::with_capacity(snippets.len());
        for batch in snippets.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(anyhow!(
                    "Embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    batch.len()
                ));
            }
            for (snippet, embedding) in batch.iter().cloned().zip(embeddings) {
                chunks.push(IndexedChunk { snippet, embedding });
            }
        }

        info!(chunks = chunks.len(), "code index built");
        self.chunks = Some(chunks);
        Ok(())
    }

    /// Return the `n_results` most relevant snippets for the query, best first
    pub async fn search(&self, query: &str, n_results: usize) -> Result<Vec<(Snippet, f32)>> {
        let chunks = self
            .chunks
            .as_ref()
            .ok_or_else(|| anyhow!("Index has not been built"))?;

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Embedder returned no vector for the query"))?;

        let mut scored: Vec<(Snippet, f32)> = chunks
            .iter()
            .map(|chunk| {
                (
                    chunk.snippet.clone(),
                    cosine_similarity(&query_embedding, &chunk.embedding),
                )
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);
        Ok(scored)
    }
}

fn collect_code_files(project_path: &Path) -> Vec<PathBuf> {
    WalkDir::new(project_path)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !IGNORED_DIRS.contains(&name))
                .unwrap_or(true)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| CODE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
