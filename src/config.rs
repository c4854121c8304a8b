//! TOML configuration.
//!
//! Every section has serde defaults, so an empty file is a valid config that
//! indexes `./docs` into `./document_index` with embeddings disabled.
//!
//! ```toml
//! [docs]
//! root = "docs"
//!
//! [index]
//! path = "document_index"
//! checksums_path = "checksums.json"
//!
//! [chunking]
//! max_chunk_size = 4000
//! overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! API keys are never read from the file: `OPENAI_API_KEY` and
//! `AZURE_OPENAI_API_KEY` come from the environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docs_qa_core::chunk::ChunkSettings;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ Documents ============

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_docs_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            root: default_docs_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_docs_root() -> PathBuf {
    PathBuf::from("docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

// ============ Index ============

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `index.sqlite`.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_checksums_path")]
    pub checksums_path: PathBuf,
    /// Drop chunks of documents that no longer exist.
    #[serde(default = "default_true")]
    pub prune_removed: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            checksums_path: default_checksums_path(),
            prune_removed: true,
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("document_index")
}
fn default_checksums_path() -> PathBuf {
    PathBuf::from("checksums.json")
}
fn default_true() -> bool {
    true
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_true")]
    pub isolate_code: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
            isolate_code: true,
        }
    }
}

impl ChunkingConfig {
    pub fn settings(&self) -> ChunkSettings {
        ChunkSettings {
            max_chunk_size: self.max_chunk_size,
            overlap: self.overlap,
            isolate_code: self.isolate_code,
        }
    }
}

fn default_max_chunk_size() -> usize {
    docs_qa_core::chunk::DEFAULT_MAX_CHUNK_SIZE
}
fn default_overlap() -> usize {
    docs_qa_core::chunk::DEFAULT_OVERLAP
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, `azure`, `ollama`, or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL: Ollama server, or Azure resource endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Azure deployment name (defaults to `model`).
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            deployment: None,
            api_version: default_api_version(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_version() -> String {
    "2024-06-01".to_string()
}
fn default_batch_size() -> usize {
    docs_qa_core::index::DEFAULT_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ LLM ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled`, `openai`, or `azure`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Conversation messages kept as chat history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Overrides the built-in prompt. Must contain `{context}` and `{question}`.
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            deployment: None,
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_history: default_max_history(),
            prompt_template: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_history() -> usize {
    10
}
fn default_llm_timeout_secs() -> u64 {
    60
}

// ============ Server ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

// ============ Loading ============

/// Read and validate a config file.
///
/// Relative paths in the file are resolved against the working directory,
/// not the config file's directory.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.max_chunk_size ({})",
            config.chunking.overlap,
            config.chunking.max_chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate docs
    if config.docs.include_globs.is_empty() {
        anyhow::bail!("docs.include_globs must not be empty");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "azure" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, azure, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        let dims_missing = match config.embedding.dims {
            Some(dims) => dims == 0,
            // local models have known dims
            None => config.embedding.provider != "local",
        };
        if dims_missing {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() && config.embedding.provider != "local" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "azure" && config.embedding.url.is_none() {
            anyhow::bail!("embedding.url (Azure endpoint) is required when provider is 'azure'");
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }
    if config.llm.is_enabled() {
        if config.llm.model.is_none() && config.llm.deployment.is_none() {
            anyhow::bail!(
                "llm.model must be specified when provider is '{}'",
                config.llm.provider
            );
        }
        if config.llm.provider == "azure" && config.llm.url.is_none() {
            anyhow::bail!("llm.url (Azure endpoint) is required when provider is 'azure'");
        }
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if let Some(template) = &config.llm.prompt_template {
        if !template.contains("{context}") || !template.contains("{question}") {
            anyhow::bail!("llm.prompt_template must contain {{context}} and {{question}}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.docs.root, PathBuf::from("docs"));
        assert_eq!(config.index.path, PathBuf::from("document_index"));
        assert_eq!(config.index.checksums_path, PathBuf::from("checksums.json"));
        assert!(config.index.prune_removed);
        assert_eq!(config.chunking.max_chunk_size, 4000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
        assert_eq!(config.llm.max_history, 10);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn overlap_must_be_below_max() {
        let err = parse_config("[chunking]\nmax_chunk_size = 100\noverlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn enabled_embedding_requires_dims_and_model() {
        assert!(parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"\ndims = 8\n").is_err());
        assert!(
            parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n").is_ok()
        );
    }

    #[test]
    fn azure_requires_endpoint() {
        let toml = "[embedding]\nprovider = \"azure\"\nmodel = \"m\"\ndims = 8\n";
        assert!(parse_config(toml).is_err());
        let toml = format!("{}url = \"https://example.openai.azure.com\"\n", toml);
        assert!(parse_config(&toml).is_ok());
    }

    #[test]
    fn unknown_providers_are_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"faiss\"\n").is_err());
        assert!(parse_config("[llm]\nprovider = \"claude\"\n").is_err());
    }

    #[test]
    fn prompt_template_needs_placeholders() {
        assert!(parse_config("[llm]\nprompt_template = \"Answer: {question}\"\n").is_err());
        assert!(parse_config("[llm]\nprompt_template = \"{context}\\n{question}\"\n").is_ok());
    }

    #[test]
    fn chunk_settings_follow_config() {
        let config =
            parse_config("[chunking]\nmax_chunk_size = 500\noverlap = 50\nisolate_code = false\n")
                .unwrap();
        let settings = config.chunking.settings();
        assert_eq!(settings.max_chunk_size, 500);
        assert_eq!(settings.overlap, 50);
        assert!(!settings.isolate_code);
    }
}
