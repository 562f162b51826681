//! Configuration parsing and validation.
//!
//! Image Guard is configured with a TOML file (default
//! `./config/guard.toml`). Every section is optional and falls back to the
//! defaults below; [`Config::minimal`] builds the same defaults without a
//! file.
//!
//! ```toml
//! [indexer]
//! interval_ms = 1000
//!
//! [retrieval]
//! full_scan_limit = 20
//! top_k = 10
//! match_threshold = 8
//!
//! [analysis]
//! batch_size = 3
//! timeout_secs = 20
//!
//! [history]
//! capacity = 10
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [model]
//! provider = "gemini"
//! api_key_env = "GEMINI_API_KEY"
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! dims = 768
//!
//! [corpus]
//! root = "./reference"
//! include_globs = ["**/*.png", "**/*.jpg", "**/*.jpeg"]
//! ```

use anyhow::{bail, Context, Result};
use image_guard_core::selection::SelectionParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub corpus: Option<CorpusConfig>,
}

impl Config {
    /// Defaults for every section, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl IndexerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_full_scan_limit")]
    pub full_scan_limit: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            full_scan_limit: default_full_scan_limit(),
            top_k: default_top_k(),
            match_threshold: default_match_threshold(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> SelectionParams {
        SelectionParams {
            full_scan_limit: self.full_scan_limit,
            top_k: self.top_k,
            match_threshold: self.match_threshold,
        }
    }
}

fn default_full_scan_limit() -> usize {
    20
}
fn default_top_k() -> usize {
    10
}
fn default_match_threshold() -> u32 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: default_analysis_batch_size(),
            timeout_secs: default_analysis_timeout_secs(),
        }
    }
}

fn default_analysis_batch_size() -> usize {
    3
}
fn default_analysis_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    10
}

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
    "127.0.0.1:7341".to_string()
}

/// Vision model used for captions, risk analysis, and suggestion refinement.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            api_key_env: default_api_key_env(),
            vision_model: default_vision_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_model_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_vision_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, Gemini endpoint).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key, when the provider needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: None,
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

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

/// Directory the corpus is seeded from at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl CorpusConfig {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

pub fn default_include_globs() -> Vec<String> {
    ["png", "jpg", "jpeg", "PNG", "JPG", "JPEG"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.indexer.interval_ms == 0 {
        bail!("indexer.interval_ms must be > 0");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.match_threshold > 64 {
        bail!("retrieval.match_threshold must be <= 64");
    }

    if config.analysis.batch_size == 0 {
        bail!("analysis.batch_size must be >= 1");
    }
    if config.analysis.timeout_secs == 0 {
        bail!("analysis.timeout_secs must be > 0");
    }

    if config.history.capacity == 0 {
        bail!("history.capacity must be >= 1");
    }

    match config.model.provider.as_str() {
        "disabled" | "gemini" => {}
        other => bail!(
            "Unknown model provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.provider == "openai" {
        if config.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'openai'");
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is 'openai'");
        }
    }

    Ok(())
}
