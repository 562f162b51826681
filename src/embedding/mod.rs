//! Caption embedding providers.
//!
//! Every provider implements the core [`Embedder`] trait:
//! - **[`DisabledEmbedder`]**: always fails; the indexer marks items
//!   `failed` and runs fall back to a full corpus scan.
//! - **[`GeminiEmbedder`]**: `models/{model}:embedContent` on the Gemini API.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//! - **`LocalEmbedder`**: fastembed, behind the `local-embeddings` feature.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use image_guard::config::EmbeddingConfig;
//! # use image_guard::embedding::create_embedder;
//! # use image_guard_core::collaborators::Embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! HTTP providers retry transient failures through
//! [`send_json_with_retry`](crate::retry::send_json_with_retry).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use image_guard_core::collaborators::Embedder;
use image_guard_core::GuardError;

use crate::config::EmbeddingConfig;
use crate::retry::send_json_with_retry;

const GEMINI_DEFAULT_MODEL: &str = "text-embedding-004";
const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

fn embed_error(e: anyhow::Error) -> GuardError {
    GuardError::Indexing(format!("{:#}", e))
}

/// Reject vectors whose length disagrees with the configured `dims`.
fn check_dims(vector: Vec<f32>, expected: Option<usize>) -> Result<Vec<f32>> {
    if vector.is_empty() {
        bail!("Embedding response was empty");
    }
    match expected {
        Some(dims) if dims != vector.len() => bail!(
            "Embedding has {} dimensions, expected {}",
            vector.len(),
            dims
        ),
        _ => Ok(vector),
    }
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn api_key(env_name: &str) -> Result<String> {
    std::env::var(env_name).map_err(|_| anyhow::anyhow!("{} environment variable not set", env_name))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ Disabled ============

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> image_guard_core::Result<Vec<f32>> {
        Err(GuardError::Indexing(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Gemini ============

pub struct GeminiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let env_name = config.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY");
        Ok(Self {
            client: http_client(config)?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            dims: config.dims,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_URL.to_string()),
            api_key: api_key(env_name)?,
            max_retries: config.max_retries,
        })
    }

    async fn call(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);
        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
        });

        let json = send_json_with_retry("Gemini embedContent", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        check_dims(parse_gemini_response(&json)?, self.dims)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> image_guard_core::Result<Vec<f32>> {
        self.call(text).await.map_err(embed_error)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .pointer("/embedding/values")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embedding.values"))?;
    Ok(json_to_vec(values))
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIEmbedder {
    /// Requires `model` and `dims` in config and the API key in the
    /// environment (`OPENAI_API_KEY` unless `api_key_env` says otherwise).
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let env_name = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");

        Ok(Self {
            client: http_client(config)?,
            model,
            dims,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key: api_key(env_name)?,
            max_retries: config.max_retries,
        })
    }

    async fn call(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let json = send_json_with_retry("OpenAI API", self.max_retries, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;

        check_dims(parse_openai_response(&json)?, Some(self.dims))
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> image_guard_core::Result<Vec<f32>> {
        self.call(text).await.map_err(embed_error)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .pointer("/data/0/embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
    Ok(json_to_vec(values))
}

// ============ Ollama ============

/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        Ok(Self {
            client: http_client(config)?,
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn call(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let json = send_json_with_retry("Ollama API", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await
        .map_err(|e| anyhow::anyhow!("{:#} (is Ollama running at {}?)", e, self.url))?;

        check_dims(parse_ollama_response(&json)?, self.dims)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> image_guard_core::Result<Vec<f32>> {
        self.call(text).await.map_err(embed_error)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .pointer("/embeddings/0")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;
    Ok(json_to_vec(values))
}

// ============ Local (fastembed) ============

/// Runs a sentence-embedding model in-process.
///
/// The model is downloaded from Hugging Face on first use and kept loaded
/// for the lifetime of the embedder.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    async fn call(&self, text: &str) -> Result<Vec<f32>> {
        let loaded = self.loaded.clone();
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            if guard.is_none() {
                let init = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(init);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Local embedding model not loaded"))?;
            let mut vectors = embedder
                .embed(vec![text], None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;
            vectors
                .pop()
                .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, text: &str) -> image_guard_core::Result<Vec<f32>> {
        self.call(text).await.map_err(embed_error)
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

/// Create the embedder named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"gemini"` | [`GeminiEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires `--features local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
