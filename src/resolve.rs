//! Image reference resolution.
//!
//! Turns an [`ImageRef`] into bytes plus a MIME type. Inline images resolve
//! immediately, local files are read from disk, and remote URLs are fetched
//! over HTTP. A failed resolution surfaces as
//! [`GuardError::CandidateFetch`]; the orchestrator drops that candidate and
//! the indexer leaves the item's fingerprint absent.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::Engine;
use image_guard_core::models::{ImagePayload, ImageRef};
use image_guard_core::{GuardError, Result};

/// MIME type assumed when nothing better is known.
pub const DEFAULT_MIME: &str = "image/jpeg";

/// Resolves image references to their bytes.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, id: &str, image: &ImageRef) -> Result<ImagePayload>;
}

/// Default resolver: inline bytes, local files, and HTTP(S) URLs.
pub struct HttpResolver {
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<(String, Vec<u8>)> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| mime_from_path(Path::new(url)).to_string());
        let bytes = response.bytes().await?;
        Ok((mime, bytes.to_vec()))
    }
}

#[async_trait]
impl ImageResolver for HttpResolver {
    async fn resolve(&self, id: &str, image: &ImageRef) -> Result<ImagePayload> {
        let fetch_error = |e: anyhow::Error| GuardError::CandidateFetch {
            id: id.to_string(),
            message: format!("{:#}", e),
        };

        match image {
            ImageRef::Inline { mime_type, bytes } => Ok(ImagePayload {
                id: id.to_string(),
                mime_type: mime_type.clone(),
                bytes: bytes.clone(),
            }),
            ImageRef::File { path } => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))
                    .map_err(fetch_error)?;
                Ok(ImagePayload {
                    id: id.to_string(),
                    mime_type: mime_from_path(path).to_string(),
                    bytes: Arc::from(bytes),
                })
            }
            ImageRef::Remote { url } => {
                let (mime_type, bytes) = self.fetch(url).await.map_err(fetch_error)?;
                Ok(ImagePayload {
                    id: id.to_string(),
                    mime_type,
                    bytes: Arc::from(bytes),
                })
            }
        }
    }
}

/// Guess an image MIME type from a file extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => DEFAULT_MIME,
    }
}

/// Parse a `data:<mime>;base64,<payload>` URL into an inline reference.
pub fn parse_data_url(url: &str) -> anyhow::Result<ImageRef> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow::anyhow!("not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("data URL has no payload"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow::anyhow!("only base64 data URLs are supported"))?;
    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("invalid base64 payload in data URL")?;
    if bytes.is_empty() {
        bail!("data URL payload is empty");
    }
    Ok(ImageRef::inline(mime, bytes))
}

/// Build a reference from a host-supplied string: a data URL, an HTTP(S)
/// URL, or a local path.
pub fn image_ref_from_str(source: &str) -> anyhow::Result<ImageRef> {
    if source.starts_with("data:") {
        parse_data_url(source)
    } else if source.starts_with("http://") || source.starts_with("https://") {
        Ok(ImageRef::Remote {
            url: source.to_string(),
        })
    } else {
        Ok(ImageRef::File {
            path: source.into(),
        })
    }
}
