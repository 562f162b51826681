//! Vision model client.
//!
//! [`GeminiClient`] talks to the Gemini `generateContent` endpoint and
//! implements the three model-backed collaborators:
//!
//! | Trait | Request |
//! |-------|---------|
//! | [`Describer`] | one image, free-text keyword caption |
//! | [`RiskAnalyzer`] | query + candidate image, JSON constrained by [`risk_schema`] |
//! | [`SuggestionRefiner`] | text only, returns a generation prompt |
//!
//! Images travel as base64 `inline_data` parts. Transient HTTP failures are
//! retried with backoff; a risk response that is not valid JSON, lacks
//! `scores`, or has an out-of-range score becomes
//! [`GuardError::AnalysisService`].
//!
//! [`create_collaborators`] wires the client and the configured embedder
//! into a [`Collaborators`] set. With `model.provider = "disabled"` every
//! model call fails, which leaves corpus items `failed` and runs empty.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use image_guard_core::collaborators::{
    Collaborators, Describer, RiskAnalyzer, SuggestionRefiner,
};
use image_guard_core::models::{AnalysisResult, Breakdown, Evidence, ImagePayload, Scores};
use image_guard_core::GuardError;
use serde::Deserialize;

use crate::config::{Config, ModelConfig};
use crate::embedding::create_embedder;
use crate::retry::send_json_with_retry;

const DESCRIBE_PROMPT: &str = "Generate a dense list of visual keywords and a one-sentence \
summary for this image. Include subject, main colors, art style, composition, and key objects. \
Do not use filler words. Format: 'Subject: ... | Style: ... | Keywords: ...'";

fn risk_prompt(fingerprint_match: bool) -> String {
    let fingerprint_line = if fingerprint_match {
        "MATCH (perceptual hash distance <= 8; almost certainly the same image or a light edit)"
    } else {
        "NO MATCH (no direct pixel copy detected)"
    };
    format!(
        "Role: you are a strict copyright forensics examiner for AI-generated imagery.\n\
Task: compare image A (the image under review, first) with image B (a reference image, \
second) and assess the infringement risk.\n\
\n\
Pixel fingerprint check: {fingerprint_line}\n\
\n\
Scoring rules:\n\
1. If the fingerprint check is MATCH, ignore compression noise and small color shifts. \
The total score must be at least 90, semantic and structure must be at their maximum, \
and analysisText must state that pixel-level copying or near-identity was detected.\n\
2. Otherwise perform a visual forensic comparison. Only score above 60 when composition, \
subject, and style all agree. Similar style with different content scores below 30. \
Similar content with a different composition and style scores 30 to 50.\n\
\n\
Dimensions (total 100):\n\
- semantic (max 40): shared narrative, shared subject features.\n\
- structure (max 40): composition, viewpoint, object placement, lighting, brushwork, palette.\n\
- compliance (max 20): signs of image-to-image derivation or lifted details.\n\
\n\
Return the JSON report. Evidence entries must name concrete visual details."
    )
}

fn refine_prompt(suggestion: &str) -> String {
    format!(
        "Task: turn the following copyright-risk remediation advice into an image generation \
prompt for tools such as Midjourney.\n\
\n\
Advice: {suggestion}\n\
\n\
Requirements:\n\
1. Label the sections [Subject], [Environment], [Style], and [Composition].\n\
2. The prompt must produce a high-quality image while avoiding the reference's protected \
expression, for example by changing viewpoint, lighting, or palette.\n\
3. Output only the prompt text."
    )
}

/// JSON schema the risk analysis response must follow.
pub fn risk_schema() -> serde_json::Value {
    let dimension = serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "NUMBER" },
            "comment": { "type": "STRING" }
        },
        "required": ["score", "comment"]
    });
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "scores": {
                "type": "OBJECT",
                "properties": {
                    "semantic": { "type": "NUMBER", "description": "0-40: overlap in subject, meaning, and narrative." },
                    "structure": { "type": "NUMBER", "description": "0-40: overlap in composition, color, lighting, and style." },
                    "compliance": { "type": "NUMBER", "description": "0-20: likelihood of a direct copy or derivative work." },
                    "total": { "type": "NUMBER", "description": "0-100 overall risk." }
                },
                "required": ["semantic", "structure", "compliance", "total"]
            },
            "evidence": {
                "type": "OBJECT",
                "properties": {
                    "similarities": { "type": "ARRAY", "items": { "type": "STRING" } },
                    "differences": { "type": "ARRAY", "items": { "type": "STRING" } }
                },
                "required": ["similarities", "differences"]
            },
            "analysisText": { "type": "STRING", "description": "Forensic summary of the risk level." },
            "breakdown": {
                "type": "OBJECT",
                "properties": {
                    "style": dimension,
                    "composition": dimension,
                    "elements": dimension,
                    "font": dimension
                },
                "required": ["style", "composition", "elements", "font"]
            },
            "modificationSuggestion": { "type": "STRING", "description": "Advice to reduce similarity; omit when risk is low." }
        },
        "required": ["scores", "evidence", "analysisText", "breakdown"]
    })
}

/// Risk analysis response body. Only `scores` is mandatory.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskPayload {
    scores: Scores,
    #[serde(default)]
    evidence: Evidence,
    #[serde(default)]
    analysis_text: Option<String>,
    #[serde(default)]
    breakdown: Breakdown,
    #[serde(default)]
    modification_suggestion: Option<String>,
}

/// Decode a risk analysis response into a result for `reference_id`.
pub fn parse_risk_response(
    text: &str,
    reference_id: &str,
    fingerprint_match: bool,
) -> image_guard_core::Result<AnalysisResult> {
    let payload: RiskPayload = serde_json::from_str(text.trim()).map_err(|e| {
        GuardError::AnalysisService(format!("malformed risk response: {}", e))
    })?;
    payload.scores.validate()?;

    Ok(AnalysisResult {
        reference_id: reference_id.to_string(),
        is_match: payload.scores.total > 0.0,
        scores: payload.scores,
        evidence: payload.evidence,
        analysis_text: payload
            .analysis_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Analysis complete".to_string()),
        breakdown: payload.breakdown,
        modification_suggestion: payload
            .modification_suggestion
            .filter(|s| !s.trim().is_empty()),
        fingerprint_match,
    })
}

/// Concatenate the text parts of the first candidate.
fn response_text(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidates"))?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect())
}

fn inline_part(image: &ImagePayload) -> serde_json::Value {
    serde_json::json!({
        "inline_data": {
            "mime_type": image.mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
        }
    })
}

pub struct GeminiClient {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

impl GeminiClient {
    /// Requires the API key in the environment variable named by
    /// `model.api_key_env`.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.vision_model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn generate(
        &self,
        parts: Vec<serde_json::Value>,
        generation_config: serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        });

        let json = send_json_with_retry("Gemini generateContent", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        response_text(&json)
    }
}

#[async_trait]
impl Describer for GeminiClient {
    async fn describe(&self, image: &ImagePayload) -> image_guard_core::Result<String> {
        let parts = vec![serde_json::json!({ "text": DESCRIBE_PROMPT }), inline_part(image)];
        let text = self
            .generate(parts, serde_json::json!({ "temperature": self.temperature }))
            .await
            .map_err(|e| GuardError::Indexing(format!("{:#}", e)))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl RiskAnalyzer for GeminiClient {
    async fn analyze_risk(
        &self,
        query: &ImagePayload,
        candidate: &ImagePayload,
        fingerprint_match: bool,
    ) -> image_guard_core::Result<AnalysisResult> {
        let parts = vec![
            serde_json::json!({ "text": risk_prompt(fingerprint_match) }),
            inline_part(query),
            inline_part(candidate),
        ];
        let generation_config = serde_json::json!({
            "responseMimeType": "application/json",
            "responseSchema": risk_schema(),
            "temperature": self.temperature,
        });
        let text = self
            .generate(parts, generation_config)
            .await
            .map_err(|e| GuardError::AnalysisService(format!("{:#}", e)))?;
        parse_risk_response(&text, &candidate.id, fingerprint_match)
    }
}

#[async_trait]
impl SuggestionRefiner for GeminiClient {
    async fn refine(&self, suggestion: &str) -> image_guard_core::Result<String> {
        let parts = vec![serde_json::json!({ "text": refine_prompt(suggestion) })];
        let text = self
            .generate(parts, serde_json::json!({ "temperature": self.temperature }))
            .await
            .map_err(|e| GuardError::AnalysisService(format!("{:#}", e)))?;
        Ok(text.trim().to_string())
    }
}

/// Stand-in used when `model.provider = "disabled"`.
pub struct DisabledModel;

const DISABLED: &str = "Vision model provider is disabled";

#[async_trait]
impl Describer for DisabledModel {
    async fn describe(&self, _image: &ImagePayload) -> image_guard_core::Result<String> {
        Err(GuardError::Indexing(DISABLED.to_string()))
    }
}

#[async_trait]
impl RiskAnalyzer for DisabledModel {
    async fn analyze_risk(
        &self,
        _query: &ImagePayload,
        _candidate: &ImagePayload,
        _fingerprint_match: bool,
    ) -> image_guard_core::Result<AnalysisResult> {
        Err(GuardError::AnalysisService(DISABLED.to_string()))
    }
}

#[async_trait]
impl SuggestionRefiner for DisabledModel {
    async fn refine(&self, _suggestion: &str) -> image_guard_core::Result<String> {
        Err(GuardError::AnalysisService(DISABLED.to_string()))
    }
}

/// Build the collaborator set described by `config`.
pub fn create_collaborators(config: &Config) -> Result<Collaborators> {
    let embedder = create_embedder(&config.embedding)?;

    match config.model.provider.as_str() {
        "gemini" => {
            let client = Arc::new(GeminiClient::new(&config.model)?);
            Ok(Collaborators {
                describer: client.clone(),
                embedder,
                analyzer: client.clone(),
                refiner: client,
            })
        }
        "disabled" => {
            let model = Arc::new(DisabledModel);
            Ok(Collaborators {
                describer: model.clone(),
                embedder,
                analyzer: model.clone(),
                refiner: model,
            })
        }
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}
