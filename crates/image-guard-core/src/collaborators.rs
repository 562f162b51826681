//! Interfaces to the external models the pipeline depends on.
//!
//! The pipeline never looks inside these collaborators. Captioning,
//! embedding, risk scoring, and suggestion refinement are reached only
//! through the traits below; the `image-guard` app crate provides HTTP
//! implementations and tests provide stubs.
//!
//! # Failure Semantics
//!
//! | Call | On error the pipeline… |
//! |------|------------------------|
//! | [`Describer::describe`] | marks the corpus item `failed` |
//! | [`Embedder::embed`] | marks the item `failed`, or falls back to a full scan for the query |
//! | [`RiskAnalyzer::analyze_risk`] | substitutes a zero-score result (filtered out) |
//! | [`SuggestionRefiner::refine`] | leaves the refined text empty |

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AnalysisResult, ImagePayload};

/// Produces a keyword-dense caption for an image.
#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, image: &ImagePayload) -> Result<String>;
}

/// Embeds caption text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-004"`).
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scores copyright risk between the query and one candidate.
///
/// `fingerprint_match` tells the analyzer that the two images are
/// near-identical at the pixel level. Implementations must return a result
/// whose `reference_id` is `candidate.id` and whose scores respect their
/// bounds, or fail with [`GuardError::AnalysisService`](crate::GuardError::AnalysisService).
#[async_trait]
pub trait RiskAnalyzer: Send + Sync {
    async fn analyze_risk(
        &self,
        query: &ImagePayload,
        candidate: &ImagePayload,
        fingerprint_match: bool,
    ) -> Result<AnalysisResult>;
}

/// Rewrites a remediation suggestion into a ready-to-use generation prompt.
#[async_trait]
pub trait SuggestionRefiner: Send + Sync {
    async fn refine(&self, suggestion: &str) -> Result<String>;
}

/// The full set of collaborators a screening session needs.
#[derive(Clone)]
pub struct Collaborators {
    pub describer: Arc<dyn Describer>,
    pub embedder: Arc<dyn Embedder>,
    pub analyzer: Arc<dyn RiskAnalyzer>,
    pub refiner: Arc<dyn SuggestionRefiner>,
}
