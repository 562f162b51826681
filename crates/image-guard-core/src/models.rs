//! Core data models shared by the indexer, selector, orchestrator, and hosts.
//!
//! These types carry no I/O. Image bytes are reference-counted so that
//! corpus snapshots taken for a run or an indexer tick stay cheap to clone.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GuardError, Result};
use crate::fingerprint::Fingerprint;

/// Where the pixels of an image come from.
///
/// Inline bytes are never serialized; hosts only see the kind and MIME type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Bytes held in memory (an upload or a decoded `data:` URL).
    Inline {
        mime_type: String,
        #[serde(skip_serializing)]
        bytes: Arc<[u8]>,
    },
    /// A file on the local filesystem.
    File { path: PathBuf },
    /// A remote image fetched over HTTP(S) when needed.
    Remote { url: String },
}

impl ImageRef {
    pub fn inline(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        ImageRef::Inline {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageRef::Remote { .. })
    }
}

/// Resolved image content handed to collaborators.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Identity of the corpus item or query this payload belongs to.
    pub id: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Progress of a corpus item through semantic indexing.
///
/// Transitions are forward-only: `Unset -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    #[default]
    Unset,
    Processing,
    Completed,
    Failed,
}

impl IndexingStatus {
    /// Validate and perform a transition.
    pub fn transition(self, to: IndexingStatus) -> Result<IndexingStatus> {
        use IndexingStatus::*;
        match (self, to) {
            (Unset, Processing) | (Processing, Completed) | (Processing, Failed) => Ok(to),
            (from, to) => Err(GuardError::InvalidTransition { from, to }),
        }
    }
}

/// A reference image in the corpus.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusItem {
    pub id: String,
    pub name: String,
    pub image: ImageRef,
    pub created_at: DateTime<Utc>,
    pub fingerprint: Option<Fingerprint>,
    /// Set once a fingerprint attempt failed so the indexer does not pick
    /// the same undecodable item on every tick.
    pub fingerprint_failed: bool,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub status: IndexingStatus,
}

impl CorpusItem {
    pub fn new(name: impl Into<String>, image: ImageRef) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            image,
            created_at: Utc::now(),
            fingerprint: None,
            fingerprint_failed: false,
            description: None,
            embedding: None,
            status: IndexingStatus::Unset,
        }
    }

    /// True when the indexer still has work to do for this item.
    pub fn needs_indexing(&self) -> bool {
        self.needs_fingerprint() || self.status == IndexingStatus::Unset
    }

    pub fn needs_fingerprint(&self) -> bool {
        self.fingerprint.is_none() && !self.fingerprint_failed
    }

    /// Record the outcome of a fingerprint attempt.
    pub fn with_fingerprint(mut self, outcome: Result<Fingerprint>) -> Self {
        match outcome {
            Ok(fp) => {
                self.fingerprint = Some(fp);
                self.fingerprint_failed = false;
            }
            Err(_) => self.fingerprint_failed = true,
        }
        self
    }

    /// Move from `Unset` to `Processing`.
    pub fn begin_indexing(mut self) -> Result<Self> {
        self.status = self.status.transition(IndexingStatus::Processing)?;
        Ok(self)
    }

    /// Move from `Processing` to `Completed` or `Failed`.
    ///
    /// An empty description or embedding counts as a failure.
    pub fn finish_indexing(mut self, outcome: Result<(String, Vec<f32>)>) -> Result<Self> {
        match outcome {
            Ok((description, embedding)) if !description.is_empty() && !embedding.is_empty() => {
                self.status = self.status.transition(IndexingStatus::Completed)?;
                self.description = Some(description);
                self.embedding = Some(embedding);
            }
            _ => {
                self.status = self.status.transition(IndexingStatus::Failed)?;
            }
        }
        Ok(self)
    }

    /// Reset a failed item so the indexer picks it up again.
    pub fn reset_for_reindex(mut self) -> Result<Self> {
        if self.status != IndexingStatus::Failed {
            return Err(GuardError::InvalidTransition {
                from: self.status,
                to: IndexingStatus::Unset,
            });
        }
        self.status = IndexingStatus::Unset;
        self.fingerprint_failed = false;
        self.description = None;
        self.embedding = None;
        Ok(self)
    }

    pub fn embedding_dims(&self) -> Option<usize> {
        self.embedding.as_ref().map(Vec::len)
    }
}

/// The image being screened. Replaced wholesale on each submission.
#[derive(Debug, Clone, Serialize)]
pub struct QueryImage {
    pub id: String,
    pub name: String,
    pub image: ImageRef,
    pub submitted_at: DateTime<Utc>,
    pub fingerprint: Option<Fingerprint>,
}

impl QueryImage {
    pub fn new(name: impl Into<String>, image: ImageRef, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            image,
            submitted_at: Utc::now(),
            fingerprint,
        }
    }
}

/// Score tuple reported by the risk analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Scores {
    /// Overlap in subject, meaning, and narrative. `[0, 40]`.
    pub semantic: f64,
    /// Overlap in composition, color, lighting, and style. `[0, 40]`.
    pub structure: f64,
    /// Likelihood of a direct copy or derivative work. `[0, 20]`.
    pub compliance: f64,
    /// Authoritative ranking key. `[0, 100]`.
    pub total: f64,
}

impl Scores {
    pub const SEMANTIC_MAX: f64 = 40.0;
    pub const STRUCTURE_MAX: f64 = 40.0;
    pub const COMPLIANCE_MAX: f64 = 20.0;
    pub const TOTAL_MAX: f64 = 100.0;

    /// Check every component against its bound.
    ///
    /// Components are not required to sum to `total`.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("semantic", self.semantic, Self::SEMANTIC_MAX),
            ("structure", self.structure, Self::STRUCTURE_MAX),
            ("compliance", self.compliance, Self::COMPLIANCE_MAX),
            ("total", self.total, Self::TOTAL_MAX),
        ];
        for (name, value, max) in checks {
            if !value.is_finite() || !(0.0..=max).contains(&value) {
                return Err(GuardError::AnalysisService(format!(
                    "score {} = {} outside [0, {}]",
                    name, value, max
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Evidence {
    pub similarities: Vec<String>,
    pub differences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DimensionScore {
    pub score: f64,
    pub comment: String,
}

/// Per-dimension commentary from the risk analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Breakdown {
    pub style: DimensionScore,
    pub composition: DimensionScore,
    pub elements: DimensionScore,
    pub font: DimensionScore,
}

/// Outcome of one pairwise risk analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub reference_id: String,
    pub is_match: bool,
    pub scores: Scores,
    pub evidence: Evidence,
    pub analysis_text: String,
    pub breakdown: Breakdown,
    pub modification_suggestion: Option<String>,
    pub fingerprint_match: bool,
}

impl AnalysisResult {
    /// Substitute for a failed analysis. Filtered out before ranking.
    pub fn zero(reference_id: impl Into<String>, fingerprint_match: bool) -> Self {
        Self {
            reference_id: reference_id.into(),
            is_match: false,
            scores: Scores::default(),
            evidence: Evidence::default(),
            analysis_text: String::new(),
            breakdown: Breakdown::default(),
            modification_suggestion: None,
            fingerprint_match,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Complete,
}

/// Observable state of the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunStatus {
    pub phase: RunPhase,
    /// Percentage in `[0, 100]`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl RunStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn running(progress: u8, step: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Running,
            progress: progress.min(100),
            step: Some(step.into()),
        }
    }

    pub fn complete() -> Self {
        Self {
            phase: RunPhase::Complete,
            progress: 100,
            step: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> CorpusItem {
        CorpusItem::new("ref.png", ImageRef::inline("image/png", vec![1u8, 2, 3]))
    }

    #[test]
    fn new_item_needs_indexing() {
        let it = item();
        assert_eq!(it.status, IndexingStatus::Unset);
        assert!(it.needs_indexing());
        assert!(it.needs_fingerprint());
    }

    #[test]
    fn status_transitions_are_forward_only() {
        use IndexingStatus::*;
        assert_eq!(Unset.transition(Processing).unwrap(), Processing);
        assert_eq!(Processing.transition(Completed).unwrap(), Completed);
        assert_eq!(Processing.transition(Failed).unwrap(), Failed);
        assert!(Unset.transition(Completed).is_err());
        assert!(Completed.transition(Processing).is_err());
        assert!(Failed.transition(Processing).is_err());
        assert!(Processing.transition(Processing).is_err());
    }

    #[test]
    fn failed_fingerprint_is_not_retried() {
        let it = item().with_fingerprint(Err(GuardError::Fingerprint("bad".into())));
        assert!(it.fingerprint.is_none());
        assert!(!it.needs_fingerprint());
        // Semantic indexing is still pending.
        assert!(it.needs_indexing());
    }

    #[test]
    fn finish_indexing_success_stores_embedding() {
        let it = item()
            .begin_indexing()
            .unwrap()
            .finish_indexing(Ok(("a dog".into(), vec![0.1, 0.2])))
            .unwrap();
        assert_eq!(it.status, IndexingStatus::Completed);
        assert_eq!(it.description.as_deref(), Some("a dog"));
        assert_eq!(it.embedding_dims(), Some(2));
    }

    #[test]
    fn empty_embedding_marks_failed() {
        let it = item()
            .begin_indexing()
            .unwrap()
            .finish_indexing(Ok(("a dog".into(), vec![])))
            .unwrap();
        assert_eq!(it.status, IndexingStatus::Failed);
        assert!(it.embedding.is_none());
    }

    #[test]
    fn finish_without_begin_is_rejected() {
        assert!(item().finish_indexing(Ok(("x".into(), vec![1.0]))).is_err());
    }

    #[test]
    fn reindex_only_from_failed() {
        let failed = item()
            .begin_indexing()
            .unwrap()
            .finish_indexing(Err(GuardError::Indexing("down".into())))
            .unwrap();
        let reset = failed.reset_for_reindex().unwrap();
        assert_eq!(reset.status, IndexingStatus::Unset);
        assert!(item().reset_for_reindex().is_err());
    }

    #[test]
    fn scores_bounds() {
        let ok = Scores {
            semantic: 40.0,
            structure: 12.5,
            compliance: 20.0,
            total: 71.0,
        };
        assert!(ok.validate().is_ok());
        let bad = Scores {
            compliance: 21.0,
            ..ok
        };
        assert!(bad.validate().is_err());
        let negative = Scores { total: -1.0, ..ok };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn inline_bytes_are_not_serialized() {
        let json = serde_json::to_value(item()).unwrap();
        assert_eq!(json["image"]["kind"], "inline");
        assert!(json["image"].get("bytes").is_none());
        assert!(json.get("embedding").is_none());
    }

    #[test]
    fn running_status_clamps_progress() {
        assert_eq!(RunStatus::running(150, "x").progress, 100);
        assert_eq!(RunStatus::complete().progress, 100);
    }
}
