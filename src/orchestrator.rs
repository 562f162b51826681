//! Batched pairwise risk analysis.
//!
//! Candidates are processed in fixed-size batches. Batches run strictly one
//! after another; the candidates inside a batch run concurrently, each as
//! its own spawned task raced against the per-item timeout. On timeout the
//! task's `JoinHandle` is dropped, which detaches the task: the external
//! call may still finish, but its result is ignored.
//!
//! Per-candidate failures never fail the run:
//!
//! | Failure | Outcome |
//! |---------|---------|
//! | image bytes cannot be resolved | no result |
//! | timeout | no result |
//! | analysis service error | zero-score result (filtered by the aggregator) |
//!
//! After every batch the run status advances to
//! `20 + floor((batch_start + 1) / total * 80)`, where `batch_start` is the
//! index of the batch's first candidate. Completion publishes 100.

use std::sync::Arc;
use std::time::Duration;

use image_guard_core::collaborators::RiskAnalyzer;
use image_guard_core::models::{AnalysisResult, ImagePayload, RunStatus};
use image_guard_core::selection::Candidate;
use image_guard_core::GuardError;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::resolve::ImageResolver;

/// Progress reported once candidate selection is done.
pub const ANALYSIS_PROGRESS_START: u8 = 20;
const ANALYSIS_PROGRESS_SPAN: usize = 80;

/// Progress after the batch starting at candidate `batch_start` of `total`.
pub fn batch_progress(batch_start: usize, total: usize) -> u8 {
    if total == 0 {
        return ANALYSIS_PROGRESS_START + ANALYSIS_PROGRESS_SPAN as u8;
    }
    let reached = (batch_start + 1).min(total);
    ANALYSIS_PROGRESS_START + (reached * ANALYSIS_PROGRESS_SPAN / total) as u8
}

pub struct Orchestrator {
    resolver: Arc<dyn ImageResolver>,
    analyzer: Arc<dyn RiskAnalyzer>,
    batch_size: usize,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<dyn ImageResolver>,
        analyzer: Arc<dyn RiskAnalyzer>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            analyzer,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Analyse every candidate against `query`.
    ///
    /// Returns one entry per candidate, in candidate order; `None` where the
    /// candidate produced no result.
    pub async fn evaluate(
        &self,
        query: &ImagePayload,
        candidates: Vec<Candidate>,
        status: &watch::Sender<RunStatus>,
    ) -> Vec<Option<AnalysisResult>> {
        let total = candidates.len();
        let batch_count = total.div_ceil(self.batch_size);
        let mut outcomes = Vec::with_capacity(total);
        let mut settled = 0;
        let mut progress = ANALYSIS_PROGRESS_START;

        let mut pending = candidates.into_iter().peekable();
        let mut batch_no = 0;
        while pending.peek().is_some() {
            batch_no += 1;
            let batch_start = settled;
            let batch: Vec<Candidate> = pending.by_ref().take(self.batch_size).collect();
            tracing::debug!(batch = batch_no, of = batch_count, size = batch.len(), "analysing batch");
            status.send_replace(RunStatus::running(
                progress,
                format!("Analysing batch {}/{}", batch_no, batch_count),
            ));

            let deadline = Instant::now() + self.timeout;
            let handles: Vec<_> = batch
                .into_iter()
                .map(|candidate| {
                    let id = candidate.item.id.clone();
                    (id, self.spawn_analysis(query.clone(), candidate))
                })
                .collect();

            for (id, handle) in handles {
                let outcome = match tokio::time::timeout_at(deadline, handle).await {
                    Ok(Ok(Ok(result))) => Some(result),
                    Ok(Ok(Err(e))) => {
                        tracing::warn!(id = %id, error = %e, "candidate dropped");
                        None
                    }
                    Ok(Err(join_err)) => {
                        tracing::warn!(id = %id, error = %join_err, "analysis task failed");
                        None
                    }
                    Err(_) => {
                        let e = GuardError::AnalysisTimeout {
                            id: id.clone(),
                            secs: self.timeout.as_secs(),
                        };
                        tracing::warn!(id = %id, error = %e, "candidate dropped");
                        None
                    }
                };
                outcomes.push(outcome);
                settled += 1;
            }

            progress = batch_progress(batch_start, total);
            status.send_replace(RunStatus::running(
                progress,
                format!("Analysed {}/{} candidates", settled, total),
            ));
        }

        outcomes
    }

    fn spawn_analysis(
        &self,
        query: ImagePayload,
        candidate: Candidate,
    ) -> tokio::task::JoinHandle<image_guard_core::Result<AnalysisResult>> {
        let resolver = self.resolver.clone();
        let analyzer = self.analyzer.clone();

        tokio::spawn(async move {
            let item = candidate.item;
            let fingerprint_match = candidate.fingerprint_match;
            let payload = resolver.resolve(&item.id, &item.image).await?;

            match analyzer
                .analyze_risk(&query, &payload, fingerprint_match)
                .await
            {
                Ok(mut result) => {
                    result.reference_id = item.id;
                    result.fingerprint_match = fingerprint_match;
                    Ok(result)
                }
                Err(GuardError::AnalysisService(message)) => {
                    tracing::warn!(id = %item.id, error = %message, "analysis service error, scoring zero");
                    Ok(AnalysisResult::zero(item.id, fingerprint_match))
                }
                Err(e) => Err(e),
            }
        })
    }
}
