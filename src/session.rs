//! Screening session: the host-facing facade over the pipeline.
//!
//! A [`Session`] owns the shared corpus, the current query image, the last
//! run's ranked results and selection, the refined suggestion, the run
//! status channel, and the bounded history. HTTP handlers and the CLI call
//! only these methods.
//!
//! # Run pipeline
//!
//! ```text
//! start_run
//!   ├─  5%  query fingerprint (computed at submission)
//!   ├─ 10%  query caption + embedding (skipped for small corpora)
//!   ├─ 20%  candidate selection (full scan or hybrid top-K)
//!   ├─ 20..100%  batched risk analysis
//!   └─ rank → results, selection, history record, status complete
//! ```
//!
//! Only one run executes at a time. Operations that would clobber a run in
//! flight (a second run, a new query, a history replay) fail with
//! [`GuardError::RunInProgress`]. A run executes on its own task, so
//! dropping the caller's future (a disconnected HTTP client) does not stop
//! it from completing and recording history.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use image_guard_core::aggregate::{aggregate, Report, RiskSummary};
use image_guard_core::collaborators::Collaborators;
use image_guard_core::history::{HistoryRecord, HistoryStore};
use image_guard_core::models::{
    AnalysisResult, CorpusItem, ImagePayload, ImageRef, QueryImage, RunStatus,
};
use image_guard_core::selection::{select_candidates, SelectionParams, SelectionStrategy};
use image_guard_core::{GuardError, Result};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::Config;
use crate::corpus::Corpus;
use crate::indexer::{fingerprint_payload, Indexer};
use crate::orchestrator::{Orchestrator, ANALYSIS_PROGRESS_START};
use crate::resolve::ImageResolver;

/// Tuning knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub selection: SelectionParams,
    pub batch_size: usize,
    pub analysis_timeout: Duration,
    pub history_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::minimal())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            selection: config.retrieval.params(),
            batch_size: config.analysis.batch_size,
            analysis_timeout: Duration::from_secs(config.analysis.timeout_secs),
            history_capacity: config.history.capacity,
        }
    }
}

/// Outcome of one run, as returned to hosts.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub history_id: String,
    pub strategy: SelectionStrategy,
    pub candidates: usize,
    #[serde(flatten)]
    pub report: Report,
}

/// Current results with the selection and refinement state.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub query: Option<QueryImage>,
    pub results: Vec<AnalysisResult>,
    pub selected_id: Option<String>,
    pub refined_suggestion: Option<String>,
}

/// History entry without its result list.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub query_name: String,
    pub result_count: usize,
    pub max_score: f64,
    pub summary: RiskSummary,
}

impl From<&HistoryRecord> for HistorySummary {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            timestamp: record.timestamp,
            query_name: record.query.name.clone(),
            result_count: record.results.len(),
            max_score: record.max_score,
            summary: record.summary,
        }
    }
}

#[derive(Default)]
struct SessionState {
    query: Option<QueryImage>,
    query_payload: Option<ImagePayload>,
    results: Vec<AnalysisResult>,
    selected_id: Option<String>,
    refined: Option<String>,
    history: HistoryStore,
}

pub struct Session {
    corpus: Arc<Corpus>,
    collaborators: Collaborators,
    resolver: Arc<dyn ImageResolver>,
    settings: SessionSettings,
    orchestrator: Orchestrator,
    state: Mutex<SessionState>,
    status: watch::Sender<RunStatus>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    pub fn new(
        corpus: Arc<Corpus>,
        collaborators: Collaborators,
        resolver: Arc<dyn ImageResolver>,
        settings: SessionSettings,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            resolver.clone(),
            collaborators.analyzer.clone(),
            settings.batch_size,
            settings.analysis_timeout,
        );
        let (status, _) = watch::channel(RunStatus::idle());
        Self {
            corpus,
            state: Mutex::new(SessionState {
                history: HistoryStore::new(settings.history_capacity),
                ..Default::default()
            }),
            collaborators,
            resolver,
            settings,
            orchestrator,
            status,
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    /// An indexer over this session's corpus and collaborators.
    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            self.corpus.clone(),
            self.resolver.clone(),
            self.collaborators.describer.clone(),
            self.collaborators.embedder.clone(),
        )
    }

    // ============ Corpus ============

    pub fn add_items(&self, items: Vec<CorpusItem>) -> Vec<String> {
        let ids = self.corpus.add(items);
        tracing::info!(added = ids.len(), total = self.corpus.len(), "corpus items added");
        ids
    }

    pub fn remove_item(&self, id: &str) -> Result<CorpusItem> {
        let removed = self.corpus.remove(id)?;
        tracing::info!(id = %id, name = %removed.name, "corpus item removed");
        Ok(removed)
    }

    pub fn reindex(&self, id: &str) -> Result<CorpusItem> {
        let item = self.corpus.reindex(id)?;
        tracing::info!(id = %id, name = %item.name, "corpus item queued for re-indexing");
        Ok(item)
    }

    pub fn list_corpus(&self) -> Vec<CorpusItem> {
        self.corpus.snapshot()
    }

    // ============ Query ============

    /// Replace the query image and reset run state.
    ///
    /// The image is resolved and fingerprinted immediately. An undecodable
    /// image is accepted with no fingerprint; it can still be screened
    /// semantically.
    pub async fn set_query(&self, name: &str, image: ImageRef) -> Result<QueryImage> {
        let _run = self
            .run_lock
            .try_lock()
            .map_err(|_| GuardError::RunInProgress)?;

        let mut query = QueryImage::new(name, image, None);
        let payload = self
            .resolver
            .resolve(&query.id, &query.image)
            .await
            .map_err(|e| GuardError::InvalidInput(format!("query image: {}", e)))?;

        match fingerprint_payload(&payload).await {
            Ok(fp) => query.fingerprint = Some(fp),
            Err(e) => tracing::warn!(name = %name, error = %e, "query fingerprint failed"),
        }

        {
            let mut state = self.state();
            state.query = Some(query.clone());
            state.query_payload = Some(payload);
            state.results.clear();
            state.selected_id = None;
            state.refined = None;
        }
        self.status.send_replace(RunStatus::idle());
        tracing::info!(id = %query.id, name = %name, fingerprint = ?query.fingerprint, "query image set");
        Ok(query)
    }

    // ============ Runs ============

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Screen the current query against the corpus.
    ///
    /// The run is spawned and awaited; cancelling the returned future
    /// leaves it running to completion in the background.
    pub async fn start_run(self: &Arc<Self>) -> Result<RunOutcome> {
        let run = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| GuardError::RunInProgress)?;

        let session = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = session.execute_run().await;
            drop(run);
            outcome
        });
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(GuardError::AnalysisService(format!("run task cancelled: {}", e))),
        }
    }

    async fn execute_run(&self) -> Result<RunOutcome> {
        let (query, payload) = {
            let state = self.state();
            let query = state.query.clone().ok_or(GuardError::NoQuery)?;
            (query, state.query_payload.clone())
        };
        let corpus = self.corpus.snapshot();
        if corpus.is_empty() {
            return Err(GuardError::EmptyCorpus);
        }

        tracing::info!(query = %query.name, corpus = corpus.len(), "run started");
        self.status
            .send_replace(RunStatus::running(5, "Fingerprinting query"));

        let payload = match payload {
            Some(p) => p,
            None => self
                .resolver
                .resolve(&query.id, &query.image)
                .await
                .map_err(|e| GuardError::InvalidInput(format!("query image: {}", e)))?,
        };

        let query_embedding = if corpus.len() > self.settings.selection.full_scan_limit {
            self.status
                .send_replace(RunStatus::running(10, "Embedding query"));
            self.embed_query(&payload).await
        } else {
            None
        };

        let selection = select_candidates(
            &corpus,
            query.fingerprint.as_ref(),
            query_embedding.as_deref(),
            &self.settings.selection,
        );
        let strategy = selection.strategy;
        let candidate_count = selection.len();
        tracing::info!(strategy = ?strategy, candidates = candidate_count, "candidates selected");
        self.status.send_replace(RunStatus::running(
            ANALYSIS_PROGRESS_START,
            format!("Selected {} candidates", candidate_count),
        ));

        let outcomes = self
            .orchestrator
            .evaluate(&payload, selection.candidates, &self.status)
            .await;
        let report = aggregate(outcomes);

        let record = HistoryRecord::from_report(query, &report);
        let history_id = record.id.clone();
        {
            let mut state = self.state();
            state.results = report.results.clone();
            state.selected_id = report.top().map(|r| r.reference_id.clone());
            state.refined = None;
            state.history.push(record);
        }
        self.status.send_replace(RunStatus::complete());

        tracing::info!(
            results = report.results.len(),
            max_score = report.max_score,
            summary = report.summary.label(),
            "run complete"
        );

        Ok(RunOutcome {
            history_id,
            strategy,
            candidates: candidate_count,
            report,
        })
    }

    /// Caption and embed the query. `None` falls back to a full scan.
    async fn embed_query(&self, payload: &ImagePayload) -> Option<Vec<f32>> {
        let caption = match self.collaborators.describer.describe(payload).await {
            Ok(c) if !c.trim().is_empty() => c,
            Ok(_) => {
                tracing::warn!("empty query caption, falling back to full scan");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "query caption failed, falling back to full scan");
                return None;
            }
        };
        match self.collaborators.embedder.embed(&caption).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, falling back to full scan");
                None
            }
        }
    }

    // ============ Results ============

    pub fn results(&self) -> ResultsView {
        let state = self.state();
        ResultsView {
            query: state.query.clone(),
            results: state.results.clone(),
            selected_id: state.selected_id.clone(),
            refined_suggestion: state.refined.clone(),
        }
    }

    pub fn select_result(&self, reference_id: &str) -> Result<AnalysisResult> {
        let mut state = self.state();
        let result = state
            .results
            .iter()
            .find(|r| r.reference_id == reference_id)
            .cloned()
            .ok_or_else(|| GuardError::NotFound(format!("result {}", reference_id)))?;
        if state.selected_id.as_deref() != Some(reference_id) {
            state.refined = None;
        }
        state.selected_id = Some(reference_id.to_string());
        Ok(result)
    }

    /// Turn the selected result's suggestion into a generation prompt.
    ///
    /// A refiner failure is logged and yields `Ok(None)`.
    pub async fn refine_selected(&self) -> Result<Option<String>> {
        let (selected_id, suggestion) = {
            let state = self.state();
            let selected_id = state
                .selected_id
                .clone()
                .ok_or_else(|| GuardError::NotFound("no result is selected".to_string()))?;
            let suggestion = state
                .results
                .iter()
                .find(|r| r.reference_id == selected_id)
                .and_then(|r| r.modification_suggestion.clone())
                .ok_or_else(|| {
                    GuardError::InvalidInput(
                        "selected result has no modification suggestion".to_string(),
                    )
                })?;
            (selected_id, suggestion)
        };

        let refined = match self.collaborators.refiner.refine(&suggestion).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Ok(None),
            Err(e) => {
                tracing::warn!(id = %selected_id, error = %e, "suggestion refinement failed");
                return Ok(None);
            }
        };

        let mut state = self.state();
        if state.selected_id.as_deref() == Some(selected_id.as_str()) {
            state.refined = Some(refined.clone());
        }
        Ok(Some(refined))
    }

    // ============ History ============

    pub fn history(&self) -> Vec<HistorySummary> {
        self.state().history.iter().map(HistorySummary::from).collect()
    }

    /// Restore a past run without recomputing it.
    pub fn load_history(&self, id: &str) -> Result<HistoryRecord> {
        let _run = self
            .run_lock
            .try_lock()
            .map_err(|_| GuardError::RunInProgress)?;

        let record = {
            let mut state = self.state();
            let record = state
                .history
                .get(id)
                .cloned()
                .ok_or_else(|| GuardError::NotFound(format!("history record {}", id)))?;
            state.query = Some(record.query.clone());
            state.query_payload = None;
            state.results = record.results.clone();
            state.selected_id = record.selected().map(|r| r.reference_id.clone());
            state.refined = None;
            record
        };
        self.status.send_replace(RunStatus::complete());
        tracing::info!(id = %id, query = %record.query.name, "history record loaded");
        Ok(record)
    }
}
