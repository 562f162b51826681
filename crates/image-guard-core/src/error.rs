//! Error taxonomy for the screening pipeline.
//!
//! The first five variants are per-item failures. None of them ever fails a
//! run: the orchestrator and indexer log them and degrade the affected item
//! (fingerprint absent, status `failed`, candidate dropped, or zero-score
//! result). The remaining variants are returned to hosts from session
//! operations.

use thiserror::Error;

use crate::models::IndexingStatus;

/// Result type for core and session operations.
pub type Result<T> = std::result::Result<T, GuardError>;

#[derive(Error, Debug)]
pub enum GuardError {
    /// The image could not be decoded; the fingerprint stays absent.
    #[error("fingerprint error: {0}")]
    Fingerprint(String),

    /// Caption or embedding failed; the item is marked `failed`.
    #[error("indexing error: {0}")]
    Indexing(String),

    /// Candidate image bytes could not be resolved; no result is produced.
    #[error("candidate fetch error for {id}: {message}")]
    CandidateFetch { id: String, message: String },

    /// The risk analysis did not settle within the per-item timeout.
    #[error("analysis of {id} timed out after {secs}s")]
    AnalysisTimeout { id: String, secs: u64 },

    /// The risk analysis service failed or returned a malformed response.
    #[error("analysis service error: {0}")]
    AnalysisService(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a run is already in progress")]
    RunInProgress,

    #[error("no query image has been set")]
    NoQuery,

    #[error("the reference corpus is empty")]
    EmptyCorpus,

    #[error("invalid indexing transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: IndexingStatus,
        to: IndexingStatus,
    },
}
