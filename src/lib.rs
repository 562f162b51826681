//! # Image Guard
//!
//! Copyright-risk screening of images against a reference corpus.
//!
//! Reference images are indexed in the background: each gets a perceptual
//! fingerprint, a caption, and a caption embedding. A screening run selects
//! likely candidates for the query image (fingerprint distance plus
//! embedding similarity), scores each candidate with a vision model in
//! small concurrent batches, and aggregates the scores into a report.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │    Corpus    │──▶│   Indexer    │──▶│ fingerprint + │
//! │ (add/remove) │   │ 1 item/tick  │   │ caption + vec │
//! └──────────────┘   └──────────────┘   └───────┬───────┘
//!                                               │
//!   query ──▶ Session ──▶ selection ──▶ Orchestrator ──▶ report ──▶ history
//!               │                       (batches of 3,
//!               ▼                        20s timeout)
//!        ┌──────────┐  ┌──────────┐
//!        │   CLI    │  │   HTTP   │
//!        │ (guard)  │  │  (axum)  │
//!        └──────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | In-memory reference corpus and directory scanning |
//! | [`resolve`] | Loading image bytes from inline data, files, or URLs |
//! | [`indexer`] | Background per-tick indexing |
//! | [`embedding`] | Caption embedding providers |
//! | [`gemini`] | Vision model client (captions, risk analysis, refinement) |
//! | [`orchestrator`] | Batched pairwise analysis with timeouts |
//! | [`session`] | Query, run, results, and history state |
//! | [`server`] | HTTP API |
//! | [`progress`] | CLI progress reporting |
//! | [`retry`] | HTTP retry with exponential backoff |

pub mod config;
pub mod corpus;
pub mod embedding;
pub mod gemini;
pub mod indexer;
pub mod orchestrator;
pub mod progress;
pub mod resolve;
pub mod retry;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_support;
