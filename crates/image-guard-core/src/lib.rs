//! # Image Guard Core
//!
//! Shared, runtime-free logic for Image Guard: data models, perceptual
//! fingerprints, vector similarity, candidate selection, result ranking,
//! the bounded run history, and the collaborator traits the pipeline
//! calls out to.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. The
//! `image-guard` app crate wires these pieces to real collaborators,
//! a background indexer, and the batch orchestrator.

pub mod aggregate;
pub mod collaborators;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod models;
pub mod selection;
pub mod similarity;

pub use error::{GuardError, Result};
pub use fingerprint::Fingerprint;
