//! Bounded, most-recent-first record of completed runs.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{Report, RiskSummary};
use crate::models::{AnalysisResult, QueryImage};

/// Default number of records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Archived outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub query: QueryImage,
    pub results: Vec<AnalysisResult>,
    pub max_score: f64,
    pub summary: RiskSummary,
}

impl HistoryRecord {
    pub fn from_report(query: QueryImage, report: &Report) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            query,
            results: report.results.clone(),
            max_score: report.max_score,
            summary: report.summary,
        }
    }

    /// The result a replay selects by default.
    pub fn selected(&self) -> Option<&AnalysisResult> {
        self.results.first()
    }
}

/// Fixed-capacity ring of history records, newest first.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest record when full.
    ///
    /// Returns the evicted record, if any.
    pub fn push(&mut self, record: HistoryRecord) -> Option<HistoryRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_back()
        } else {
            None
        };
        self.records.push_front(record);
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&HistoryRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
