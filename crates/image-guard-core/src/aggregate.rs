//! Ranking and summarizing analysis results.
//!
//! Results are filtered (`total > 0`), then ordered by fingerprint match
//! first and total score second. Ordering is re-derived here on every run,
//! so it never depends on which analysis call finished first.

use serde::{Deserialize, Serialize};

use crate::models::AnalysisResult;

/// Top totals at or above this value are classified high-risk.
pub const HIGH_RISK_THRESHOLD: f64 = 60.0;

/// One-line classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskSummary {
    #[serde(rename = "high-risk match found")]
    HighRisk,
    #[serde(rename = "low-risk similarity")]
    LowRisk,
    #[serde(rename = "safe — no risk found")]
    Safe,
}

impl RiskSummary {
    pub fn label(&self) -> &'static str {
        match self {
            RiskSummary::HighRisk => "high-risk match found",
            RiskSummary::LowRisk => "low-risk similarity",
            RiskSummary::Safe => "safe — no risk found",
        }
    }
}

/// Ranked output of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub results: Vec<AnalysisResult>,
    pub max_score: f64,
    pub summary: RiskSummary,
}

impl Report {
    /// The default selection for presentation.
    pub fn top(&self) -> Option<&AnalysisResult> {
        self.results.first()
    }
}

/// Drop absent and non-positive results, then sort.
pub fn rank_results(results: impl IntoIterator<Item = Option<AnalysisResult>>) -> Vec<AnalysisResult> {
    let mut kept: Vec<AnalysisResult> = results
        .into_iter()
        .flatten()
        .filter(|r| r.scores.total > 0.0)
        .collect();
    kept.sort_by(|a, b| {
        b.fingerprint_match
            .cmp(&a.fingerprint_match)
            .then_with(|| b.scores.total.total_cmp(&a.scores.total))
    });
    kept
}

/// Classify already ranked results.
pub fn summarize(ranked: &[AnalysisResult]) -> (f64, RiskSummary) {
    match ranked.first() {
        None => (0.0, RiskSummary::Safe),
        Some(top) if top.scores.total >= HIGH_RISK_THRESHOLD => (top.scores.total, RiskSummary::HighRisk),
        Some(top) => (top.scores.total, RiskSummary::LowRisk),
    }
}

/// Rank raw results and build the report.
pub fn aggregate(results: impl IntoIterator<Item = Option<AnalysisResult>>) -> Report {
    let results = rank_results(results);
    let (max_score, summary) = summarize(&results);
    Report {
        results,
        max_score,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, fingerprint_match: bool, total: f64) -> AnalysisResult {
        let mut r = AnalysisResult::zero(id, fingerprint_match);
        r.scores.total = total;
        r.is_match = total > 0.0;
        r
    }

    fn ids(report: &Report) -> Vec<&str> {
        report.results.iter().map(|r| r.reference_id.as_str()).collect()
    }

    #[test]
    fn fingerprint_match_outranks_score() {
        let report = aggregate(vec![
            Some(result("plain", false, 70.0)),
            Some(result("dup", true, 50.0)),
        ]);
        assert_eq!(ids(&report), vec!["dup", "plain"]);
        assert_eq!(report.top().unwrap().reference_id, "dup");
    }

    #[test]
    fn sorts_by_total_within_group() {
        let report = aggregate(vec![
            Some(result("a", false, 10.0)),
            Some(result("b", true, 91.0)),
            Some(result("c", false, 45.0)),
            Some(result("d", true, 95.0)),
        ]);
        assert_eq!(ids(&report), vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn equal_scores_keep_arrival_order() {
        let report = aggregate(vec![
            Some(result("first", false, 30.0)),
            Some(result("second", false, 30.0)),
        ]);
        assert_eq!(ids(&report), vec!["first", "second"]);
    }

    #[test]
    fn drops_absent_and_zero_results() {
        let report = aggregate(vec![
            None,
            Some(result("zero", true, 0.0)),
            Some(result("kept", false, 12.0)),
        ]);
        assert_eq!(ids(&report), vec!["kept"]);
    }

    #[test]
    fn summary_labels() {
        let high = aggregate(vec![Some(result("a", false, 60.0))]);
        assert_eq!(high.summary, RiskSummary::HighRisk);
        assert_eq!(high.max_score, 60.0);

        let low = aggregate(vec![Some(result("a", false, 59.0))]);
        assert_eq!(low.summary, RiskSummary::LowRisk);

        let safe = aggregate(Vec::new());
        assert_eq!(safe.summary, RiskSummary::Safe);
        assert_eq!(safe.max_score, 0.0);
        assert_eq!(safe.summary.label(), "safe — no risk found");
    }

    #[test]
    fn max_score_follows_the_top_result() {
        // A low-scoring fingerprint match still heads the list.
        let report = aggregate(vec![
            Some(result("semantic", false, 80.0)),
            Some(result("dup", true, 40.0)),
        ]);
        assert_eq!(report.max_score, 40.0);
        assert_eq!(report.summary, RiskSummary::LowRisk);
    }

    #[test]
    fn summary_serializes_as_label() {
        let json = serde_json::to_string(&RiskSummary::HighRisk).unwrap();
        assert_eq!(json, "\"high-risk match found\"");
    }
}
