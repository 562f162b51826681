//! Candidate selection: which corpus items get a deep risk analysis.
//!
//! # Strategy
//!
//! 1. If the corpus holds at most `full_scan_limit` items, or no query
//!    embedding is available, every item is a candidate (`FullScan`).
//! 2. Otherwise (`Hybrid`) each item gets a selection score:
//!    - fingerprint within `match_threshold` bits → [`FINGERPRINT_PRIORITY`]
//!      (always ranks first),
//!    - else cosine similarity between query and item embeddings,
//!    - else `0.0`.
//! 3. Sort by score (desc, stable) and keep the top `top_k`.
//!
//! Fingerprint evidence therefore always outranks semantic similarity, and
//! the number of expensive analyses stays bounded on large corpora.

use serde::Serialize;

use crate::fingerprint::{fingerprints_match, Fingerprint, DEFAULT_MATCH_THRESHOLD};
use crate::models::CorpusItem;
use crate::similarity::cosine_similarity;

/// Selection score assigned to fingerprint matches.
pub const FINGERPRINT_PRIORITY: f64 = f64::INFINITY;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SelectionParams {
    /// Corpora at or below this size are scanned exhaustively.
    pub full_scan_limit: usize,
    /// Number of candidates kept by hybrid retrieval.
    pub top_k: usize,
    /// Maximum Hamming distance for a fingerprint match.
    pub match_threshold: u32,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            full_scan_limit: 20,
            top_k: 10,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    FullScan,
    Hybrid,
}

/// A corpus item chosen for deep analysis.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: CorpusItem,
    /// Selection score (`0.0` under a full scan).
    pub score: f64,
    /// Whether the item's fingerprint matches the query's.
    pub fingerprint_match: bool,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub strategy: SelectionStrategy,
    pub candidates: Vec<Candidate>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Choose the candidates for one run.
pub fn select_candidates(
    corpus: &[CorpusItem],
    query_fingerprint: Option<&Fingerprint>,
    query_embedding: Option<&[f32]>,
    params: &SelectionParams,
) -> Selection {
    let query_embedding = query_embedding.filter(|v| !v.is_empty());

    let embedding = match query_embedding {
        Some(e) if corpus.len() > params.full_scan_limit => e,
        _ => {
            let candidates = corpus
                .iter()
                .map(|item| Candidate {
                    fingerprint_match: fingerprints_match(
                        query_fingerprint,
                        item.fingerprint.as_ref(),
                        params.match_threshold,
                    ),
                    item: item.clone(),
                    score: 0.0,
                })
                .collect();
            return Selection {
                strategy: SelectionStrategy::FullScan,
                candidates,
            };
        }
    };

    let mut scored: Vec<Candidate> = corpus
        .iter()
        .map(|item| {
            let fingerprint_match = fingerprints_match(
                query_fingerprint,
                item.fingerprint.as_ref(),
                params.match_threshold,
            );
            let score = if fingerprint_match {
                FINGERPRINT_PRIORITY
            } else {
                item.embedding
                    .as_deref()
                    .map(|e| cosine_similarity(embedding, e) as f64)
                    .unwrap_or(0.0)
            };
            Candidate {
                item: item.clone(),
                score,
                fingerprint_match,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(params.top_k);

    Selection {
        strategy: SelectionStrategy::Hybrid,
        candidates: scored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageRef;

    fn item(name: &str, fp: Option<u64>, embedding: Option<Vec<f32>>) -> CorpusItem {
        let mut it = CorpusItem::new(name, ImageRef::Remote {
            url: format!("https://img.test/{}", name),
        });
        it.fingerprint = fp.map(Fingerprint::from_bits);
        it.embedding = embedding;
        it
    }

    fn names(sel: &Selection) -> Vec<&str> {
        sel.candidates.iter().map(|c| c.item.name.as_str()).collect()
    }

    const QUERY_FP: u64 = 0x0f0f_0f0f_0f0f_0f0f;
    // Differs from QUERY_FP in 40 bits.
    const FAR_FP: u64 = QUERY_FP ^ 0x0000_00ff_ffff_ffff;

    #[test]
    fn small_corpus_is_scanned_fully() {
        let corpus: Vec<CorpusItem> = (0..20)
            .map(|i| item(&format!("r{}", i), None, Some(vec![i as f32, 1.0])))
            .collect();
        let sel = select_candidates(
            &corpus,
            None,
            Some(&[1.0, 0.0]),
            &SelectionParams::default(),
        );
        assert_eq!(sel.strategy, SelectionStrategy::FullScan);
        assert_eq!(sel.len(), 20);
        let expected: Vec<String> = (0..20).map(|i| format!("r{}", i)).collect();
        assert_eq!(names(&sel), expected);
    }

    #[test]
    fn missing_query_embedding_falls_back_to_full_scan() {
        let corpus: Vec<CorpusItem> = (0..25)
            .map(|i| item(&format!("r{}", i), None, Some(vec![1.0, 0.0])))
            .collect();
        let none = select_candidates(&corpus, None, None, &SelectionParams::default());
        assert_eq!(none.strategy, SelectionStrategy::FullScan);
        assert_eq!(none.len(), 25);

        let empty = select_candidates(&corpus, None, Some(&[]), &SelectionParams::default());
        assert_eq!(empty.strategy, SelectionStrategy::FullScan);
        assert_eq!(empty.len(), 25);
    }

    #[test]
    fn full_scan_still_flags_fingerprint_matches() {
        let corpus = vec![item("dup", Some(QUERY_FP ^ 0b11), None), item("other", Some(FAR_FP), None)];
        let q = Fingerprint::from_bits(QUERY_FP);
        let sel = select_candidates(&corpus, Some(&q), None, &SelectionParams::default());
        assert!(sel.candidates[0].fingerprint_match);
        assert!(!sel.candidates[1].fingerprint_match);
    }

    #[test]
    fn fingerprint_match_always_in_top_k() {
        // 24 items closely aligned with the query embedding, one near-duplicate
        // whose embedding points the opposite way.
        let mut corpus: Vec<CorpusItem> = (0..24)
            .map(|i| item(&format!("sem{}", i), Some(FAR_FP), Some(vec![1.0, 0.01 * i as f32])))
            .collect();
        corpus.insert(13, item("near-dup", Some(QUERY_FP ^ 0xff), Some(vec![-1.0, 0.0])));

        let q = Fingerprint::from_bits(QUERY_FP);
        let sel = select_candidates(&corpus, Some(&q), Some(&[1.0, 0.0]), &SelectionParams::default());

        assert_eq!(sel.strategy, SelectionStrategy::Hybrid);
        assert_eq!(sel.len(), 10);
        assert_eq!(sel.candidates[0].item.name, "near-dup");
        assert!(sel.candidates[0].fingerprint_match);
        assert_eq!(sel.candidates[0].score, FINGERPRINT_PRIORITY);
    }

    #[test]
    fn hybrid_ranks_by_similarity() {
        let mut corpus: Vec<CorpusItem> = (0..21)
            .map(|i| item(&format!("low{}", i), None, Some(vec![0.0, 1.0])))
            .collect();
        corpus.push(item("best", None, Some(vec![1.0, 0.0])));
        corpus.push(item("second", None, Some(vec![1.0, 0.5])));
        corpus.push(item("unindexed", None, None));

        let params = SelectionParams {
            top_k: 3,
            ..SelectionParams::default()
        };
        let sel = select_candidates(&corpus, None, Some(&[1.0, 0.0]), &params);
        assert_eq!(sel.len(), 3);
        assert_eq!(&names(&sel)[..2], &["best", "second"]);
        // Remaining ties keep corpus order.
        assert_eq!(names(&sel)[2], "low0");
    }

    #[test]
    fn fingerprint_and_semantic_both_shortlisted() {
        // X: distance 3, similarity ~0.1. Y: distance 40, similarity ~0.95.
        let query_embedding = [1.0f32, 0.0];
        let mut corpus: Vec<CorpusItem> = (0..28)
            .map(|i| item(&format!("filler{}", i), Some(FAR_FP), Some(vec![0.3, 0.954])))
            .collect();
        corpus.push(item("X", Some(QUERY_FP ^ 0b111), Some(vec![0.1, 0.995])));
        corpus.push(item("Y", Some(FAR_FP), Some(vec![0.95, 0.312])));
        assert_eq!(corpus.len(), 30);

        let q = Fingerprint::from_bits(QUERY_FP);
        let sel = select_candidates(&corpus, Some(&q), Some(&query_embedding), &SelectionParams::default());

        let shortlisted = names(&sel);
        assert_eq!(sel.strategy, SelectionStrategy::Hybrid);
        assert_eq!(shortlisted[0], "X");
        assert_eq!(shortlisted[1], "Y");
        assert_eq!(sel.len(), 10);
    }
}
