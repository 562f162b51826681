//! Background semantic indexing.
//!
//! The [`Indexer`] advances at most one corpus item per tick:
//!
//! 1. If the item has no fingerprint (and no earlier attempt failed), its
//!    bytes are resolved and fingerprinted. A failure is logged and
//!    recorded; it does not block step 2.
//! 2. If the item's status is `unset`, it is marked `processing` and written
//!    back at once, then captioned and embedded. Success stores the caption
//!    and vector and marks it `completed`; any failure marks it `failed`.
//!
//! The corpus lock is released across every collaborator call. An item
//! removed while its tick was in flight is dropped on write-back.
//!
//! [`Indexer::run`] drives ticks from an injected [`Ticker`] and never
//! overlaps them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image_guard_core::collaborators::{Describer, Embedder};
use image_guard_core::fingerprint::{compute_fingerprint, Fingerprint};
use image_guard_core::models::{CorpusItem, ImagePayload, IndexingStatus};
use image_guard_core::{GuardError, Result};
use tokio::time::MissedTickBehavior;

use crate::corpus::Corpus;
use crate::resolve::ImageResolver;

/// Paces the indexer loop.
#[async_trait]
pub trait Ticker: Send {
    /// Wait until the next tick is due.
    async fn tick(&mut self);
}

/// Production ticker backed by `tokio::time::interval`.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No item needed work.
    Idle,
    /// The item was advanced; carries its status after the tick.
    Advanced { id: String, status: IndexingStatus },
    /// The item was removed from the corpus mid-tick.
    Dropped { id: String },
}

pub struct Indexer {
    corpus: Arc<Corpus>,
    resolver: Arc<dyn ImageResolver>,
    describer: Arc<dyn Describer>,
    embedder: Arc<dyn Embedder>,
}

impl Indexer {
    pub fn new(
        corpus: Arc<Corpus>,
        resolver: Arc<dyn ImageResolver>,
        describer: Arc<dyn Describer>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            corpus,
            resolver,
            describer,
            embedder,
        }
    }

    /// Advance the first pending item by one step of the pipeline.
    pub async fn tick(&self) -> TickOutcome {
        let Some(mut item) = self.corpus.next_pending() else {
            return TickOutcome::Idle;
        };
        let id = item.id.clone();
        let mut payload = None;

        if item.needs_fingerprint() {
            let outcome = match self.resolver.resolve(&item.id, &item.image).await {
                Ok(resolved) => {
                    let fp = fingerprint_payload(&resolved).await;
                    payload = Some(resolved);
                    fp
                }
                Err(e) => Err(e),
            };
            match &outcome {
                Ok(fp) => tracing::debug!(id = %id, fingerprint = %fp, "fingerprinted corpus item"),
                Err(e) => tracing::warn!(id = %id, name = %item.name, error = %e, "fingerprint failed"),
            }
            item = item.with_fingerprint(outcome);
            if !self.corpus.update(item.clone()) {
                return TickOutcome::Dropped { id };
            }
        }

        if item.status == IndexingStatus::Unset {
            item = match item.begin_indexing() {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "cannot start indexing");
                    return TickOutcome::Advanced {
                        id,
                        status: IndexingStatus::Unset,
                    };
                }
            };
            if !self.corpus.update(item.clone()) {
                return TickOutcome::Dropped { id };
            }

            let outcome = self.describe_and_embed(&item, payload).await;
            if let Err(e) = &outcome {
                tracing::warn!(id = %id, name = %item.name, error = %e, "semantic indexing failed");
            }

            item = match item.finish_indexing(outcome) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "cannot finish indexing");
                    return TickOutcome::Advanced {
                        id,
                        status: IndexingStatus::Processing,
                    };
                }
            };
            if !self.corpus.update(item.clone()) {
                return TickOutcome::Dropped { id };
            }
            tracing::info!(
                id = %id,
                name = %item.name,
                status = ?item.status,
                dims = item.embedding_dims().unwrap_or(0),
                "indexed corpus item"
            );
        }

        TickOutcome::Advanced {
            id,
            status: item.status,
        }
    }

    async fn describe_and_embed(
        &self,
        item: &CorpusItem,
        payload: Option<ImagePayload>,
    ) -> Result<(String, Vec<f32>)> {
        let payload = match payload {
            Some(p) => p,
            None => self.resolver.resolve(&item.id, &item.image).await?,
        };
        let description = self.describer.describe(&payload).await?;
        if description.trim().is_empty() {
            return Err(GuardError::Indexing("empty caption".to_string()));
        }
        let embedding = self.embedder.embed(&description).await?;
        Ok((description, embedding))
    }

    /// Tick until no item is pending. Returns the number of ticks that did
    /// work.
    pub async fn run_until_idle(&self) -> usize {
        let mut advanced = 0;
        while self.tick().await != TickOutcome::Idle {
            advanced += 1;
        }
        advanced
    }

    /// Tick forever at the pace of `ticker`.
    pub async fn run(&self, mut ticker: impl Ticker) {
        tracing::info!(embedder = %self.embedder.model_name(), "indexer started");
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

/// Fingerprint decoded image bytes off the async runtime.
pub async fn fingerprint_payload(payload: &ImagePayload) -> Result<Fingerprint> {
    let bytes = payload.bytes.clone();
    tokio::task::spawn_blocking(move || compute_fingerprint(&bytes))
        .await
        .map_err(|e| GuardError::Fingerprint(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::HttpResolver;
    use crate::test_support::{inline, ramp_png, StubDescriber, Stubs};
    use image_guard_core::models::ImageRef;

    fn indexer(corpus: Arc<Corpus>, stubs: &Stubs) -> Indexer {
        Indexer::new(
            corpus,
            Arc::new(HttpResolver::new(Duration::from_secs(5)).unwrap()),
            stubs.describer.clone(),
            stubs.embedder.clone(),
        )
    }

    #[tokio::test]
    async fn tick_advances_one_item() {
        let corpus = Arc::new(Corpus::new());
        let ids = corpus.add(vec![
            CorpusItem::new("a", inline(ramp_png())),
            CorpusItem::new("b", inline(ramp_png())),
        ]);
        let stubs = Stubs::new();
        let indexer = indexer(corpus.clone(), &stubs);

        let outcome = indexer.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Advanced {
                id: ids[0].clone(),
                status: IndexingStatus::Completed
            }
        );

        let a = corpus.get(&ids[0]).unwrap();
        assert!(a.fingerprint.is_some());
        assert_eq!(a.description.as_deref(), Some(StubDescriber::caption(&ids[0]).as_str()));
        assert_eq!(a.embedding_dims(), Some(3));

        let b = corpus.get(&ids[1]).unwrap();
        assert_eq!(b.status, IndexingStatus::Unset);
        assert!(b.fingerprint.is_none());
    }

    #[tokio::test]
    async fn caption_failure_marks_failed_and_is_not_retried() {
        let corpus = Arc::new(Corpus::new());
        let ids = corpus.add(vec![CorpusItem::new("a", inline(ramp_png()))]);
        let stubs = Stubs::new();
        stubs.describer.fail(&ids[0]);
        let indexer = indexer(corpus.clone(), &stubs);

        assert_eq!(indexer.run_until_idle().await, 1);
        let a = corpus.get(&ids[0]).unwrap();
        assert_eq!(a.status, IndexingStatus::Failed);
        assert!(a.fingerprint.is_some());
        assert_eq!(indexer.tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn undecodable_image_keeps_fingerprint_absent() {
        let corpus = Arc::new(Corpus::new());
        let ids = corpus.add(vec![CorpusItem::new(
            "junk",
            ImageRef::inline("image/png", vec![0u8, 1, 2, 3]),
        )]);
        let stubs = Stubs::new();
        let indexer = indexer(corpus.clone(), &stubs);

        indexer.tick().await;
        let item = corpus.get(&ids[0]).unwrap();
        assert!(item.fingerprint.is_none());
        assert!(item.fingerprint_failed);
        // Semantic indexing still ran.
        assert_eq!(item.status, IndexingStatus::Completed);
        assert_eq!(indexer.tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn unreadable_file_fails_both_steps() {
        let corpus = Arc::new(Corpus::new());
        let ids = corpus.add(vec![CorpusItem::new(
            "gone",
            ImageRef::File {
                path: "/nonexistent/gone.png".into(),
            },
        )]);
        let stubs = Stubs::new();
        let indexer = indexer(corpus.clone(), &stubs);

        indexer.tick().await;
        let item = corpus.get(&ids[0]).unwrap();
        assert!(item.fingerprint_failed);
        assert_eq!(item.status, IndexingStatus::Failed);
        assert_eq!(
            stubs
                .describer
                .calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn reindex_puts_failed_item_back_in_the_queue() {
        let corpus = Arc::new(Corpus::new());
        let ids = corpus.add(vec![CorpusItem::new("a", inline(ramp_png()))]);
        let stubs = Stubs::new();
        stubs.describer.fail(&ids[0]);
        let indexer = indexer(corpus.clone(), &stubs);
        indexer.run_until_idle().await;

        corpus.reindex(&ids[0]).unwrap();
        let stubs_ok = Stubs::new();
        let retry = Indexer::new(
            corpus.clone(),
            Arc::new(HttpResolver::new(Duration::from_secs(5)).unwrap()),
            stubs_ok.describer.clone(),
            stubs_ok.embedder.clone(),
        );
        retry.run_until_idle().await;
        assert_eq!(corpus.get(&ids[0]).unwrap().status, IndexingStatus::Completed);
    }

    struct CountingTicker {
        remaining: usize,
    }

    #[async_trait]
    impl Ticker for CountingTicker {
        async fn tick(&mut self) {
            if self.remaining == 0 {
                std::future::pending::<()>().await;
            }
            self.remaining -= 1;
        }
    }

    #[tokio::test]
    async fn run_ticks_at_the_tickers_pace() {
        let corpus = Arc::new(Corpus::new());
        let ids = corpus.add(vec![
            CorpusItem::new("a", inline(ramp_png())),
            CorpusItem::new("b", inline(ramp_png())),
            CorpusItem::new("c", inline(ramp_png())),
        ]);
        let stubs = Stubs::new();
        let indexer = indexer(corpus.clone(), &stubs);

        let _ = tokio::time::timeout(
            Duration::from_millis(500),
            indexer.run(CountingTicker { remaining: 2 }),
        )
        .await;

        assert_eq!(corpus.get(&ids[0]).unwrap().status, IndexingStatus::Completed);
        assert_eq!(corpus.get(&ids[1]).unwrap().status, IndexingStatus::Completed);
        assert_eq!(corpus.get(&ids[2]).unwrap().status, IndexingStatus::Unset);
    }
}
