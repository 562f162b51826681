//! In-memory reference corpus.
//!
//! The corpus is an ordered list of [`CorpusItem`]s behind a
//! `std::sync::RwLock`. Readers take snapshots; the indexer and the session
//! write back whole items. The lock is never held across an `.await`, so a
//! run, the indexer, and API handlers can share one [`Corpus`] freely.
//!
//! Items can be seeded from a directory with [`scan_directory`], which walks
//! the tree with `walkdir` and filters paths through include/exclude globs.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::bail;
use globset::{Glob, GlobSet, GlobSetBuilder};
use image_guard_core::models::{CorpusItem, ImageRef};
use image_guard_core::{GuardError, Result};
use walkdir::WalkDir;

use crate::config::CorpusConfig;

#[derive(Default)]
pub struct Corpus {
    items: RwLock<Vec<CorpusItem>>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<CorpusItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<CorpusItem>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<CorpusItem>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append items in order. Returns their ids.
    pub fn add(&self, items: Vec<CorpusItem>) -> Vec<String> {
        let ids = items.iter().map(|i| i.id.clone()).collect();
        self.write().extend(items);
        ids
    }

    pub fn remove(&self, id: &str) -> Result<CorpusItem> {
        let mut items = self.write();
        let pos = items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| GuardError::NotFound(format!("corpus item {}", id)))?;
        Ok(items.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<CorpusItem> {
        self.read().iter().find(|i| i.id == id).cloned()
    }

    /// Point-in-time copy of every item.
    pub fn snapshot(&self) -> Vec<CorpusItem> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replace the stored item with the same id.
    ///
    /// Returns `false` when the item was removed in the meantime; the update
    /// is then discarded.
    pub fn update(&self, item: CorpusItem) -> bool {
        let mut items = self.write();
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    /// Reset a failed item so the indexer retries it.
    pub fn reindex(&self, id: &str) -> Result<CorpusItem> {
        let mut items = self.write();
        let slot = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| GuardError::NotFound(format!("corpus item {}", id)))?;
        let reset = slot.clone().reset_for_reindex()?;
        *slot = reset.clone();
        Ok(reset)
    }

    /// First item, in insertion order, that still needs indexing work.
    pub fn next_pending(&self) -> Option<CorpusItem> {
        self.read().iter().find(|i| i.needs_indexing()).cloned()
    }
}

/// Build corpus items from every image under `config.root`.
///
/// Paths are matched relative to the root. `.git`, `target`, and
/// `node_modules` are always excluded. Items are sorted by relative path.
pub fn scan_directory(config: &CorpusConfig) -> anyhow::Result<Vec<CorpusItem>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut found = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        found.push((rel_str, path.to_path_buf()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(found
        .into_iter()
        .map(|(rel, path)| CorpusItem::new(rel, ImageRef::File { path }))
        .collect())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
