//! Thread-safe access to an [`InvertedIndex`].
//!
//! A single `parking_lot::RwLock` guards the whole index. Every operation
//! that mutates or may mutate index state takes the write lock, and that
//! includes `search`, since it cleans tombstones out of the posting lists it
//! reads. Only `contains_file` and the occupancy getters are readers.
//!
//! Per-term locking would not be enough: a search cleaning a posting list
//! can race with a `remove_directory` tombstoning paths in the same list.

use crate::error::Result;
use crate::index::InvertedIndex;
use crate::tokenizer::Tokenizer;
use crate::types::{DecodedFile, IndexStats, Term};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An [`InvertedIndex`] shared between threads.
///
/// Writers are serialized; readers run in parallel with each other but
/// never alongside a writer. The lock is eventually fair, so a stream of
/// readers cannot starve the monitor's writes.
pub struct ConcurrentIndex {
    inner: RwLock<InvertedIndex>,
}

impl ConcurrentIndex {
    /// Create an empty concurrent index using `tokenizer`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self::from_index(InvertedIndex::new(tokenizer))
    }

    /// Wrap an existing index.
    pub fn from_index(index: InvertedIndex) -> Self {
        ConcurrentIndex {
            inner: RwLock::new(index),
        }
    }

    /// The tokenizer of the wrapped index.
    pub fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        self.inner.read().tokenizer().clone()
    }

    /// Add a file under the write lock. Returns false if already contained.
    pub fn add_file(&self, file: DecodedFile) -> bool {
        self.inner.write().add_file(file)
    }

    /// Add a batch under one write lock. Returns the number added.
    pub fn add_files(&self, files: Vec<DecodedFile>) -> usize {
        self.inner.write().add_files(files)
    }

    /// Add the files of a batch that still pass `keep` once the write lock
    /// is held. Returns the number added.
    ///
    /// Writers that remove files wait for this call, so a file `keep`
    /// accepts can only be removed after it has been added.
    pub fn add_files_retaining(
        &self,
        mut files: Vec<DecodedFile>,
        mut keep: impl FnMut(&DecodedFile) -> bool,
    ) -> usize {
        let mut index = self.inner.write();
        files.retain(|file| keep(file));
        index.add_files(files)
    }

    /// Add a file, or re-index it if already contained, under one write
    /// lock. Returns false only when a contained file's terms are unchanged.
    pub fn upsert_file(&self, file: DecodedFile) -> Result<bool> {
        let mut index = self.inner.write();
        if index.contains_file(&file.path) {
            index.handle_file_modification(file)
        } else {
            Ok(index.add_file(file))
        }
    }

    /// Search for a term. Takes the write lock because of lazy cleanup.
    pub fn search(&self, term: &Term) -> BTreeSet<PathBuf> {
        self.inner.write().search(term)
    }

    /// Search several terms under one lock acquisition and intersect the
    /// results. An empty term list yields an empty set.
    pub fn search_all(&self, terms: &[Term]) -> BTreeSet<PathBuf> {
        let mut index = self.inner.write();
        let mut terms = terms.iter();
        let Some(first) = terms.next() else {
            return BTreeSet::new();
        };

        let mut results = index.search(first);
        for term in terms {
            if results.is_empty() {
                break;
            }
            let hits = index.search(term);
            results.retain(|path| hits.contains(path));
        }
        results
    }

    /// Logically remove a file under the write lock.
    pub fn remove_file(&self, path: &Path) -> bool {
        self.inner.write().remove_file(path)
    }

    /// Logically remove every file under `dir` under the write lock.
    pub fn remove_directory(&self, dir: &Path) -> usize {
        self.inner.write().remove_directory(dir)
    }

    /// Purge all pending removals under the write lock.
    pub fn force_removes(&self) {
        self.inner.write().force_removes()
    }

    /// Re-index a contained file under the write lock.
    pub fn handle_file_modification(&self, file: DecodedFile) -> Result<bool> {
        self.inner.write().handle_file_modification(file)
    }

    /// Check whether a file is indexed. Takes the read lock.
    pub fn contains_file(&self, path: &Path) -> bool {
        self.inner.read().contains_file(path)
    }

    /// Number of contained files. Takes the read lock.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if no file is contained. Takes the read lock.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Occupancy figures. Takes the read lock.
    pub fn stats(&self) -> IndexStats {
        self.inner.read().stats()
    }
}

impl std::fmt::Debug for ConcurrentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentIndex")
            .field("files", &self.len())
            .finish()
    }
}
