//! In-memory inverted index with lazy removal.
//!
//! The `InvertedIndex` maps terms to the files that contain them. It supports:
//!
//! - Adding files (single or batched, with parallel tokenization)
//! - Exact term search
//! - Logical removal of files and whole directories
//! - Re-indexing of modified files
//!
//! ## Lazy Removal
//!
//! Removing a file is split in two:
//! - **Logical**: the path leaves the path→terms map and becomes a tombstone.
//!   `contains_file` reflects this immediately.
//! - **Physical**: the path is dropped from a posting list the next time a
//!   search reads that list, or by `force_removes`.
//!
//! Each tombstone remembers which posting lists still hold its path, so it
//! is retired as soon as the last of them has been cleaned. Because search
//! cleans up as it reads, search is a mutating operation and takes `&mut self`.

use crate::error::{Result, SiftError};
use crate::tokenizer::Tokenizer;
use crate::types::{normalize_path, DecodedFile, IndexStats, PostingList, Term};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Batches with at least this many files are tokenized in parallel.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

/// The term → files index for one tree's worth of files.
///
/// ## Example
///
/// ```rust
/// use sift_core::{DecodedFile, InvertedIndex, Term, WordTokenizer};
/// use std::sync::Arc;
///
/// let mut index = InvertedIndex::new(Arc::new(WordTokenizer::default()));
/// index.add_file(DecodedFile::new("/docs/a.txt", "hello world"));
///
/// let hits = index.search(&Term::from("hello"));
/// assert_eq!(hits.len(), 1);
/// ```
pub struct InvertedIndex {
    /// Splits file content into terms
    tokenizer: Arc<dyn Tokenizer>,

    /// Term → paths posted under it (may include tombstoned paths)
    postings: HashMap<Term, PostingList>,

    /// Path → terms it contributed, for contained files only
    file_terms: HashMap<Arc<Path>, HashSet<Term>>,

    /// Tombstoned path → terms whose posting lists still hold it
    pending: HashMap<Arc<Path>, HashSet<Term>>,

    /// Minimum batch size for parallel tokenization
    parallel_threshold: usize,

    /// Time of the last content change
    last_updated: Option<chrono::DateTime<Utc>>,
}

impl InvertedIndex {
    /// Create a new empty index.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        InvertedIndex {
            tokenizer,
            postings: HashMap::new(),
            file_terms: HashMap::new(),
            pending: HashMap::new(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            last_updated: None,
        }
    }

    /// Set the batch size at which `add_files` tokenizes in parallel.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    /// The tokenizer this index uses.
    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Number of contained files.
    pub fn len(&self) -> usize {
        self.file_terms.len()
    }

    /// Check if no file is contained.
    pub fn is_empty(&self) -> bool {
        self.file_terms.is_empty()
    }

    /// Check whether a file is indexed and not pending removal.
    pub fn contains_file(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.file_terms.contains_key(path.as_path()) && !self.pending.contains_key(path.as_path())
    }

    /// Add a file. Returns false if the path is already contained.
    #[instrument(skip(self, file), fields(path = %file.path.display()))]
    pub fn add_file(&mut self, file: DecodedFile) -> bool {
        let path = normalize_path(&file.path);
        if self.contains_file(&path) {
            trace!("File already indexed, skipping");
            return false;
        }

        let terms = self.term_set(&file.content);
        self.insert_terms(Arc::from(path), terms);
        true
    }

    /// Add a batch of files, skipping any already contained.
    ///
    /// Returns the number of files actually added.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub fn add_files(&mut self, files: Vec<DecodedFile>) -> usize {
        let tokenizer = &self.tokenizer;
        let tokenized: Vec<(PathBuf, HashSet<Term>)> = if files.len() >= self.parallel_threshold {
            files
                .into_par_iter()
                .map(|file| {
                    let terms = tokenizer.tokenize(&file.content).into_iter().collect();
                    (normalize_path(&file.path), terms)
                })
                .collect()
        } else {
            files
                .into_iter()
                .map(|file| {
                    let terms = tokenizer.tokenize(&file.content).into_iter().collect();
                    (normalize_path(&file.path), terms)
                })
                .collect()
        };

        let mut added = 0;
        for (path, terms) in tokenized {
            if self.contains_file(&path) {
                continue;
            }
            self.insert_terms(Arc::from(path), terms);
            added += 1;
        }

        info!(added, "Batch indexing complete");
        added
    }

    /// Find every live file posted under `term`.
    ///
    /// Tombstoned paths met along the way are dropped from the term's
    /// posting list. The returned set never contains them either way.
    pub fn search(&mut self, term: &Term) -> BTreeSet<PathBuf> {
        let Some(list) = self.postings.get_mut(term) else {
            return BTreeSet::new();
        };

        let pending = &mut self.pending;
        let mut purged = 0usize;
        if !pending.is_empty() {
            list.retain(|path| {
                let Some(remaining) = pending.get_mut(path) else {
                    return true;
                };
                remaining.remove(term);
                if remaining.is_empty() {
                    pending.remove(path);
                }
                purged += 1;
                false
            });
        }

        let results: BTreeSet<PathBuf> = list.iter().map(|p| p.to_path_buf()).collect();

        if list.is_empty() {
            self.postings.remove(term);
        }
        if purged > 0 {
            debug!(term = %term, purged, "Lazily removed stale postings");
        }

        results
    }

    /// Logically remove a file. Returns true if it was contained.
    ///
    /// The file's postings are cleaned lazily by later searches.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn remove_file(&mut self, path: &Path) -> bool {
        let path = normalize_path(path);
        match self.file_terms.remove_entry(path.as_path()) {
            Some((key, terms)) => {
                self.tombstone(key, terms);
                self.touch();
                true
            }
            None => {
                trace!("File not indexed, nothing to remove");
                false
            }
        }
    }

    /// Logically remove every contained file under `dir`.
    ///
    /// Matching is component-wise on normalized paths, so `/a/b` does not
    /// cover `/a/bc`. The filesystem is not consulted. Returns the number of
    /// files removed.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub fn remove_directory(&mut self, dir: &Path) -> usize {
        let dir = normalize_path(dir);
        let under: Vec<Arc<Path>> = self
            .file_terms
            .keys()
            .filter(|path| path.starts_with(&dir))
            .cloned()
            .collect();

        for key in &under {
            if let Some(terms) = self.file_terms.remove(key) {
                self.tombstone(key.clone(), terms);
            }
        }

        if !under.is_empty() {
            self.touch();
        }
        debug!(removed = under.len(), "Directory removed from index");
        under.len()
    }

    /// Purge every tombstoned path from the posting lists that hold it.
    ///
    /// Search results are unaffected; only storage shrinks.
    #[instrument(skip(self))]
    pub fn force_removes(&mut self) {
        let tombstones = std::mem::take(&mut self.pending);
        let mut purged = 0usize;

        for (path, terms) in tombstones {
            for term in terms {
                if let Some(list) = self.postings.get_mut(&term) {
                    if list.remove(&path) {
                        purged += 1;
                    }
                    if list.is_empty() {
                        self.postings.remove(&term);
                    }
                }
            }
        }

        info!(purged, "Forced removal of stale postings");
    }

    /// Re-index a file whose content changed.
    ///
    /// Fails with [`SiftError::InconsistentIndex`] if the file is not
    /// contained. Postings for terms the new content no longer has are
    /// removed immediately. Returns false when the term set is unchanged.
    #[instrument(skip(self, file), fields(path = %file.path.display()))]
    pub fn handle_file_modification(&mut self, file: DecodedFile) -> Result<bool> {
        let path = normalize_path(&file.path);
        if !self.contains_file(&path) {
            return Err(SiftError::inconsistent(
                path,
                "modified file is not in the index",
            ));
        }

        let new_terms = self.term_set(&file.content);
        let Some((key, old_terms)) = self.file_terms.remove_entry(path.as_path()) else {
            return Err(SiftError::inconsistent(path, "path has no term record"));
        };

        if old_terms == new_terms {
            self.file_terms.insert(key, old_terms);
            trace!("Term set unchanged");
            return Ok(false);
        }

        for term in old_terms.difference(&new_terms) {
            if let Some(list) = self.postings.get_mut(term) {
                list.remove(&key);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        for term in new_terms.difference(&old_terms) {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(key.clone());
        }

        self.file_terms.insert(key, new_terms);
        self.touch();
        Ok(true)
    }

    /// Get current occupancy figures.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            files: self.file_terms.len(),
            terms: self.postings.len(),
            postings: self.postings.values().map(PostingList::len).sum(),
            pending_removals: self.pending.len(),
            last_updated: self.last_updated,
        }
    }

    fn term_set(&self, content: &str) -> HashSet<Term> {
        self.tokenizer.tokenize(content).into_iter().collect()
    }

    fn insert_terms(&mut self, path: Arc<Path>, terms: HashSet<Term>) {
        // A re-added path must not stay hidden behind its old tombstone.
        self.purge_tombstone(&path);

        for term in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(path.clone());
        }
        self.file_terms.insert(path, terms);
        self.touch();
    }

    fn tombstone(&mut self, path: Arc<Path>, terms: HashSet<Term>) {
        if !terms.is_empty() {
            self.pending.insert(path, terms);
        }
    }

    fn purge_tombstone(&mut self, path: &Path) {
        let Some(terms) = self.pending.remove(path) else {
            return;
        };
        for term in terms {
            if let Some(list) = self.postings.get_mut(&term) {
                list.remove(path);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}

impl std::fmt::Debug for InvertedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvertedIndex")
            .field("tokenizer", &self.tokenizer.name())
            .field("files", &self.file_terms.len())
            .field("terms", &self.postings.len())
            .field("pending_removals", &self.pending.len())
            .finish()
    }
}
