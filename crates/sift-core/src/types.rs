//! Core data types for Sift.
//!
//! This module defines the value types flowing through the index:
//!
//! - **Term**: an immutable unit of searchable text
//! - **DecodedFile**: one file's text at a point in time
//! - **PostingList**: the set of paths posted under one term
//! - **IndexStats**: occupancy figures for the index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_set;
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A normalized, searchable unit of text produced by a tokenizer.
///
/// Terms compare by their exact text. Any normalization (case folding,
/// stemming) is the tokenizer's job and happens before a term is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term(String);

impl Term {
    /// Create a new term from its text
    pub fn new(text: impl Into<String>) -> Self {
        Term(text.into())
    }

    /// Get the term text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term(s)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term(s.to_string())
    }
}

/// A file's decoded text content at a point in time.
///
/// A change to the file on disk produces a new `DecodedFile`; existing
/// instances are never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    /// Path identifying the file (lexically normalized)
    pub path: PathBuf,

    /// Decoded text content
    pub content: String,
}

impl DecodedFile {
    /// Create a decoded file. The path is normalized lexically.
    pub fn new(path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        DecodedFile {
            path: normalize_path(path.as_ref()),
            content: content.into(),
        }
    }
}

/// The set of file paths posted under a single term.
///
/// A posting list may still physically hold paths that were logically
/// removed from the index; the index filters them out on read and drops
/// them from the list as it goes.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    paths: HashSet<Arc<Path>>,
}

impl PostingList {
    /// Create an empty posting list
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a path under this term. Returns false if it was already present.
    pub fn insert(&mut self, path: Arc<Path>) -> bool {
        self.paths.insert(path)
    }

    /// Remove a path from this list. Returns true if it was present.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.paths.remove(path)
    }

    /// Keep only the paths for which `keep` returns true
    pub fn retain(&mut self, keep: impl FnMut(&Arc<Path>) -> bool) {
        self.paths.retain(keep);
    }

    /// Number of physically stored paths
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True if no path is stored
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate over the physically stored paths
    pub fn iter(&self) -> hash_set::Iter<'_, Arc<Path>> {
        self.paths.iter()
    }
}

/// Occupancy figures for an index.
///
/// `postings` counts physically stored entries, including ones that are
/// pending lazy removal, so it shrinks after searches and `force_removes`
/// while search results stay the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of files currently contained in the index
    pub files: usize,

    /// Number of distinct terms with a non-empty posting list
    pub terms: usize,

    /// Total number of stored postings
    pub postings: usize,

    /// Number of paths still waiting for lazy removal
    pub pending_removals: usize,

    /// When the index content last changed
    pub last_updated: Option<DateTime<Utc>>,
}

/// Normalize a path lexically.
///
/// Drops `.` components and folds `..` into the preceding component. The
/// filesystem is never consulted, so symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else if !matches!(
                    normalized.components().next_back(),
                    Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term() {
        let t1 = Term::new("lorem");
        let t2 = Term::from("lorem");
        assert_eq!(t1, t2);
        assert_eq!(t1.as_str(), "lorem");
        assert_eq!(format!("{}", t1), "lorem");
        assert_ne!(Term::from("Lorem"), t1);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/data/./docs/../notes/a.txt")),
            PathBuf::from("/data/notes/a.txt")
        );
        assert_eq!(
            normalize_path(Path::new("/data/docs/")),
            PathBuf::from("/data/docs")
        );
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("../a")), PathBuf::from("../a"));
    }

    #[test]
    fn test_decoded_file_normalizes_path() {
        let file = DecodedFile::new("/data/./a.txt", "hello");
        assert_eq!(file.path, PathBuf::from("/data/a.txt"));
        assert_eq!(file.content, "hello");
    }

    #[test]
    fn test_posting_list() {
        let mut list = PostingList::new();
        let a: Arc<Path> = Arc::from(Path::new("/a.txt"));
        let b: Arc<Path> = Arc::from(Path::new("/b.txt"));

        assert!(list.insert(a.clone()));
        assert!(!list.insert(a.clone()));
        assert!(list.insert(b));
        assert_eq!(list.len(), 2);

        list.retain(|p| p.as_ref() != Path::new("/b.txt"));
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().map(|p| p.as_ref()), Some(Path::new("/a.txt")));

        assert!(list.remove(Path::new("/a.txt")));
        assert!(list.is_empty());
    }
}
