//! # Sift Core Library
//!
//! This crate provides the in-memory full-text index behind Sift and the
//! plumbing that keeps it current from filesystem change events. It never
//! watches the filesystem itself; monitors live in their own crate and talk
//! to the index through the `backend` traits.
//!
//! ## Architecture
//!
//! - **Types** (`types`): Terms, decoded files, posting lists, stats
//! - **Tokenizer** (`tokenizer`): Pluggable text → terms function
//! - **Decoder** (`decoder`): Pluggable path → text reader
//! - **Index** (`index`): Inverted index with lazy tombstone removal
//! - **Concurrent** (`concurrent`): Single-writer/multi-reader wrapper
//! - **Backend** (`backend`): Change events and the handler trait
//! - **Bridge** (`bridge`): Handler that applies change events to the index
//! - **Config** (`config`): Configuration management
//!
//! ## Example
//!
//! ```rust
//! use sift_core::{ConcurrentIndex, DecodedFile, Term, WordTokenizer};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let index = ConcurrentIndex::new(Arc::new(WordTokenizer::default()));
//! index.add_file(DecodedFile::new("/notes/todo.txt", "buy milk"));
//!
//! assert!(index.search(&Term::from("milk")).contains(Path::new("/notes/todo.txt")));
//!
//! index.remove_file(Path::new("/notes/todo.txt"));
//! assert!(index.search(&Term::from("milk")).is_empty());
//! ```

pub mod backend;
pub mod bridge;
pub mod concurrent;
pub mod config;
pub mod decoder;
pub mod error;
pub mod index;
pub mod tokenizer;
pub mod types;

// Re-export commonly used types
pub use backend::{ChangeEvent, ChangeHandler, ChangeKind, ChannelChangeHandler};
pub use bridge::IndexBridge;
pub use concurrent::ConcurrentIndex;
pub use config::{Config, ExcludeFilter};
pub use decoder::{FileDecoder, Utf8Decoder};
pub use error::{Result, SiftError};
pub use index::InvertedIndex;
pub use tokenizer::{Tokenizer, WordTokenizer};
pub use types::{normalize_path, DecodedFile, IndexStats, PostingList, Term};
