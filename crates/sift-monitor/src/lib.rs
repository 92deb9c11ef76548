//! # Sift Directory Monitor
//!
//! This crate watches directory trees and keeps a `sift-core` index in sync
//! with them. It uses:
//!
//! - **Snapshot diffing** to turn directory state into added, removed and
//!   modified events, each reported exactly once
//! - **OS notifications** (inotify, FSEvents, ReadDirectoryChangesW through
//!   `notify`) to react promptly, with periodic full diffs as the fallback
//!
//! ## Architecture
//!
//! - `snapshot.rs`: Arena tree mirroring a watched directory, and its diff
//! - `monitor.rs`: `DirMonitor`, the blocking watch loop and its lifecycle
//! - `indexer.rs`: `FsIndexer`, one index fed by any number of monitors
//!
//! ## Example
//!
//! ```rust,no_run
//! use sift_core::{Config, Term};
//! use sift_monitor::FsIndexer;
//! use std::path::Path;
//!
//! let indexer = FsIndexer::new(Config::default())?;
//! indexer.watch_directory(Path::new("/home/me/notes"))?;
//!
//! for path in indexer.search(&Term::from("milk")) {
//!     println!("{}", path.display());
//! }
//! # Ok::<(), sift_monitor::MonitorError>(())
//! ```

pub mod indexer;
pub mod monitor;
pub mod snapshot;

/// Error types specific to monitoring
pub mod error;

pub use error::{MonitorError, Result};
pub use indexer::FsIndexer;
pub use monitor::{DirMonitor, MonitorState};
pub use snapshot::{EntryKind, Fingerprint, Snapshot};

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(sift_core::Config::default().env_filter())
        .with_test_writer()
        .try_init();
}
