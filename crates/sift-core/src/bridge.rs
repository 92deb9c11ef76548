//! Bridge from monitor events to index updates.
//!
//! `IndexBridge` is the [`ChangeHandler`] a monitor drives. It reads changed
//! files through a [`FileDecoder`] and applies the result to a shared
//! [`ConcurrentIndex`]. It is also where the two sides are reconciled:
//!
//! - an unreadable file on added/modified (usually deleted between detection
//!   and read) is skipped and logged
//! - an added event for a file already in the index refreshes its content
//! - a modified event for a file the index does not know adds it instead

use crate::backend::ChangeHandler;
use crate::concurrent::ConcurrentIndex;
use crate::decoder::FileDecoder;
use crate::error::SiftError;
use crate::types::DecodedFile;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies monitor events to a concurrent index.
pub struct IndexBridge {
    index: Arc<ConcurrentIndex>,
    decoder: Arc<dyn FileDecoder>,
}

impl IndexBridge {
    /// Create a bridge updating `index`, reading files with `decoder`.
    pub fn new(index: Arc<ConcurrentIndex>, decoder: Arc<dyn FileDecoder>) -> Self {
        IndexBridge { index, decoder }
    }

    /// The index this bridge updates
    pub fn index(&self) -> &Arc<ConcurrentIndex> {
        &self.index
    }

    fn read(&self, path: &Path, kind: &str) -> Option<DecodedFile> {
        match self.decoder.decode(path) {
            Ok(file) => Some(file),
            Err(e) => {
                let err = SiftError::decode(path, e);
                if err.is_vanished_file() {
                    debug!(path = %path.display(), event = kind, "Changed file vanished before read");
                } else {
                    warn!(
                        path = %path.display(),
                        event = kind,
                        error = %err,
                        "Cannot read changed file, skipping"
                    );
                }
                None
            }
        }
    }
}

impl ChangeHandler for IndexBridge {
    fn on_added(&self, path: &Path, is_dir: bool) -> anyhow::Result<()> {
        if is_dir {
            // Contents arrive as their own added events.
            debug!(path = %path.display(), "Directory added");
            return Ok(());
        }

        let Some(file) = self.read(path, "added") else {
            return Ok(());
        };

        // Upsert so a concurrent removal cannot strand a refresh.
        let changed = self.index.upsert_file(file)?;
        debug!(path = %path.display(), changed, "File added");
        Ok(())
    }

    fn on_removed(&self, path: &Path, is_dir: bool) -> anyhow::Result<()> {
        if is_dir {
            let removed = self.index.remove_directory(path);
            debug!(path = %path.display(), removed, "Directory removed");
        } else if !self.index.remove_file(path) {
            debug!(path = %path.display(), "Removed file was not indexed");
        }
        Ok(())
    }

    fn on_modified(&self, path: &Path) -> anyhow::Result<()> {
        let Some(file) = self.read(path, "modified") else {
            return Ok(());
        };

        match self.index.handle_file_modification(file.clone()) {
            Ok(changed) => {
                debug!(path = %path.display(), changed, "File re-indexed");
                Ok(())
            }
            Err(SiftError::InconsistentIndex { reason, .. }) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "Modified file was not indexed, adding it"
                );
                self.index.add_file(file);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
