//! Change-notification boundary between monitors and consumers.
//!
//! This module defines the events a filesystem monitor emits and the handler
//! trait that consumes them. The index and bridge interact with monitors
//! only through these types, so a monitor implementation lives in its own
//! crate.

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of change a monitor detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A file or directory appeared under a watched directory
    Added,

    /// A file or directory disappeared
    Removed,

    /// A file's size or modification time changed
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Modified => write!(f, "modified"),
        }
    }
}

/// A filesystem change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The kind of change
    pub kind: ChangeKind,

    /// Path of the affected entry
    pub path: PathBuf,

    /// Whether the entry is (or was, for removals) a directory
    pub is_dir: bool,
}

impl ChangeEvent {
    /// Create an added event
    pub fn added(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        ChangeEvent {
            kind: ChangeKind::Added,
            path: path.into(),
            is_dir,
        }
    }

    /// Create a removed event
    pub fn removed(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        ChangeEvent {
            kind: ChangeKind::Removed,
            path: path.into(),
            is_dir,
        }
    }

    /// Create a modified event. Only files are ever modified.
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        ChangeEvent {
            kind: ChangeKind::Modified,
            path: path.into(),
            is_dir: false,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = if self.is_dir { "directory" } else { "file" };
        write!(f, "{} {} {}", self.kind, entry, self.path.display())
    }
}

/// Handler for filesystem change events.
///
/// Monitors call these methods synchronously from their own thread, one
/// event at a time; the monitor does not look for further changes until the
/// call returns.
pub trait ChangeHandler: Send + Sync {
    /// Called when an entry appears
    fn on_added(&self, path: &Path, is_dir: bool) -> anyhow::Result<()>;

    /// Called when an entry disappears
    fn on_removed(&self, path: &Path, is_dir: bool) -> anyhow::Result<()>;

    /// Called when a file's content fingerprint changes
    fn on_modified(&self, path: &Path) -> anyhow::Result<()>;

    /// Route an event to the matching callback
    fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        match event.kind {
            ChangeKind::Added => self.on_added(&event.path, event.is_dir),
            ChangeKind::Removed => self.on_removed(&event.path, event.is_dir),
            ChangeKind::Modified => self.on_modified(&event.path),
        }
    }
}

/// A channel-based change handler implementation
pub struct ChannelChangeHandler {
    sender: Sender<ChangeEvent>,
}

impl ChannelChangeHandler {
    /// Create a new channel-based handler
    pub fn new() -> (Self, Receiver<ChangeEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (ChannelChangeHandler { sender }, receiver)
    }

    fn forward(&self, event: ChangeEvent) -> anyhow::Result<()> {
        self.sender
            .send(event)
            .map_err(|e| anyhow::anyhow!("change receiver dropped: {}", e.0))
    }
}

impl ChangeHandler for ChannelChangeHandler {
    fn on_added(&self, path: &Path, is_dir: bool) -> anyhow::Result<()> {
        self.forward(ChangeEvent::added(path, is_dir))
    }

    fn on_removed(&self, path: &Path, is_dir: bool) -> anyhow::Result<()> {
        self.forward(ChangeEvent::removed(path, is_dir))
    }

    fn on_modified(&self, path: &Path) -> anyhow::Result<()> {
        self.forward(ChangeEvent::modified(path))
    }
}
