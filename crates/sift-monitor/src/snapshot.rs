//! In-memory mirror of a watched directory tree.
//!
//! The snapshot records every entry under the watched root with its kind and
//! a change fingerprint. Diffing a directory against the disk turns raw
//! directory state into change events and updates the snapshot in place, so
//! the same change is never reported twice.
//!
//! ## Storage
//!
//! Nodes live in a flat arena (`Vec<Node>`) and refer to each other by
//! index. Freed slots are recycled through a free list. Node 0 is always the
//! root.
//!
//! ## Event Order
//!
//! - Additions are reported parent first, then the directory's contents.
//! - Removals are reported leaf first, the directory itself last.
//! - Within one directory, removals are reported before additions, so an
//!   entry that changed kind yields `removed` followed by `added`.

use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use sift_core::{ChangeEvent, ExcludeFilter};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

type NodeId = usize;

const ROOT: NodeId = 0;

/// Kind of a snapshot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// What the monitor compares to decide that a file was modified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fingerprint {
    /// Size in bytes
    pub len: u64,

    /// Last modification time, if the platform reports one
    pub modified: Option<DateTime<Utc>>,
}

impl Fingerprint {
    fn of(metadata: &fs::Metadata) -> Self {
        Fingerprint {
            len: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: OsString,
    kind: EntryKind,
    fingerprint: Fingerprint,
    parent: Option<NodeId>,
    children: BTreeMap<OsString, NodeId>,
}

impl Node {
    fn vacant() -> Self {
        Node {
            name: OsString::new(),
            kind: EntryKind::File,
            fingerprint: Fingerprint::default(),
            parent: None,
            children: BTreeMap::new(),
        }
    }
}

/// One directory entry as currently found on disk
type Listing = BTreeMap<OsString, (EntryKind, Fingerprint)>;

/// Snapshot of a watched directory tree.
pub struct Snapshot {
    root: PathBuf,
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    exclude: ExcludeFilter,
}

impl Snapshot {
    /// Record the current state of the tree under `root`.
    ///
    /// No events are produced for entries that already exist.
    pub fn build(root: &Path, exclude: ExcludeFilter) -> Result<Self> {
        let metadata = fs::metadata(root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MonitorError::NotADirectory {
                path: root.to_path_buf(),
            },
            _ => MonitorError::Io(e),
        })?;
        if !metadata.is_dir() {
            return Err(MonitorError::NotADirectory {
                path: root.to_path_buf(),
            });
        }

        let mut root_node = Node::vacant();
        root_node.kind = EntryKind::Directory;

        let mut snapshot = Snapshot {
            root: root.to_path_buf(),
            nodes: vec![root_node],
            free: Vec::new(),
            exclude,
        };

        let listing = snapshot.read_listing(root)?;
        for (name, (kind, fingerprint)) in listing {
            let path = root.join(&name);
            snapshot.add_subtree(ROOT, name, kind, fingerprint, &path, None);
        }

        debug!(root = %root.display(), entries = snapshot.len(), "Snapshot built");
        Ok(snapshot)
    }

    /// Number of entries below the root
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len() - 1
    }

    /// True if the root has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Diff the whole tree against the disk.
    pub fn rescan_all(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        let root = self.root.clone();
        self.diff_dir(ROOT, &root, true, &mut events);
        events
    }

    /// Diff the directory that holds `path` against the disk.
    ///
    /// Only that directory's direct entries are compared, plus full
    /// registration of any new subdirectory. When the directory itself is
    /// gone, the nearest ancestor that still exists is diffed instead. Paths
    /// outside the root fall back to a full diff.
    pub fn rescan_path(&mut self, path: &Path) -> Vec<ChangeEvent> {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            trace!(path = %path.display(), "Path outside snapshot root, full rescan");
            return self.rescan_all();
        };

        let mut components: Vec<_> = relative.components().collect();
        // Changes to an entry show up in its parent's listing.
        components.pop();

        // Deepest known directory on the way to `path`
        let mut chain = vec![(ROOT, self.root.clone())];
        for component in components {
            let (id, dir) = &chain[chain.len() - 1];
            match self.nodes[*id].children.get(component.as_os_str()) {
                Some(&child) if self.nodes[child].kind == EntryKind::Directory => {
                    let child_path = dir.join(component);
                    chain.push((child, child_path));
                }
                _ => break,
            }
        }

        while chain.len() > 1 && fs::symlink_metadata(&chain[chain.len() - 1].1).is_err() {
            chain.pop();
        }

        let mut events = Vec::new();
        if let Some((id, dir)) = chain.pop() {
            self.diff_dir(id, &dir, false, &mut events);
        }
        events
    }

    fn diff_dir(&mut self, id: NodeId, dir: &Path, recursive: bool, out: &mut Vec<ChangeEvent>) {
        let listing = match self.read_listing(dir) {
            Ok(listing) => listing,
            Err(MonitorError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Listing::new(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list directory, skipping diff");
                return;
            }
        };

        let known: Vec<(OsString, NodeId)> = self.nodes[id]
            .children
            .iter()
            .map(|(name, child)| (name.clone(), *child))
            .collect();

        for (name, child) in known {
            let still_there = matches!(
                listing.get(&name),
                Some((kind, _)) if *kind == self.nodes[child].kind
            );
            if !still_there {
                self.remove_subtree(child, &dir.join(&name), out);
            }
        }

        for (name, (kind, fingerprint)) in listing {
            let path = dir.join(&name);
            let Some(&child) = self.nodes[id].children.get(&name) else {
                self.add_subtree(id, name, kind, fingerprint, &path, Some(&mut *out));
                continue;
            };

            match kind {
                EntryKind::File => {
                    if self.nodes[child].fingerprint != fingerprint {
                        self.nodes[child].fingerprint = fingerprint;
                        out.push(ChangeEvent::modified(path));
                    }
                }
                EntryKind::Directory => {
                    if recursive {
                        self.diff_dir(child, &path, true, out);
                    }
                }
            }
        }
    }

    fn add_subtree(
        &mut self,
        parent: NodeId,
        name: OsString,
        kind: EntryKind,
        fingerprint: Fingerprint,
        path: &Path,
        mut out: Option<&mut Vec<ChangeEvent>>,
    ) {
        let id = self.alloc(Node {
            name: name.clone(),
            kind,
            fingerprint,
            parent: Some(parent),
            children: BTreeMap::new(),
        });
        self.nodes[parent].children.insert(name, id);

        if let Some(out) = out.as_deref_mut() {
            out.push(ChangeEvent::added(path, kind == EntryKind::Directory));
        }

        if kind == EntryKind::Directory {
            let listing = match self.read_listing(path) {
                Ok(listing) => listing,
                Err(e) => {
                    debug!(dir = %path.display(), error = %e, "Cannot list new directory");
                    return;
                }
            };
            for (child_name, (child_kind, child_fingerprint)) in listing {
                let child_path = path.join(&child_name);
                self.add_subtree(
                    id,
                    child_name,
                    child_kind,
                    child_fingerprint,
                    &child_path,
                    out.as_deref_mut(),
                );
            }
        }
    }

    fn remove_subtree(&mut self, id: NodeId, path: &Path, out: &mut Vec<ChangeEvent>) {
        if let Some(parent) = self.nodes[id].parent {
            let name = self.nodes[id].name.clone();
            self.nodes[parent].children.remove(&name);
        }
        self.release(id, path, out);
    }

    fn release(&mut self, id: NodeId, path: &Path, out: &mut Vec<ChangeEvent>) {
        let node = std::mem::replace(&mut self.nodes[id], Node::vacant());
        for (name, child) in node.children {
            self.release(child, &path.join(&name), out);
        }
        out.push(ChangeEvent::removed(path, node.kind == EntryKind::Directory));
        self.free.push(id);
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn read_listing(&self, dir: &Path) -> Result<Listing> {
        let mut listing = Listing::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if self.exclude.is_excluded(&name) {
                continue;
            }

            // Entries can vanish between listing and stat.
            let (file_type, metadata) = match (entry.file_type(), entry.metadata()) {
                (Ok(file_type), Ok(metadata)) => (file_type, metadata),
                _ => continue,
            };
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            listing.insert(name, (kind, Fingerprint::of(&metadata)));
        }
        Ok(listing)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("root", &self.root)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::ChangeKind;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    /// Layout: file1.txt, file2.txt, dir1/, dir2/subFile1.txt, dir2/nested/deep.txt
    fn make_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("file1.txt"), "file1 content").unwrap();
        fs::write(root.join("file2.txt"), "file2 content").unwrap();
        fs::create_dir(root.join("dir1")).unwrap();
        fs::create_dir_all(root.join("dir2/nested")).unwrap();
        fs::write(root.join("dir2/subFile1.txt"), "Lorem ipsum").unwrap();
        fs::write(root.join("dir2/nested/deep.txt"), "deep").unwrap();
        temp_dir
    }

    fn kind_of(snapshot: &Snapshot, path: &Path) -> Option<EntryKind> {
        let relative = path.strip_prefix(&snapshot.root).ok()?;
        let mut id = ROOT;
        for component in relative.components() {
            id = *snapshot.nodes[id].children.get(component.as_os_str())?;
        }
        Some(snapshot.nodes[id].kind)
    }

    fn count(events: &[ChangeEvent], kind: ChangeKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_build() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        assert_eq!(snapshot.len(), 7);
        assert_eq!(kind_of(&snapshot, &root.join("file1.txt")), Some(EntryKind::File));
        assert_eq!(kind_of(&snapshot, &root.join("dir2/nested")), Some(EntryKind::Directory));
        assert_eq!(kind_of(&snapshot, &root.join("missing")), None);
    }

    #[test]
    fn test_build_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = Snapshot::build(&temp_dir.path().join("nope"), ExcludeFilter::none()).unwrap_err();
        assert!(matches!(err, MonitorError::NotADirectory { .. }));

        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let err = Snapshot::build(&file, ExcludeFilter::none()).unwrap_err();
        assert!(matches!(err, MonitorError::NotADirectory { .. }));
    }

    #[test]
    fn test_no_changes_no_events() {
        let temp_dir = make_tree();
        let mut snapshot = Snapshot::build(temp_dir.path(), ExcludeFilter::none()).unwrap();
        assert!(snapshot.rescan_all().is_empty());
    }

    #[test]
    fn test_added_file() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        fs::write(root.join("dir1/new.txt"), "").unwrap();
        let events = snapshot.rescan_all();
        assert_eq!(events, vec![ChangeEvent::added(root.join("dir1/new.txt"), false)]);

        // Reported once only
        assert!(snapshot.rescan_all().is_empty());
    }

    #[test]
    fn test_moved_in_directory_reports_contents() {
        let temp_dir = make_tree();
        let outside = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        let staged = outside.path().join("dir3");
        fs::create_dir(&staged).unwrap();
        fs::write(staged.join("file1.txt"), "one").unwrap();
        fs::write(staged.join("file2.txt"), "two").unwrap();
        fs::rename(&staged, root.join("dir3")).unwrap();

        let events = snapshot.rescan_path(&root.join("dir3"));
        assert_eq!(
            events,
            vec![
                ChangeEvent::added(root.join("dir3"), true),
                ChangeEvent::added(root.join("dir3/file1.txt"), false),
                ChangeEvent::added(root.join("dir3/file2.txt"), false),
            ]
        );
        assert_eq!(kind_of(&snapshot, &root.join("dir3/file2.txt")), Some(EntryKind::File));
    }

    #[test]
    fn test_removed_files() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        fs::remove_file(root.join("file1.txt")).unwrap();
        fs::remove_file(root.join("file2.txt")).unwrap();

        let events = snapshot.rescan_all();
        assert_eq!(count(&events, ChangeKind::Removed), 2);
        assert_eq!(count(&events, ChangeKind::Added), 0);
        assert_eq!(count(&events, ChangeKind::Modified), 0);
        assert_eq!(snapshot.len(), 5);
    }

    #[test]
    fn test_removed_directory_is_leaf_first() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        fs::remove_dir_all(root.join("dir2")).unwrap();
        let events = snapshot.rescan_path(&root.join("dir2/nested/deep.txt"));

        assert_eq!(
            events,
            vec![
                ChangeEvent::removed(root.join("dir2/nested/deep.txt"), false),
                ChangeEvent::removed(root.join("dir2/nested"), true),
                ChangeEvent::removed(root.join("dir2/subFile1.txt"), false),
                ChangeEvent::removed(root.join("dir2"), true),
            ]
        );
        assert_eq!(kind_of(&snapshot, &root.join("dir2")), None);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_modified_file() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        append(&root.join("file1.txt"), "some text");
        let events = snapshot.rescan_path(&root.join("file1.txt"));
        assert_eq!(events, vec![ChangeEvent::modified(root.join("file1.txt"))]);
        assert!(snapshot.rescan_all().is_empty());
    }

    #[test]
    fn test_directories_never_modified() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        // Changes the directory's own metadata, which is not tracked
        fs::write(root.join("dir1/a.txt"), "").unwrap();
        fs::remove_file(root.join("dir1/a.txt")).unwrap();

        assert!(snapshot.rescan_all().is_empty());
    }

    #[test]
    fn test_kind_change() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        fs::remove_file(root.join("file2.txt")).unwrap();
        fs::create_dir(root.join("file2.txt")).unwrap();

        let events = snapshot.rescan_all();
        assert_eq!(
            events,
            vec![
                ChangeEvent::removed(root.join("file2.txt"), false),
                ChangeEvent::added(root.join("file2.txt"), true),
            ]
        );
    }

    #[test]
    fn test_rescan_path_outside_root_falls_back() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();

        fs::write(root.join("dir2/nested/late.txt"), "late").unwrap();
        let events = snapshot.rescan_path(Path::new("/somewhere/else/entirely"));
        assert_eq!(
            events,
            vec![ChangeEvent::added(root.join("dir2/nested/late.txt"), false)]
        );
    }

    #[test]
    fn test_excluded_entries() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();

        let exclude = ExcludeFilter::new(&[".git", "*.swp"]).unwrap();
        let mut snapshot = Snapshot::build(root, exclude).unwrap();
        assert_eq!(kind_of(&snapshot, &root.join(".git")), None);

        fs::write(root.join("file1.txt.swp"), "swap").unwrap();
        fs::write(root.join(".git/index"), "idx").unwrap();
        assert!(snapshot.rescan_all().is_empty());
    }

    #[test]
    fn test_slots_are_recycled() {
        let temp_dir = make_tree();
        let root = temp_dir.path();
        let mut snapshot = Snapshot::build(root, ExcludeFilter::none()).unwrap();
        let capacity = snapshot.nodes.len();

        fs::remove_dir_all(root.join("dir2")).unwrap();
        snapshot.rescan_all();
        fs::create_dir_all(root.join("dir4/a")).unwrap();
        fs::write(root.join("dir4/a/b.txt"), "b").unwrap();
        let events = snapshot.rescan_all();

        assert_eq!(count(&events, ChangeKind::Added), 3);
        assert_eq!(snapshot.nodes.len(), capacity);
    }
}
