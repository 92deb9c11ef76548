//! Live filesystem index.
//!
//! [`FsIndexer`] ties the pieces together: one shared [`ConcurrentIndex`],
//! and for every watched directory a [`DirMonitor`] running on its own
//! thread that feeds the index through an [`IndexBridge`].

use crate::error::{MonitorError, Result};
use crate::monitor::DirMonitor;
use parking_lot::Mutex;
use sift_core::{
    normalize_path, ConcurrentIndex, Config, DecodedFile, ExcludeFilter, FileDecoder,
    IndexBridge, IndexStats, InvertedIndex, SiftError, Term, Tokenizer, Utf8Decoder,
};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// A running monitor and the thread driving it
struct WatchedDir {
    monitor: Arc<DirMonitor>,
    thread: Option<JoinHandle<()>>,
}

impl WatchedDir {
    fn stop(mut self) {
        self.monitor.stop_monitoring();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(root = %self.monitor.root().display(), "Monitor thread panicked");
            }
        }
    }
}

/// A full-text index kept in sync with a set of watched directories.
pub struct FsIndexer {
    config: Config,
    index: Arc<ConcurrentIndex>,
    decoder: Arc<dyn FileDecoder>,
    exclude: ExcludeFilter,
    /// `None` marks a directory whose initial walk is still running
    watches: Mutex<HashMap<PathBuf, Option<WatchedDir>>>,
}

impl FsIndexer {
    /// Create an indexer with the tokenizer described by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let tokenizer = Arc::new(config.tokenizer());
        Self::with_tokenizer(config, tokenizer)
    }

    /// Create an indexer with a custom tokenizer.
    pub fn with_tokenizer(config: Config, tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {
        let index = InvertedIndex::new(tokenizer)
            .with_parallel_threshold(config.index.parallel_threshold);

        let mut decoder = Utf8Decoder::new();
        if let Some(limit) = config.index.max_file_size {
            decoder = decoder.with_max_file_size(limit);
        }

        Ok(FsIndexer {
            exclude: config.exclude_filter()?,
            index: Arc::new(ConcurrentIndex::from_index(index)),
            decoder: Arc::new(decoder),
            watches: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Replace the file decoder. Affects directories watched afterwards.
    pub fn with_decoder(mut self, decoder: Arc<dyn FileDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The shared index
    pub fn index(&self) -> &Arc<ConcurrentIndex> {
        &self.index
    }

    /// Directories currently being watched. Directories still in their
    /// initial walk are not listed.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .watches
            .lock()
            .iter()
            .filter(|(_, watched)| watched.is_some())
            .map(|(root, _)| root.clone())
            .collect();
        dirs.sort();
        dirs
    }

    /// Index every file under `dir` and keep it in sync.
    ///
    /// The monitor is started first and its snapshot taken before the tree
    /// is walked, so no change falls between the two. Files that cannot be
    /// read are skipped and logged. Returns the number of files added by the
    /// walk.
    ///
    /// If the directory is unwatched or the indexer closed while the walk
    /// runs, the monitor is stopped, the walk's files are dropped again and
    /// a [`MonitorError::Watch`] error is returned.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub fn watch_directory(&self, dir: &Path) -> Result<usize> {
        let root = fs::canonicalize(dir)?;
        if !root.is_dir() {
            return Err(MonitorError::NotADirectory { path: root });
        }

        {
            let mut watches = self.watches.lock();
            if watches.contains_key(&root) {
                return Err(MonitorError::AlreadyWatched { path: root });
            }
            watches.insert(root.clone(), None);
        }

        let (watched, added) = match self.start_watch(&root) {
            Ok(started) => started,
            Err(e) => {
                self.watches.lock().remove(&root);
                return Err(e);
            }
        };

        {
            let mut watches = self.watches.lock();
            if matches!(watches.get(&root), Some(None)) {
                watches.insert(root, Some(watched));
                info!(added, "Watching directory");
                return Ok(added);
            }
        }

        watched.stop();
        self.index.remove_directory(&root);
        Err(MonitorError::watch(&root, "watch cancelled during initial walk"))
    }

    /// Stop watching `dir` and drop its files from the index.
    ///
    /// Returns false if `dir` was not being watched.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub fn unwatch_directory(&self, dir: &Path) -> bool {
        let root = fs::canonicalize(dir).unwrap_or_else(|_| normalize_path(dir));
        let Some(watched) = self.watches.lock().remove(&root) else {
            debug!("Directory was not watched");
            return false;
        };

        // A pending watch notices its entry is gone and stops its own monitor.
        if let Some(watched) = watched {
            watched.stop();
        }
        let removed = self.index.remove_directory(&root);
        info!(removed, "Stopped watching directory");
        true
    }

    /// Read and index a single file.
    ///
    /// Returns false if the file was already indexed.
    pub fn add_file(&self, path: &Path) -> Result<bool> {
        let file = self.decode(path)?;
        Ok(self.index.add_file(file))
    }

    /// Files containing `term`
    pub fn search(&self, term: &Term) -> BTreeSet<PathBuf> {
        self.index.search(term)
    }

    /// Files containing every term of `query`, tokenized like file content.
    pub fn search_text(&self, query: &str) -> BTreeSet<PathBuf> {
        let mut terms = self.index.tokenizer().tokenize(query);
        terms.sort();
        terms.dedup();
        self.index.search_all(&terms)
    }

    /// Check whether a file is indexed and not removed
    pub fn contains_file(&self, path: &Path) -> bool {
        self.index.contains_file(path)
    }

    /// Purge all pending removals now
    pub fn force_removes(&self) {
        self.index.force_removes();
    }

    /// Occupancy figures of the shared index
    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Stop every monitor and wait for its thread to exit.
    pub fn close(&self) {
        let watches: Vec<(PathBuf, Option<WatchedDir>)> = self.watches.lock().drain().collect();
        for (root, watched) in watches {
            if let Some(watched) = watched {
                debug!(root = %root.display(), "Stopping monitor");
                watched.stop();
            }
        }
    }

    /// Start the monitor for `root`, then walk the tree and add its files.
    fn start_watch(&self, root: &Path) -> Result<(WatchedDir, usize)> {
        let bridge = Arc::new(IndexBridge::new(self.index.clone(), self.decoder.clone()));
        let monitor = Arc::new(
            DirMonitor::new(root, bridge)
                .with_poll_interval(self.config.monitor.poll_interval())
                .with_native_events(self.config.monitor.native_events)
                .with_exclude(self.exclude.clone()),
        );

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let thread = thread::Builder::new()
            .name(format!("sift-monitor-{}", name))
            .spawn({
                let monitor = monitor.clone();
                move || {
                    if let Err(e) = monitor.start_monitoring() {
                        error!(root = %monitor.root().display(), error = %e, "Monitor exited with error");
                    }
                }
            })?;

        let watched = WatchedDir {
            monitor,
            thread: Some(thread),
        };

        if !watched.monitor.wait_until_ready(self.config.monitor.ready_timeout()) {
            watched.stop();
            return Err(MonitorError::watch(root, "monitor did not become ready"));
        }

        let files = match self.scan(root) {
            Ok(files) => files,
            Err(e) => {
                watched.stop();
                return Err(e);
            }
        };

        // The monitor may already have reported a deletion that the walk
        // raced with. Files are re-checked while removals are held off.
        let found = files.len();
        let added = self
            .index
            .add_files_retaining(files, |file| fs::metadata(&file.path).is_ok());
        debug!(found, added, "Initial walk indexed");

        Ok((watched, added))
    }

    fn decode(&self, path: &Path) -> std::result::Result<DecodedFile, SiftError> {
        self.decoder
            .decode(path)
            .map_err(|e| SiftError::decode(path, e))
    }

    fn scan(&self, root: &Path) -> Result<Vec<DecodedFile>> {
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.exclude.is_excluded(entry.file_name()));

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_dir() {
                continue;
            }
            match self.decode(entry.path()) {
                Ok(file) => files.push(file),
                Err(e) if e.is_vanished_file() => {
                    warn!(path = %entry.path().display(), "File vanished during walk, skipping");
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Cannot read file, skipping");
                }
            }
        }
        Ok(files)
    }
}

impl Drop for FsIndexer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FsIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsIndexer")
            .field("index", &self.index)
            .field("watched", &self.watched_directories())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn test_config() -> Config {
        crate::init_test_logging();
        let mut config = Config::default();
        config.monitor.poll_interval_ms = 50;
        config
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    /// Decodes like [`Utf8Decoder`] but deletes `victim` right after reading it.
    struct DeletingDecoder {
        inner: Utf8Decoder,
        victim: PathBuf,
    }

    impl FileDecoder for DeletingDecoder {
        fn decode(&self, path: &Path) -> io::Result<DecodedFile> {
            let file = self.inner.decode(path)?;
            if path == self.victim {
                fs::remove_file(path)?;
                thread::sleep(Duration::from_millis(500));
            }
            Ok(file)
        }
    }

    /// Signals on `started`, then sleeps before every decode.
    struct SlowDecoder {
        inner: Utf8Decoder,
        delay: Duration,
        started: crossbeam_channel::Sender<()>,
    }

    impl FileDecoder for SlowDecoder {
        fn decode(&self, path: &Path) -> io::Result<DecodedFile> {
            let _ = self.started.send(());
            thread::sleep(self.delay);
            self.inner.decode(path)
        }
    }

    fn slow_indexer() -> (FsIndexer, crossbeam_channel::Receiver<()>) {
        let (started, started_rx) = crossbeam_channel::unbounded();
        let decoder = SlowDecoder {
            inner: Utf8Decoder::new(),
            delay: Duration::from_millis(300),
            started,
        };
        let indexer = FsIndexer::new(test_config())
            .unwrap()
            .with_decoder(Arc::new(decoder));
        (indexer, started_rx)
    }

    fn make_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "alpha shared").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), "beta shared").unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "alpha hidden").unwrap();
        temp_dir
    }

    #[test]
    fn test_watch_indexes_existing_files() {
        let temp_dir = make_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();

        let indexer = FsIndexer::new(test_config()).unwrap();
        assert_eq!(indexer.watch_directory(&root).unwrap(), 2);
        assert_eq!(indexer.watched_directories(), vec![root.clone()]);

        let hits = indexer.search(&Term::from("shared"));
        assert_eq!(
            hits.into_iter().collect::<Vec<_>>(),
            vec![root.join("a.txt"), root.join("sub/b.txt")]
        );

        // Excluded by the default config
        assert!(!indexer.contains_file(&root.join(".git/config")));
        assert_eq!(indexer.stats().files, 2);
    }

    #[test]
    fn test_watch_twice_rejected() {
        let temp_dir = make_tree();
        let indexer = FsIndexer::new(test_config()).unwrap();
        indexer.watch_directory(temp_dir.path()).unwrap();

        let err = indexer.watch_directory(temp_dir.path()).unwrap_err();
        assert!(matches!(err, MonitorError::AlreadyWatched { .. }));
    }

    #[test]
    fn test_watch_rejects_files_and_missing_dirs() {
        let temp_dir = make_tree();
        let indexer = FsIndexer::new(test_config()).unwrap();

        let err = indexer.watch_directory(&temp_dir.path().join("a.txt")).unwrap_err();
        assert!(matches!(err, MonitorError::NotADirectory { .. }));

        let err = indexer.watch_directory(&temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, MonitorError::Io(_)));
        assert!(indexer.watched_directories().is_empty());
    }

    #[test]
    fn test_file_deleted_during_walk_not_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let victim = root.join("victim.txt");
        fs::write(&victim, "ghost").unwrap();
        fs::write(root.join("keep.txt"), "kept").unwrap();

        let decoder = DeletingDecoder {
            inner: Utf8Decoder::new(),
            victim: victim.clone(),
        };
        let indexer = FsIndexer::new(test_config())
            .unwrap()
            .with_decoder(Arc::new(decoder));

        assert_eq!(indexer.watch_directory(&root).unwrap(), 1);
        assert!(!indexer.contains_file(&victim));
        assert!(indexer.search(&Term::from("ghost")).is_empty());
        assert!(indexer.contains_file(&root.join("keep.txt")));

        // Still gone after the monitor has polled a few times
        thread::sleep(Duration::from_millis(300));
        assert!(!indexer.contains_file(&victim));
    }

    #[test]
    fn test_unreadable_files_skipped_during_walk() {
        let temp_dir = TempDir::new().unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        fs::write(root.join("ok.txt"), "tiny").unwrap();
        fs::write(root.join("big.txt"), "far too long").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("missing.txt"), root.join("dangling.txt")).unwrap();

        let mut config = test_config();
        config.index.max_file_size = Some(4);
        let indexer = FsIndexer::new(config).unwrap();

        assert_eq!(indexer.watch_directory(&root).unwrap(), 1);
        assert_eq!(indexer.watched_directories(), vec![root.clone()]);
        assert!(indexer.search(&Term::from("tiny")).contains(&root.join("ok.txt")));
        assert!(!indexer.contains_file(&root.join("big.txt")));
        assert!(!indexer.contains_file(&root.join("dangling.txt")));
    }

    #[test]
    fn test_watches_not_blocked_by_initial_walk() {
        let temp_dir = make_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let other = make_tree();
        let (indexer, started) = slow_indexer();

        thread::scope(|s| {
            let pending = s.spawn(|| indexer.watch_directory(&root));
            started.recv_timeout(Duration::from_secs(10)).unwrap();

            let start = Instant::now();
            assert!(indexer.watched_directories().is_empty());
            assert!(!indexer.unwatch_directory(other.path()));
            assert!(start.elapsed() < Duration::from_millis(200));

            let err = indexer.watch_directory(&root).unwrap_err();
            assert!(matches!(err, MonitorError::AlreadyWatched { .. }));

            assert_eq!(pending.join().unwrap().unwrap(), 2);
        });
        assert_eq!(indexer.watched_directories(), vec![root]);
    }

    #[test]
    fn test_unwatch_during_initial_walk() {
        let temp_dir = make_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let (indexer, started) = slow_indexer();

        thread::scope(|s| {
            let pending = s.spawn(|| indexer.watch_directory(&root));
            started.recv_timeout(Duration::from_secs(10)).unwrap();

            assert!(indexer.unwatch_directory(&root));
            let err = pending.join().unwrap().unwrap_err();
            assert!(matches!(err, MonitorError::Watch { .. }));
        });

        assert!(indexer.watched_directories().is_empty());
        assert!(!indexer.contains_file(&root.join("a.txt")));
        assert!(indexer.search(&Term::from("shared")).is_empty());

        // The directory can be watched again
        assert_eq!(indexer.watch_directory(&root).unwrap(), 2);
    }

    #[test]
    fn test_live_updates() {
        let temp_dir = make_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let indexer = FsIndexer::new(test_config()).unwrap();
        indexer.watch_directory(&root).unwrap();

        let new_file = root.join("sub/c.txt");
        fs::write(&new_file, "gamma").unwrap();
        assert!(wait_for(|| indexer.search(&Term::from("gamma")).contains(&new_file)));

        fs::write(root.join("a.txt"), "rewritten").unwrap();
        assert!(wait_for(|| indexer.search(&Term::from("rewritten")).contains(&root.join("a.txt"))));
        assert!(indexer.search(&Term::from("alpha")).is_empty());

        fs::remove_dir_all(root.join("sub")).unwrap();
        assert!(wait_for(|| !indexer.contains_file(&new_file)));
        assert!(wait_for(|| !indexer.contains_file(&root.join("sub/b.txt"))));
        assert!(indexer.search(&Term::from("beta")).is_empty());
    }

    #[test]
    fn test_unwatch_removes_files() {
        let temp_dir = make_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let indexer = FsIndexer::new(test_config()).unwrap();
        indexer.watch_directory(&root).unwrap();

        assert!(indexer.unwatch_directory(&root));
        assert!(!indexer.unwatch_directory(&root));
        assert!(indexer.watched_directories().is_empty());
        assert!(!indexer.contains_file(&root.join("a.txt")));
        assert!(indexer.search(&Term::from("shared")).is_empty());

        // No longer monitored
        fs::write(root.join("late.txt"), "late").unwrap();
        thread::sleep(Duration::from_millis(300));
        assert!(!indexer.contains_file(&root.join("late.txt")));
    }

    #[test]
    fn test_search_text() {
        let temp_dir = make_tree();
        let mut config = test_config();
        config.index.lowercase_terms = true;
        let indexer = FsIndexer::new(config).unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        indexer.watch_directory(&root).unwrap();

        let hits = indexer.search_text("Shared ALPHA");
        assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec![root.join("a.txt")]);
        assert_eq!(indexer.search_text("shared").len(), 2);
        assert!(indexer.search_text("   ").is_empty());
        assert!(indexer.search_text("alpha missing").is_empty());
    }

    #[test]
    fn test_add_file_without_watching() {
        let temp_dir = make_tree();
        let indexer = FsIndexer::new(test_config()).unwrap();
        let path = temp_dir.path().join("a.txt");

        assert!(indexer.add_file(&path).unwrap());
        assert!(!indexer.add_file(&path).unwrap());
        assert!(indexer.contains_file(&path));

        let err = indexer.add_file(&temp_dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, MonitorError::Core(SiftError::Decode { .. })));
    }

    #[test]
    fn test_custom_tokenizer() {
        let temp_dir = make_tree();
        let tokenizer = |text: &str| -> Vec<Term> {
            text.split('a').filter(|s| !s.is_empty()).map(Term::from).collect()
        };
        let indexer = FsIndexer::with_tokenizer(test_config(), Arc::new(tokenizer)).unwrap();
        let path = temp_dir.path().join("a.txt");
        indexer.add_file(&path).unwrap();

        assert!(indexer.search(&Term::from("lph")).contains(&path));
    }

    #[test]
    fn test_close_stops_monitors() {
        let first = make_tree();
        let second = make_tree();
        let indexer = FsIndexer::new(test_config()).unwrap();
        indexer.watch_directory(first.path()).unwrap();
        indexer.watch_directory(second.path()).unwrap();
        assert_eq!(indexer.watched_directories().len(), 2);

        indexer.close();
        assert!(indexer.watched_directories().is_empty());
        // The index itself survives
        assert_eq!(indexer.stats().files, 4);
    }

    #[test]
    fn test_force_removes() {
        let temp_dir = make_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let indexer = FsIndexer::new(test_config()).unwrap();
        indexer.watch_directory(&root).unwrap();

        indexer.index().remove_file(&root.join("a.txt"));
        assert!(indexer.stats().pending_removals > 0);
        indexer.force_removes();
        assert_eq!(indexer.stats().pending_removals, 0);
    }
}
