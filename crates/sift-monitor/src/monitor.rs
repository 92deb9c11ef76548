//! Directory monitor.
//!
//! A [`DirMonitor`] watches one directory tree and reports every change to a
//! [`ChangeHandler`]. Detection is driven by a [`Snapshot`] diff:
//!
//! - OS notifications (via `notify`) trigger a diff of the directory that
//!   changed, so events arrive promptly
//! - a periodic full diff catches anything the OS did not report, and is the
//!   only mechanism when native notifications are unavailable
//!
//! Because both paths go through the same snapshot, each change is reported
//! exactly once no matter how many notifications describe it.
//!
//! `start_monitoring` blocks the calling thread until `stop_monitoring` is
//! called from another thread. Events are delivered synchronously on the
//! monitoring thread, one at a time.

use crate::error::{MonitorError, Result};
use crate::snapshot::Snapshot;
use crossbeam_channel::{select, Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use sift_core::{ChangeEvent, ChangeHandler, Config, ExcludeFilter};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Lifecycle of a monitor. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Created, not started
    Idle,

    /// Building the initial snapshot
    Starting,

    /// Reporting changes
    Monitoring,

    /// Finished; cannot be restarted
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "idle"),
            MonitorState::Starting => write!(f, "starting"),
            MonitorState::Monitoring => write!(f, "monitoring"),
            MonitorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// How a native notification is turned into snapshot diffs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rescan {
    /// Diff the directories holding the event's paths
    Paths,

    /// Diff the whole tree
    Full,
}

/// Watches a directory tree and reports changes to a handler.
pub struct DirMonitor {
    root: PathBuf,
    handler: Arc<dyn ChangeHandler>,
    poll_interval: Duration,
    native_events: bool,
    exclude: ExcludeFilter,
    state: Mutex<MonitorState>,
    state_changed: Condvar,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
}

impl DirMonitor {
    /// Create an idle monitor for `root` reporting to `handler`.
    pub fn new(root: impl Into<PathBuf>, handler: Arc<dyn ChangeHandler>) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        DirMonitor {
            root: root.into(),
            handler,
            poll_interval: DEFAULT_POLL_INTERVAL,
            native_events: true,
            exclude: ExcludeFilter::none(),
            state: Mutex::new(MonitorState::Idle),
            state_changed: Condvar::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Create an idle monitor using the `[monitor]` and `[exclude]` settings.
    pub fn from_config(
        root: impl Into<PathBuf>,
        handler: Arc<dyn ChangeHandler>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self::new(root, handler)
            .with_poll_interval(config.monitor.poll_interval())
            .with_native_events(config.monitor.native_events)
            .with_exclude(config.exclude_filter()?))
    }

    /// Set the interval between full diffs
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Enable or disable OS notifications
    pub fn with_native_events(mut self, enabled: bool) -> Self {
        self.native_events = enabled;
        self
    }

    /// Skip entries whose names match `exclude`
    pub fn with_exclude(mut self, exclude: ExcludeFilter) -> Self {
        self.exclude = exclude;
        self
    }

    /// The watched directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current lifecycle state
    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Monitor the directory until stopped.
    ///
    /// Records the current tree without reporting it, then reports every
    /// later change to the handler. Blocks until [`stop_monitoring`] is
    /// called. Handler errors are logged and do not end monitoring.
    ///
    /// Fails with [`MonitorError::InvalidState`] unless the monitor is idle,
    /// and with [`MonitorError::NotADirectory`] if the root is not a
    /// directory. The monitor is stopped afterwards in every case.
    ///
    /// [`stop_monitoring`]: DirMonitor::stop_monitoring
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn start_monitoring(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != MonitorState::Idle {
                return Err(MonitorError::InvalidState {
                    operation: "start".to_string(),
                    state: state.to_string(),
                });
            }
            *state = MonitorState::Starting;
        }
        self.state_changed.notify_all();

        info!("Starting directory monitor");
        let result = self.run();
        if let Err(e) = &result {
            error!(error = %e, "Directory monitor failed");
        }

        self.set_state(MonitorState::Stopped);
        info!("Directory monitor stopped");
        result
    }

    /// Ask the monitor to stop.
    ///
    /// Returns immediately; a running `start_monitoring` returns shortly
    /// after. Stopping is idempotent and an idle monitor that is stopped can
    /// no longer be started.
    pub fn stop_monitoring(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                MonitorState::Stopped => return,
                MonitorState::Idle => {}
                MonitorState::Starting | MonitorState::Monitoring => {
                    let _ = self.shutdown_tx.try_send(());
                }
            }
            *state = MonitorState::Stopped;
        }
        self.state_changed.notify_all();
        debug!(root = %self.root.display(), "Stop requested");
    }

    /// Block until the initial snapshot is taken.
    ///
    /// Returns true once the monitor is reporting changes, false if it
    /// stopped or `timeout` elapsed first.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while matches!(*state, MonitorState::Idle | MonitorState::Starting) {
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == MonitorState::Monitoring
    }

    fn set_state(&self, new_state: MonitorState) {
        *self.state.lock() = new_state;
        self.state_changed.notify_all();
    }

    fn run(&self) -> Result<()> {
        let mut snapshot = Snapshot::build(&self.root, self.exclude.clone())?;

        let (native_tx, native_rx) = crossbeam_channel::unbounded();
        let watcher = if self.native_events {
            match self.native_watcher(native_tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "Native notifications unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };
        let mut native_alive = watcher.is_some();
        let never = crossbeam_channel::never();

        {
            let mut state = self.state.lock();
            if *state != MonitorState::Starting {
                // Stopped while the snapshot was being built
                return Ok(());
            }
            *state = MonitorState::Monitoring;
        }
        self.state_changed.notify_all();
        info!(
            entries = snapshot.len(),
            native = native_alive,
            poll_ms = self.poll_interval.as_millis() as u64,
            "Monitoring"
        );

        let mut next_poll = Instant::now() + self.poll_interval;
        loop {
            let native = if native_alive { &native_rx } else { &never };
            let poll = crossbeam_channel::at(next_poll);

            select! {
                recv(self.shutdown_rx) -> _ => break,
                recv(native) -> message => match message {
                    Ok(Ok(event)) => self.handle_native(&mut snapshot, &event),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Native notification error, rescanning");
                        self.deliver(snapshot.rescan_all());
                    }
                    Err(_) => {
                        warn!("Native notifications disconnected, polling only");
                        native_alive = false;
                    }
                },
                recv(poll) -> _ => {
                    trace!("Periodic rescan");
                    self.deliver(snapshot.rescan_all());
                    next_poll = Instant::now() + self.poll_interval;
                }
            }
        }

        drop(watcher);
        Ok(())
    }

    fn native_watcher(&self, tx: Sender<notify::Result<Event>>) -> Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| MonitorError::watch(&self.root, e.to_string()))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| MonitorError::watch(&self.root, e.to_string()))?;

        Ok(watcher)
    }

    fn handle_native(&self, snapshot: &mut Snapshot, event: &Event) {
        match classify(event) {
            Ok(Some(Rescan::Paths)) => {
                for path in &event.paths {
                    self.deliver(snapshot.rescan_path(path));
                }
            }
            Ok(Some(Rescan::Full)) => self.deliver(snapshot.rescan_all()),
            Ok(None) => trace!(kind = ?event.kind, "Ignoring notification"),
            Err(e) => {
                // The next periodic rescan picks up whatever this was.
                warn!(error = %e, "Unclassified notification");
            }
        }
    }

    fn deliver(&self, events: Vec<ChangeEvent>) {
        for event in events {
            debug!(event = %event, "Change detected");
            if let Err(e) = self.handler.on_change(&event) {
                error!(event = %event, error = %e, "Change handler failed");
            }
        }
    }
}

impl fmt::Debug for DirMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirMonitor")
            .field("root", &self.root)
            .field("state", &self.state())
            .field("poll_interval", &self.poll_interval)
            .field("native_events", &self.native_events)
            .finish()
    }
}

/// Decide what a native notification means for the snapshot.
///
/// Access notifications change nothing and yield `None`. Notifications that
/// name no kind of change are reported as [`MonitorError::NotHandledEvent`].
fn classify(event: &Event) -> Result<Option<Rescan>> {
    if event.need_rescan() {
        return Ok(Some(Rescan::Full));
    }

    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) => {
            if event.paths.is_empty() {
                Ok(Some(Rescan::Full))
            } else {
                Ok(Some(Rescan::Paths))
            }
        }
        EventKind::Access(_) => Ok(None),
        other => Err(MonitorError::NotHandledEvent {
            kind: format!("{:?}", other),
            paths: event.paths.clone(),
        }),
    }
}
