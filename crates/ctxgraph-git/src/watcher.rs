use crate::{errors::*, types::*};
use ctxgraph_core::{ChangeType, FileChangeEvent};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Map a notify event kind onto the change vocabulary of the cache.
/// Access and metadata-only events carry no content change.
pub fn change_type_for(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Create),
        EventKind::Remove(_) => Some(ChangeType::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeType::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeType::Create),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeType::Modify),
        _ => None,
    }
}

fn inside_dot_git(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".git")
}

/// Fold a later change of a path into the one already pending for it.
fn coalesce(pending: ChangeType, next: ChangeType) -> ChangeType {
    match (pending, next) {
        (ChangeType::Delete, ChangeType::Create) => ChangeType::Modify,
        (ChangeType::Delete, ChangeType::Modify) => ChangeType::Modify,
        (ChangeType::Create, ChangeType::Modify) => ChangeType::Create,
        (_, next) => next,
    }
}

/// Trailing-edge debounce: a path is emitted once it has been quiet for the
/// debounce period, carrying the coalesced change of its burst. Emitted paths
/// are forgotten.
#[derive(Debug)]
struct Debouncer {
    quiet: Duration,
    pending: HashMap<String, (ChangeType, Instant)>,
}

impl Debouncer {
    fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: HashMap::new(),
        }
    }

    fn push(&mut self, event: FileChangeEvent, now: Instant) {
        self.pending
            .entry(event.path)
            .and_modify(|(change, seen)| {
                *change = coalesce(*change, event.change);
                *seen = now;
            })
            .or_insert((event.change, now));
    }

    /// Time until the earliest pending path becomes due.
    fn next_due(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|(_, seen)| (*seen + self.quiet).saturating_duration_since(now))
            .min()
    }

    fn take_due(&mut self, now: Instant) -> Vec<FileChangeEvent> {
        let quiet = self.quiet;
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) >= quiet)
            .map(|(path, _)| path.clone())
            .collect();
        let mut events: Vec<FileChangeEvent> = due
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|(change, _)| FileChangeEvent::new(path, change))
            })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }

    fn take_all(&mut self) -> Vec<FileChangeEvent> {
        let mut events: Vec<FileChangeEvent> = self
            .pending
            .drain()
            .map(|(path, (change, _))| FileChangeEvent::new(path, change))
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}

/// Recursive file-system watcher pushing debounced change events into a
/// bounded channel. Dropping the watcher stops event delivery.
pub struct RepoWatcher {
    _inner: RecommendedWatcher,
}

impl RepoWatcher {
    /// Delivery blocks the debounce thread while `sender`'s channel is full.
    pub fn start<P: AsRef<Path>>(
        path: P,
        opts: WatchOptions,
        sender: mpsc::Sender<FileChangeEvent>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = std::sync::mpsc::channel::<FileChangeEvent>();
        let ignore_dot_git = opts.ignore_dot_git;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let Some(change) = change_type_for(&event.kind) else {
                    return;
                };
                for p in &event.paths {
                    if ignore_dot_git && inside_dot_git(p) {
                        continue;
                    }
                    let _ = tx.send(FileChangeEvent::new(p.to_string_lossy(), change));
                }
            }
            Err(e) => warn!("File watcher error: {}", e),
        })?;

        watcher.configure(Config::default())?;
        watcher.watch(&path, RecursiveMode::Recursive)?;

        // Debounce thread
        std::thread::Builder::new()
            .name("ctxgraph-watch".to_string())
            .spawn(move || {
                let mut debouncer = Debouncer::new(Duration::from_millis(opts.debounce_ms));
                loop {
                    let wait = debouncer
                        .next_due(Instant::now())
                        .unwrap_or(Duration::from_secs(3600));
                    let ready = match rx.recv_timeout(wait) {
                        Ok(event) => {
                            debouncer.push(event, Instant::now());
                            debouncer.take_due(Instant::now())
                        }
                        Err(RecvTimeoutError::Timeout) => debouncer.take_due(Instant::now()),
                        Err(RecvTimeoutError::Disconnected) => {
                            for event in debouncer.take_all() {
                                let _ = sender.blocking_send(event);
                            }
                            break;
                        }
                    };
                    if ready
                        .into_iter()
                        .any(|event| sender.blocking_send(event).is_err())
                    {
                        debug!("Change event receiver dropped, stopping watcher thread");
                        break;
                    }
                }
            })?;

        debug!("Watching {}", path.display());
        Ok(Self { _inner: watcher })
    }
}
