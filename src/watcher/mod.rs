//! Vault file watcher
//!
//! Debounced, coalescing event source over OS change notifications.
//! Pipeline: notify callback thread → unbounded channel → one async drain
//! loop that folds raw events into [`DebounceQueue`] and broadcasts expired
//! entries to subscribers (shadow-cache sync, rule dispatch, git
//! auto-commit).
//!
//! Only paths matching the configured globs pass (default `**/*.md`), and
//! anything under a dot-directory (`.weaver`, `.git`) is ignored. Events
//! for distinct paths are unordered; per path, subscribers see the final
//! coalesced state of each window.

mod debounce;

pub use debounce::DebounceQueue;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WeaverError};

/// Filesystem change flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Add,
    Change,
    Unlink,
}

impl WatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }
}

/// One debounced, coalesced change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub absolute_path: PathBuf,
    pub relative_path: String,
}

struct RawEvent {
    kind: WatchKind,
    absolute: PathBuf,
}

/// Handle to the running watcher
pub struct VaultWatcher {
    events: broadcast::Sender<WatchEvent>,
    cancel: CancellationToken,
    drain_done: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    // Held so the OS handle stays registered until stop.
    _os_watcher: RecommendedWatcher,
}

impl VaultWatcher {
    /// Register with the OS and start the drain loop.
    pub fn start(
        vault_root: &Path,
        patterns: &[String],
        debounce_window: Duration,
        parent_cancel: &CancellationToken,
    ) -> Result<Self> {
        let globs = build_globset(patterns)?;
        let root = vault_root.to_path_buf();

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let (event_tx, _) = broadcast::channel(1024);

        let callback_root = root.clone();
        let mut os_watcher = notify::recommended_watcher(
            move |result: std::result::Result<notify::Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "watcher backend error");
                        return;
                    }
                };
                let Some(kind) = map_event_kind(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    if path.starts_with(&callback_root) {
                        let _ = raw_tx.send(RawEvent {
                            kind,
                            absolute: path,
                        });
                    }
                }
            },
        )?;
        os_watcher.watch(&root, RecursiveMode::Recursive)?;

        let cancel = parent_cancel.child_token();
        let drain = tokio::spawn(drain_loop(
            root,
            globs,
            debounce_window,
            raw_rx,
            event_tx.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            events: event_tx,
            cancel,
            drain_done: tokio::sync::Mutex::new(Some(drain)),
            _os_watcher: os_watcher,
        })
    }

    /// New subscription to the coalesced event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Stop the watcher: flush currently-debounced events to subscribers,
    /// then release the OS handle. Bounded at 100 ms.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self.drain_done.lock().await.take();
        if let Some(handle) = handle {
            tokio::time::timeout(Duration::from_millis(100), handle)
                .await
                .map_err(|_| WeaverError::Timeout {
                    operation: "watcher stop".to_string(),
                    duration_ms: 100,
                })?
                .map_err(|e| WeaverError::internal(format!("watcher drain task: {}", e)))?;
        }
        Ok(())
    }
}

/// Single-task cooperative loop: receive raw events, tick the debounce
/// queue, broadcast what expires. Suspension points are the tick and the
/// channel receive; emission itself never blocks (broadcast drops for slow
/// receivers).
async fn drain_loop(
    root: PathBuf,
    globs: GlobSet,
    window: Duration,
    mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    events: broadcast::Sender<WatchEvent>,
    cancel: CancellationToken,
) {
    let mut queue = DebounceQueue::new(window);
    let tick_period = (window / 4).clamp(Duration::from_millis(10), Duration::from_millis(100));
    let mut tick = tokio::time::interval(tick_period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            raw = raw_rx.recv() => {
                match raw {
                    Some(raw) => observe_raw(&root, &globs, &mut queue, raw),
                    None => break,
                }
            }
            _ = tick.tick() => {
                for event in queue.drain_expired(Instant::now()) {
                    emit(&events, event);
                }
            }
        }
    }

    // Drain: anything still queued in the channel, then everything pending.
    while let Ok(raw) = raw_rx.try_recv() {
        observe_raw(&root, &globs, &mut queue, raw);
    }
    for event in queue.drain_all() {
        emit(&events, event);
    }
}

fn observe_raw(root: &Path, globs: &GlobSet, queue: &mut DebounceQueue, raw: RawEvent) {
    let Some(relative) = relative_path(root, &raw.absolute) else {
        return;
    };
    if relative.split('/').any(|part| part.starts_with('.')) {
        return;
    }
    if !globs.is_match(&relative) {
        return;
    }
    queue.observe(raw.kind, relative, raw.absolute, Instant::now());
}

fn emit(events: &broadcast::Sender<WatchEvent>, event: WatchEvent) {
    tracing::debug!(
        kind = event.kind.as_str(),
        path = %event.relative_path,
        "emitting watch event"
    );
    // No subscribers is fine at startup and shutdown.
    let _ = events.send(event);
}

fn relative_path(root: &Path, absolute: &Path) -> Option<String> {
    absolute
        .strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            WeaverError::Config {
                reason: format!("bad watch pattern '{}': {}", pattern, e),
            }
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| WeaverError::Config {
            reason: format!("watch patterns: {}", e),
        })
}

fn map_event_kind(kind: &EventKind) -> Option<WatchKind> {
    match kind {
        EventKind::Create(_) => Some(WatchKind::Add),
        EventKind::Remove(_) => Some(WatchKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(WatchKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(WatchKind::Add),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(WatchKind::Change),
        EventKind::Access(_) => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globset_default_pattern() {
        let globs = build_globset(&["**/*.md".to_string()]).unwrap();
        assert!(globs.is_match("a.md"));
        assert!(globs.is_match("deep/nested/b.md"));
        assert!(!globs.is_match("image.png"));
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let err = build_globset(&["[".to_string()]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn event_kind_mapping() {
        use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

        assert_eq!(
            map_event_kind(&EventKind::Create(CreateKind::File)),
            Some(WatchKind::Add)
        );
        assert_eq!(
            map_event_kind(&EventKind::Remove(RemoveKind::File)),
            Some(WatchKind::Unlink)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(WatchKind::Change)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(WatchKind::Unlink)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(WatchKind::Add)
        );
    }

    #[tokio::test]
    async fn watcher_lifecycle_and_stop_bound() {
        let dir = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let watcher = VaultWatcher::start(
            dir.path(),
            &["**/*.md".to_string()],
            Duration::from_millis(50),
            &cancel,
        )
        .unwrap();
        let _rx = watcher.subscribe();

        let start = Instant::now();
        watcher.stop().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn hidden_directories_filtered() {
        let root = PathBuf::from("/vault");
        let globs = build_globset(&["**/*.md".to_string()]).unwrap();
        let mut queue = DebounceQueue::new(Duration::from_millis(10));

        observe_raw(
            &root,
            &globs,
            &mut queue,
            RawEvent {
                kind: WatchKind::Change,
                absolute: PathBuf::from("/vault/.weaver/state.md"),
            },
        );
        observe_raw(
            &root,
            &globs,
            &mut queue,
            RawEvent {
                kind: WatchKind::Change,
                absolute: PathBuf::from("/vault/notes/real.md"),
            },
        );
        assert_eq!(queue.len(), 1);
    }
}
