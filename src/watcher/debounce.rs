//! Debounce and coalescing state machine
//!
//! Pure per-path state, driven by the watcher loop. Within one window:
//!
//! | pending  | incoming | result            |
//! |----------|----------|-------------------|
//! | (none)   | k        | k                 |
//! | add      | change   | add               |
//! | add      | unlink   | (entry removed)   |
//! | change   | unlink   | unlink            |
//! | change   | add      | change            |
//! | unlink   | add      | change            |
//! | unlink   | change   | change            |
//! | k        | k        | k                 |
//!
//! Every observation restarts the path's deadline, so a file under
//! continuous writes emits once the writes go quiet.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::{WatchEvent, WatchKind};

struct Pending {
    kind: WatchKind,
    absolute: PathBuf,
    deadline: Instant,
}

/// Per-path pending events with rolling deadlines
pub struct DebounceQueue {
    window: Duration,
    pending: HashMap<String, Pending>,
}

impl DebounceQueue {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Feed one raw observation into the queue.
    pub fn observe(&mut self, kind: WatchKind, relative: String, absolute: PathBuf, now: Instant) {
        let deadline = now + self.window;
        match self.pending.get_mut(&relative) {
            None => {
                self.pending.insert(
                    relative,
                    Pending {
                        kind,
                        absolute,
                        deadline,
                    },
                );
            }
            Some(entry) => {
                let next = match (entry.kind, kind) {
                    (WatchKind::Add, WatchKind::Unlink) => {
                        // Created and deleted inside one window: no event.
                        self.pending.remove(&relative);
                        return;
                    }
                    (WatchKind::Add, _) => WatchKind::Add,
                    (WatchKind::Unlink, WatchKind::Add | WatchKind::Change) => WatchKind::Change,
                    (WatchKind::Unlink, WatchKind::Unlink) => WatchKind::Unlink,
                    (WatchKind::Change, WatchKind::Unlink) => WatchKind::Unlink,
                    (WatchKind::Change, _) => WatchKind::Change,
                };
                entry.kind = next;
                entry.deadline = deadline;
                entry.absolute = absolute;
            }
        }
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<WatchEvent> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut events = Vec::with_capacity(expired.len());
        for path in expired {
            if let Some(entry) = self.pending.remove(&path) {
                events.push(WatchEvent {
                    kind: entry.kind,
                    absolute_path: entry.absolute,
                    relative_path: path,
                });
            }
        }
        events.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        events
    }

    /// Remove and return everything, deadline or not (used at stop).
    pub fn drain_all(&mut self) -> Vec<WatchEvent> {
        let mut events: Vec<WatchEvent> = self
            .pending
            .drain()
            .map(|(path, entry)| WatchEvent {
                kind: entry.kind,
                absolute_path: entry.absolute,
                relative_path: path,
            })
            .collect();
        events.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        events
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (DebounceQueue, Instant) {
        (DebounceQueue::new(Duration::from_millis(500)), Instant::now())
    }

    fn observe(q: &mut DebounceQueue, kind: WatchKind, path: &str, now: Instant) {
        q.observe(kind, path.to_string(), PathBuf::from(format!("/v/{path}")), now);
    }

    #[test]
    fn single_event_waits_for_window() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Change, "a.md", t0);

        assert!(q.drain_expired(t0 + Duration::from_millis(499)).is_empty());
        let events = q.drain_expired(t0 + Duration::from_millis(500));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Change);
        assert!(q.is_empty());
    }

    #[test]
    fn repeated_writes_collapse_to_one_change() {
        let (mut q, t0) = queue();
        for i in 0..5 {
            observe(
                &mut q,
                WatchKind::Change,
                "a.md",
                t0 + Duration::from_millis(i * 50),
            );
        }
        let events = q.drain_expired(t0 + Duration::from_secs(2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Change);
    }

    #[test]
    fn observation_restarts_deadline() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Change, "a.md", t0);
        observe(&mut q, WatchKind::Change, "a.md", t0 + Duration::from_millis(400));

        // First deadline has passed but the second observation moved it.
        assert!(q.drain_expired(t0 + Duration::from_millis(600)).is_empty());
        assert_eq!(q.drain_expired(t0 + Duration::from_millis(900)).len(), 1);
    }

    #[test]
    fn add_then_unlink_cancels_out() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Add, "a.md", t0);
        observe(&mut q, WatchKind::Unlink, "a.md", t0 + Duration::from_millis(100));

        assert!(q.drain_expired(t0 + Duration::from_secs(2)).is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn unlink_then_add_yields_change() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Unlink, "a.md", t0);
        observe(&mut q, WatchKind::Add, "a.md", t0 + Duration::from_millis(100));

        let events = q.drain_expired(t0 + Duration::from_secs(2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Change);
    }

    #[test]
    fn add_then_change_stays_add() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Add, "a.md", t0);
        observe(&mut q, WatchKind::Change, "a.md", t0 + Duration::from_millis(100));

        let events = q.drain_expired(t0 + Duration::from_secs(2));
        assert_eq!(events[0].kind, WatchKind::Add);
    }

    #[test]
    fn change_then_unlink_becomes_unlink() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Change, "a.md", t0);
        observe(&mut q, WatchKind::Unlink, "a.md", t0 + Duration::from_millis(100));

        let events = q.drain_expired(t0 + Duration::from_secs(2));
        assert_eq!(events[0].kind, WatchKind::Unlink);
    }

    #[test]
    fn add_unlink_add_is_plain_add() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Add, "a.md", t0);
        observe(&mut q, WatchKind::Unlink, "a.md", t0 + Duration::from_millis(50));
        observe(&mut q, WatchKind::Add, "a.md", t0 + Duration::from_millis(100));

        let events = q.drain_expired(t0 + Duration::from_secs(2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Add);
    }

    #[test]
    fn distinct_paths_are_independent() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Add, "a.md", t0);
        observe(&mut q, WatchKind::Change, "b.md", t0 + Duration::from_millis(300));

        let first = q.drain_expired(t0 + Duration::from_millis(550));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].relative_path, "a.md");

        let second = q.drain_expired(t0 + Duration::from_millis(900));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].relative_path, "b.md");
    }

    #[test]
    fn drain_all_flushes_pending() {
        let (mut q, t0) = queue();
        observe(&mut q, WatchKind::Add, "a.md", t0);
        observe(&mut q, WatchKind::Change, "b.md", t0);

        let events = q.drain_all();
        assert_eq!(events.len(), 2);
        assert!(q.is_empty());
    }
}
