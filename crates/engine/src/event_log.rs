//! Bounded motion event history.
//!
//! Holds the most recent [`EVENT_LOG_CAPACITY`] events in memory and
//! rewrites the JSON file after every append. The in-memory copy is
//! authoritative; a failed write is logged and the engine carries on.
//! Readers never wait on file I/O.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::event::parse_event_log;
use stillwatch_model::MotionEvent;

/// Maximum number of retained events.
pub const EVENT_LOG_CAPACITY: usize = 100;

/// Events returned by [`EventLog::recent`] when no limit is given.
pub const DEFAULT_RECENT_EVENTS: usize = 50;

#[derive(Debug)]
pub struct EventLog {
    path: Option<PathBuf>,
    capacity: usize,
    events: Mutex<VecDeque<MotionEvent>>,
    /// Serializes file writes so the file never goes backwards.
    writer: Mutex<()>,
}

impl EventLog {
    /// A log that is never persisted.
    pub fn in_memory() -> Self {
        Self::with_capacity(None, EVENT_LOG_CAPACITY)
    }

    /// Open a persisted log, reloading any events already on disk.
    ///
    /// An unreadable or corrupt file is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let log = Self::with_capacity(Some(path.clone()), EVENT_LOG_CAPACITY);
        if path.exists() {
            match load_events(&path) {
                Ok(events) => {
                    let mut guard = log.lock();
                    let skip = events.len().saturating_sub(log.capacity);
                    guard.extend(events.into_iter().skip(skip));
                    tracing::info!(path = %path.display(), events = guard.len(), "Loaded event log");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable event log");
                }
            }
        }
        log
    }

    fn with_capacity(path: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            path,
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            writer: Mutex::new(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<MotionEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event, evicting the oldest past capacity, and persist.
    pub fn append(&self, event: MotionEvent) {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = {
            let mut events = self.lock();
            events.push_back(event);
            while events.len() > self.capacity {
                events.pop_front();
            }
            self.path.as_ref().map(|_| events.iter().cloned().collect::<Vec<_>>())
        };

        if let (Some(path), Some(events)) = (&self.path, snapshot) {
            if let Err(e) = persist(path, &events) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist event log");
            }
        }
    }

    /// [`EventLog::append`] on Tokio's blocking pool.
    pub async fn append_blocking(self: &Arc<Self>, event: MotionEvent) {
        let log = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || log.append(event)).await {
            tracing::warn!(error = %e, "Event log writer task failed");
        }
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<MotionEvent> {
        let events = self.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// All retained events, oldest first.
    pub fn all(&self) -> Vec<MotionEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Read a persisted event log.
pub fn load_events(path: &Path) -> StillwatchResult<Vec<MotionEvent>> {
    if !path.exists() {
        return Err(StillwatchError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    Ok(parse_event_log(&content)?)
}

fn persist(path: &Path, events: &[MotionEvent]) -> StillwatchResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(events)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};
    use proptest::prelude::*;

    fn event(n: u32) -> MotionEvent {
        MotionEvent {
            timestamp: Local::now() + Duration::seconds(n as i64),
            pixels_changed: n,
            threshold: Some(500),
        }
    }

    #[test]
    fn recent_returns_the_newest_in_order() {
        let log = EventLog::in_memory();
        for n in 0..10 {
            log.append(event(n));
        }
        let recent: Vec<u32> = log.recent(3).iter().map(|e| e.pixels_changed).collect();
        assert_eq!(recent, vec![7, 8, 9]);
        assert_eq!(log.recent(50).len(), 10);
    }

    #[test]
    fn appends_persist_and_reload() {
        let dir = std::env::temp_dir().join("stillwatch_test_event_log");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("logs").join("motion_events.json");

        {
            let log = EventLog::open(&path);
            assert!(log.is_empty());
            log.append(event(600));
            log.append(event(700));
        }

        let reloaded = EventLog::open(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.all()[1].pixels_changed, 700);
        assert_eq!(load_events(&path).unwrap().len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = std::env::temp_dir().join("stillwatch_test_event_log_corrupt");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("motion_events.json");
        std::fs::write(&path, "{ not json").unwrap();

        let log = EventLog::open(&path);
        assert!(log.is_empty());
        log.append(event(1));
        assert_eq!(load_events(&path).unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unwritable_path_keeps_memory_authoritative() {
        let dir = std::env::temp_dir().join("stillwatch_test_event_log_blocked");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("file");
        std::fs::write(&blocker, "x").unwrap();

        let log = EventLog::open(blocker.join("motion_events.json"));
        log.append(event(5));
        assert_eq!(log.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn blocking_appends_persist() {
        let dir = std::env::temp_dir().join("stillwatch_test_event_log_blocking");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("motion_events.json");

        let log = Arc::new(EventLog::open(&path));
        log.append_blocking(event(600)).await;
        log.append_blocking(event(601)).await;

        let persisted = load_events(&path).unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].pixels_changed, 601);

        std::fs::remove_dir_all(&dir).ok();
    }

    proptest! {
        #[test]
        fn bounded_and_fifo(count in 0usize..300) {
            let log = EventLog::in_memory();
            for n in 0..count {
                log.append(event(n as u32));
            }
            let events = log.all();
            prop_assert!(events.len() <= EVENT_LOG_CAPACITY);
            prop_assert_eq!(events.len(), count.min(EVENT_LOG_CAPACITY));
            let first = count.saturating_sub(EVENT_LOG_CAPACITY) as u32;
            for (i, e) in events.iter().enumerate() {
                prop_assert_eq!(e.pixels_changed, first + i as u32);
            }
        }
    }
}
