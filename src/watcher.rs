//! Debounced filesystem watching.
//!
//! One watcher per indexed root translates OS events into maintenance calls
//! on the builder: create/modify/remove map to single-file operations and
//! renames map to `rename_file`/`rename_folder`. Each debounced batch ends
//! with a single commit so readers observe it atomically per batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use notify::{EventKind, RecursiveMode};
use notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, new_debouncer};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::builder::IndexMaintenance;
use crate::cancel::CancellationToken;
use crate::config;

/// Minimum interval between update operations for the same file.
/// Prevents rapid saves from triggering redundant re-indexing.
const UPDATE_COOLDOWN_MS: u64 = 5000;

/// What a debounced event means for the index.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Ignored,
}

/// Per-file cooldown tracker to avoid redundant re-indexing.
struct UpdateCooldownTracker {
    last_update: HashMap<PathBuf, Instant>,
}

impl UpdateCooldownTracker {
    fn new() -> Self {
        Self {
            last_update: HashMap::new(),
        }
    }

    /// Returns true when the file should be re-indexed (cooldown expired).
    fn should_update(&mut self, path: &Path) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_update.get(path) {
            if now.duration_since(*last) < Duration::from_millis(UPDATE_COOLDOWN_MS) {
                return false;
            }
        }
        self.last_update.insert(path.to_path_buf(), now);
        true
    }

    /// Periodically drop stale entries to bound memory.
    fn cleanup_stale(&mut self) {
        let cutoff = Instant::now() - Duration::from_secs(60);
        self.last_update.retain(|_, v| *v > cutoff);
    }
}

fn classify_debounced_event(event: &DebouncedEvent) -> FileChange {
    match event.kind {
        EventKind::Create(_) => match event.paths.first() {
            Some(path) => FileChange::Created(path.clone()),
            None => FileChange::Ignored,
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (event.paths.first(), event.paths.get(1)) {
                (Some(from), Some(to)) => FileChange::Renamed {
                    from: from.clone(),
                    to: to.clone(),
                },
                _ => FileChange::Ignored,
            }
        }
        // One-sided renames surface as remove/create of the visible side.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => match event.paths.first() {
            Some(path) => FileChange::Removed(path.clone()),
            None => FileChange::Ignored,
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => match event.paths.first() {
            Some(path) => FileChange::Created(path.clone()),
            None => FileChange::Ignored,
        },
        EventKind::Modify(_) => match event.paths.first() {
            Some(path) => FileChange::Modified(path.clone()),
            None => FileChange::Ignored,
        },
        EventKind::Remove(_) => match event.paths.first() {
            Some(path) => FileChange::Removed(path.clone()),
            None => FileChange::Ignored,
        },
        _ => FileChange::Ignored,
    }
}

pub struct FileWatcherManager {
    watchers: DashMap<String, WatcherHandle>,
    debounce_ms: u64,
}

struct WatcherHandle {
    cancel: CancellationToken,
    _watcher: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
}

impl FileWatcherManager {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            watchers: DashMap::new(),
            debounce_ms,
        }
    }

    /// Start watching a root directory, feeding changes into `maintenance`.
    pub fn start_watching(
        &self,
        root_key: &str,
        path: &Path,
        maintenance: Arc<dyn IndexMaintenance>,
    ) -> Result<(), notify::Error> {
        if self.watchers.contains_key(root_key) {
            return Ok(());
        }

        let key = root_key.to_string();
        let cancel = CancellationToken::new();
        let handler_cancel = cancel.clone();
        let cooldown = Arc::new(Mutex::new(UpdateCooldownTracker::new()));
        let cleanup_counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut debouncer = new_debouncer(
            Duration::from_millis(self.debounce_ms),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let count =
                        cleanup_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if count % 50 == 0 {
                        cooldown.lock().cleanup_stale();
                    }

                    let mutated = apply_events(
                        &key,
                        &events,
                        maintenance.as_ref(),
                        &mut cooldown.lock(),
                        &handler_cancel,
                    );
                    if mutated {
                        if let Err(e) = maintenance.commit() {
                            warn!("{key}: commit after watch batch failed: {e}");
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!("File watcher error: {e:?}");
                    }
                }
            },
        )?;

        debouncer.watch(path, RecursiveMode::Recursive)?;

        self.watchers.insert(
            root_key.to_string(),
            WatcherHandle {
                cancel,
                _watcher: debouncer,
            },
        );

        info!(
            "Started watching {} at {} (debounce: {}ms)",
            root_key,
            path.display(),
            self.debounce_ms
        );
        Ok(())
    }

    pub fn stop_watching(&self, root_key: &str) {
        if let Some((_, handle)) = self.watchers.remove(root_key) {
            handle.cancel.cancel();
            info!("Stopped watching {root_key}");
        }
    }

    pub fn is_watching(&self, root_key: &str) -> bool {
        self.watchers.contains_key(root_key)
    }

    pub fn stop_all(&self) {
        let keys: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.stop_watching(&key);
        }
    }
}

/// Apply one debounced batch. Returns whether anything was written.
fn apply_events(
    root_key: &str,
    events: &[DebouncedEvent],
    maintenance: &dyn IndexMaintenance,
    cooldown: &mut UpdateCooldownTracker,
    cancel: &CancellationToken,
) -> bool {
    let mut mutated = false;

    for event in events {
        if cancel.is_cancelled() {
            break;
        }

        let change = classify_debounced_event(event);
        let result = match &change {
            FileChange::Created(path) => {
                if !eligible_file(path) {
                    continue;
                }
                maintenance.create(path).map(|_| ())
            }
            FileChange::Modified(path) => {
                if !eligible_file(path) || !cooldown.should_update(path) {
                    continue;
                }
                maintenance.update(path, cancel).map(|_| ())
            }
            FileChange::Removed(path) => {
                if config::is_build_or_output_dir(path) {
                    continue;
                }
                maintenance.delete(&path.to_string_lossy()).map(|_| ())
            }
            FileChange::Renamed { from, to } => {
                if config::is_build_or_output_dir(to) {
                    continue;
                }
                let from = from.to_string_lossy();
                let to_str = to.to_string_lossy();
                if to.is_dir() {
                    maintenance.rename_folder(&from, &to_str, cancel).map(|_| ())
                } else {
                    maintenance.rename_file(&from, &to_str).map(|_| ())
                }
            }
            FileChange::Ignored => continue,
        };

        match result {
            Ok(()) => mutated = true,
            Err(e) => warn!("{root_key}: failed to apply {change:?}: {e}"),
        }
    }

    mutated
}

/// Files the watcher forwards to the index: existing regular files passing
/// the shared policy.
fn eligible_file(path: &Path) -> bool {
    path.is_file() && config::is_indexable(path) && !config::is_build_or_output_dir(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;

    fn debounced(kind: EventKind, paths: Vec<PathBuf>) -> DebouncedEvent {
        let mut event = notify::Event::new(kind);
        for path in paths {
            event = event.add_path(path);
        }
        DebouncedEvent::new(event, Instant::now())
    }

    #[test]
    fn events_classify_by_kind() {
        let file = PathBuf::from("/r/a.rs");
        let created = debounced(EventKind::Create(CreateKind::File), vec![file.clone()]);
        assert_eq!(
            classify_debounced_event(&created),
            FileChange::Created(file.clone())
        );

        let renamed = debounced(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![file.clone(), PathBuf::from("/r/b.rs")],
        );
        assert_eq!(
            classify_debounced_event(&renamed),
            FileChange::Renamed {
                from: file.clone(),
                to: PathBuf::from("/r/b.rs"),
            }
        );

        let removed = debounced(EventKind::Remove(notify::event::RemoveKind::File), vec![
            file.clone()
        ]);
        assert_eq!(classify_debounced_event(&removed), FileChange::Removed(file));
    }

    #[test]
    fn one_sided_renames_degrade_to_remove_and_create() {
        let file = PathBuf::from("/r/a.rs");
        let from = debounced(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            vec![file.clone()],
        );
        assert_eq!(classify_debounced_event(&from), FileChange::Removed(file.clone()));

        let to = debounced(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            vec![file.clone()],
        );
        assert_eq!(classify_debounced_event(&to), FileChange::Created(file));
    }

    #[test]
    fn cooldown_suppresses_rapid_updates() {
        let mut tracker = UpdateCooldownTracker::new();
        let path = Path::new("/r/hot.rs");
        assert!(tracker.should_update(path));
        assert!(!tracker.should_update(path));
        assert!(tracker.should_update(Path::new("/r/other.rs")));
    }
}
