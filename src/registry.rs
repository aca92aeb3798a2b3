//! Per-root index registry and startup reconciliation.
//!
//! Each watched root gets a builder over two sibling index directories,
//! `CodeIndex/` and `HintIndex/`, under the data directory. `scan_root`
//! brings a root's indexes in line with disk: new and modified files are
//! batch-ingested, documents whose file vanished are deleted, and files
//! whose on-disk mtime matches the indexed `LastWriteTimeUtc` are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ignore::WalkBuilder;
use tracing::info;

use crate::builder::CodeIndexBuilder;
use crate::cancel::CancellationToken;
use crate::config::AppConfig;
use crate::error::IndexResult;
use crate::source::to_ticks;

const MAX_WALK_DEPTH: usize = 20;

#[derive(Debug, Default)]
pub struct ScanReport {
    pub indexed: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: Vec<PathBuf>,
}

pub struct IndexRegistry {
    config: AppConfig,
    roots: DashMap<String, Arc<CodeIndexBuilder>>,
}

impl IndexRegistry {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            roots: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stable directory-safe key for a root path.
    pub fn root_key(root: &Path) -> String {
        root.to_string_lossy()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .trim_matches('-')
            .to_string()
    }

    /// Open (or return) the builder for a root.
    pub fn open_root(&self, root: &Path) -> IndexResult<Arc<CodeIndexBuilder>> {
        let root = dunce::canonicalize(root)?;
        let key = Self::root_key(&root);
        if let Some(builder) = self.roots.get(&key) {
            return Ok(builder.value().clone());
        }

        let base = self.config.data_dir.join(&key);
        let builder = Arc::new(CodeIndexBuilder::open(
            &key,
            &base.join("CodeIndex"),
            &base.join("HintIndex"),
        )?);
        self.roots.insert(key, builder.clone());
        Ok(builder)
    }

    pub fn get(&self, root: &Path) -> Option<Arc<CodeIndexBuilder>> {
        let root = dunce::canonicalize(root).ok()?;
        self.roots
            .get(&Self::root_key(&root))
            .map(|b| b.value().clone())
    }

    /// Walk a root and collect every file passing the shared policy, as
    /// canonical paths.
    pub fn collect_files(&self, root: &Path) -> Vec<PathBuf> {
        let excludes = self.config.exclude_set();

        WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .max_depth(Some(MAX_WALK_DEPTH))
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
                self.config.should_index(entry.path(), size, &excludes)
            })
            .filter_map(|entry| dunce::canonicalize(entry.path()).ok())
            .collect()
    }

    /// Synchronize a root's indexes with disk state.
    pub fn scan_root(&self, root: &Path, cancel: &CancellationToken) -> IndexResult<ScanReport> {
        let builder = self.open_root(root)?;
        let files = self.collect_files(root);

        let indexed: HashMap<String, i64> = builder
            .get_all_indexed()?
            .into_iter()
            .map(|(path, mtime)| (path, to_ticks(mtime)))
            .collect();

        let disk: HashMap<String, &PathBuf> = files
            .iter()
            .map(|path| (path.to_string_lossy().to_string(), path))
            .collect();

        // Documents whose file vanished from disk.
        let mut removed = 0usize;
        for path in indexed.keys() {
            if !disk.contains_key(path) {
                cancel.checkpoint()?;
                builder.delete(path)?;
                removed += 1;
            }
        }

        // New files, plus files whose mtime moved past the indexed ticks.
        let mut unchanged = 0usize;
        let mut to_index: Vec<PathBuf> = Vec::new();
        for (path_str, path) in &disk {
            match indexed.get(path_str) {
                Some(&ticks) => {
                    let mtime: chrono::DateTime<chrono::Utc> = std::fs::metadata(path)
                        .and_then(|m| m.modified())
                        .map(Into::into)
                        .unwrap_or(chrono::DateTime::UNIX_EPOCH);
                    if to_ticks(mtime) > ticks {
                        // Replaced through a pending delete, re-added below.
                        builder.delete(path_str)?;
                        to_index.push((*path).clone());
                    } else {
                        unchanged += 1;
                    }
                }
                None => to_index.push((*path).clone()),
            }
        }

        let failed = if to_index.is_empty() {
            builder.commit()?;
            Vec::new()
        } else {
            builder.build_by_batch(
                &to_index,
                true,
                false,
                true,
                cancel,
                self.config.index_batch_size,
            )?
        };

        let report = ScanReport {
            indexed: to_index.len() - failed.len(),
            removed,
            unchanged,
            failed,
        };
        info!(
            "Scan of {} complete: {} indexed, {} removed, {} unchanged, {} failed",
            root.display(),
            report.indexed,
            report.removed,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    /// Commit every open root.
    pub fn commit_all(&self) -> IndexResult<()> {
        for entry in self.roots.iter() {
            entry.value().commit()?;
        }
        Ok(())
    }

    /// Close every open root, committing first.
    pub fn close_all(&self) -> IndexResult<()> {
        for entry in self.roots.iter() {
            entry.value().commit()?;
            entry.value().close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(data_dir: &Path) -> IndexRegistry {
        IndexRegistry::new(AppConfig {
            watched_roots: vec![],
            data_dir: data_dir.to_path_buf(),
            max_file_size_bytes: 1024 * 1024,
            watcher_debounce_ms: 300,
            index_batch_size: 100,
            exclude_globs: vec![],
        })
    }

    #[test]
    fn scan_reconciles_with_disk_state() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let registry = registry(data.path());
        let cancel = CancellationToken::new();

        let keep = root.path().join("keep.rs");
        let gone = root.path().join("gone.rs");
        std::fs::write(&keep, "fn keep_me() {}").unwrap();
        std::fs::write(&gone, "fn remove_me() {}").unwrap();

        let report = registry.scan_root(root.path(), &cancel).unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.removed, 0);
        assert!(report.failed.is_empty());

        // Nothing changed: second scan skips everything.
        let report = registry.scan_root(root.path(), &cancel).unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.unchanged, 2);

        // One file deleted, one modified.
        std::fs::remove_file(&gone).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&keep, "fn keep_me_changed() {}").unwrap();

        let report = registry.scan_root(root.path(), &cancel).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.indexed, 1);

        let builder = registry.get(root.path()).unwrap();
        let all = builder.get_all_indexed().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].0.ends_with("keep.rs"));
    }

    #[test]
    fn non_indexable_files_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let registry = registry(data.path());

        std::fs::write(root.path().join("code.rs"), "fn real_code() {}").unwrap();
        std::fs::write(root.path().join("blob.bin"), [0u8, 1, 2]).unwrap();

        let files = registry.collect_files(root.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("code.rs"));
    }

    #[test]
    fn root_keys_are_directory_safe() {
        let key = IndexRegistry::root_key(Path::new("/home/user/my repo"));
        assert!(!key.contains('/'));
        assert!(!key.contains(' '));
        assert!(!key.is_empty());
    }
}
