//! Orchestration of the code and hint indexes.
//!
//! `CodeIndexBuilder` is the only component aware of the coupling between
//! the two pools: bulk ingest stages code documents and deduplicated hint
//! words together, and the single-file maintenance operations keep both in
//! step as the watcher reports filesystem changes. There is no cross-pool
//! atomicity; a failure between the code flush and the hint flush leaves
//! the hint index behind until the next flush or compaction.

use std::collections::HashSet;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tantivy::query::{AllQuery, RangeQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::{TantivyDocument, Term};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::error::{IndexError, IndexResult, OpOutcome};
use crate::pool::IndexPool;
use crate::schema::{CodeSchema, HintSchema};
use crate::segmenter;
use crate::source::{CodeSource, CodeWord, DocumentMapper};

/// Contract the external watcher/scheduler drives. The builder is agnostic
/// to debouncing policy; callers decide when to commit.
pub trait IndexMaintenance: Send + Sync {
    fn create(&self, path: &Path) -> IndexResult<OpOutcome>;
    fn update(&self, path: &Path, cancel: &CancellationToken) -> IndexResult<OpOutcome>;
    fn delete(&self, path: &str) -> IndexResult<OpOutcome>;
    fn rename_file(&self, old_path: &str, new_path: &str) -> IndexResult<OpOutcome>;
    fn rename_folder(
        &self,
        old_prefix: &str,
        new_prefix: &str,
        cancel: &CancellationToken,
    ) -> IndexResult<OpOutcome>;
    #[allow(clippy::too_many_arguments)]
    fn build_by_batch(
        &self,
        files: &[PathBuf],
        commit: bool,
        trigger_merge: bool,
        apply_deletes: bool,
        cancel: &CancellationToken,
        batch_size: usize,
    ) -> IndexResult<Vec<PathBuf>>;
    fn get_all_indexed(&self) -> IndexResult<Vec<(String, DateTime<Utc>)>>;
    fn delete_all(&self) -> IndexResult<()>;
    fn commit(&self) -> IndexResult<()>;
}

/// Exact-match query on an untokenized field.
fn term_query(field: Field, text: &str) -> TermQuery {
    TermQuery::new(
        Term::from_field_text(field, text),
        IndexRecordOption::Basic,
    )
}

/// Prefix query over an untokenized field, expressed as term bounds
/// `[prefix, prefix + U+10FFFF)`.
fn prefix_query(field: Field, prefix: &str) -> RangeQuery {
    let lower = Term::from_field_text(field, prefix);
    let upper = Term::from_field_text(field, &format!("{prefix}\u{10FFFF}"));
    RangeQuery::new(Bound::Included(lower), Bound::Excluded(upper))
}

struct BatchStaging {
    docs: Mutex<Vec<TantivyDocument>>,
    /// Hint words staged for the next flush, keyed by original-case word.
    hints: DashMap<String, CodeWord>,
    /// Every distinct-case word seen so far in this batch; guarantees each
    /// word is written to the hint index at most once per batch.
    seen_words: DashMap<String, ()>,
    failed: Mutex<Vec<PathBuf>>,
}

impl BatchStaging {
    fn new() -> Self {
        Self {
            docs: Mutex::new(Vec::new()),
            hints: DashMap::new(),
            seen_words: DashMap::new(),
            failed: Mutex::new(Vec::new()),
        }
    }
}

pub struct CodeIndexBuilder {
    name: String,
    code_pool: Arc<IndexPool>,
    hint_pool: Arc<IndexPool>,
    mapper: DocumentMapper,
    /// Batch staging discipline: stagers take the shared side, the flusher
    /// takes the exclusive side.
    staging_lock: RwLock<()>,
}

impl CodeIndexBuilder {
    /// Open (or create) the code and hint indexes under the given
    /// directories.
    pub fn open(name: &str, code_dir: &Path, hint_dir: &Path) -> IndexResult<Self> {
        let code_schema = CodeSchema::build();
        let hint_schema = HintSchema::build();

        let code_pool = Arc::new(IndexPool::open(
            &format!("{name}/code"),
            code_dir,
            code_schema.schema().clone(),
        )?);
        let hint_pool = Arc::new(IndexPool::open(
            &format!("{name}/hint"),
            hint_dir,
            hint_schema.schema().clone(),
        )?);

        Ok(Self {
            name: name.to_string(),
            code_pool,
            hint_pool,
            mapper: DocumentMapper::new(code_schema, hint_schema),
            staging_lock: RwLock::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code_pool(&self) -> &Arc<IndexPool> {
        &self.code_pool
    }

    pub fn hint_pool(&self) -> &Arc<IndexPool> {
        &self.hint_pool
    }

    pub fn mapper(&self) -> &DocumentMapper {
        &self.mapper
    }

    fn code_fields(&self) -> &CodeSchema {
        self.mapper.code_schema()
    }

    fn hint_fields(&self) -> &HintSchema {
        self.mapper.hint_schema()
    }

    fn path_term(&self, path: &str) -> Term {
        Term::from_field_text(self.code_fields().file_path_raw, path)
    }

    /// Look up the indexed document for a canonical path, if any.
    fn find_by_path(&self, path: &str) -> IndexResult<Option<CodeSource>> {
        let hits = self
            .code_pool
            .search(&term_query(self.code_fields().file_path_raw, path), 1)?;
        hits.first().map(|doc| self.mapper.code_source(doc)).transpose()
    }

    /// Bulk ingest. Files are processed in parallel; documents and
    /// batch-deduplicated hint words are staged and flushed every
    /// `batch_size` documents, with a trailing flush after the loop.
    /// Files that fail to read or map are reported back; pool-level
    /// failures and cancellation abort the batch.
    #[allow(clippy::too_many_arguments)]
    pub fn build_by_batch(
        &self,
        files: &[PathBuf],
        commit: bool,
        trigger_merge: bool,
        apply_deletes: bool,
        cancel: &CancellationToken,
        batch_size: usize,
    ) -> IndexResult<Vec<PathBuf>> {
        let batch_size = batch_size.max(1);
        let staging = BatchStaging::new();

        files.par_iter().try_for_each(|path| -> IndexResult<()> {
            cancel.checkpoint()?;

            {
                let _stage = self.staging_lock.read();
                if let Err(e) = self.stage_file(path, &staging) {
                    warn!("{}: failed to stage {}: {e}", self.name, path.display());
                    staging.failed.lock().push(path.clone());
                }
            }

            if staging.docs.lock().len() >= batch_size {
                cancel.checkpoint()?;
                self.flush(&staging, batch_size, commit, trigger_merge, apply_deletes)?;
            }
            Ok(())
        })?;

        cancel.checkpoint()?;
        self.flush(&staging, 0, commit, trigger_merge, apply_deletes)?;

        let failed = staging.failed.into_inner();
        info!(
            "{}: batch indexed {} files ({} failed)",
            self.name,
            files.len() - failed.len(),
            failed.len()
        );
        Ok(failed)
    }

    fn stage_file(&self, path: &Path, staging: &BatchStaging) -> IndexResult<()> {
        let source = CodeSource::from_file(path)?;
        let (doc, _pk) = self.mapper.code_document(&source);

        for token in segmenter::segment(&source.content) {
            if !staging.seen_words.contains_key(token) {
                let word = CodeWord::new(token);
                staging.seen_words.insert(word.word.clone(), ());
                staging.hints.insert(word.word.clone(), word);
            }
        }

        staging.docs.lock().push(doc);
        Ok(())
    }

    /// Flush staged documents and hint words once `threshold` documents are
    /// staged (0 forces). The commit flag is applied to both pools.
    fn flush(
        &self,
        staging: &BatchStaging,
        threshold: usize,
        commit: bool,
        trigger_merge: bool,
        apply_deletes: bool,
    ) -> IndexResult<()> {
        let _flush = self.staging_lock.write();

        let docs = {
            let mut guard = staging.docs.lock();
            // Another worker may have flushed while we waited.
            if guard.len() < threshold {
                return Ok(());
            }
            std::mem::take(&mut *guard)
        };

        if !docs.is_empty() {
            self.code_pool
                .build(docs, commit, trigger_merge, apply_deletes)?;
        }

        let words: Vec<CodeWord> = staging
            .hints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        staging.hints.clear();

        for word in words {
            let term = Term::from_field_text(self.hint_fields().word, &word.word);
            self.hint_pool.update(term, self.mapper.hint_document(&word))?;
        }
        if commit || apply_deletes {
            self.hint_pool.commit()?;
        }
        Ok(())
    }

    /// Upsert every distinct hint word of `content`.
    fn upsert_hints(&self, content: &str) -> IndexResult<()> {
        let mut seen = HashSet::new();
        for token in segmenter::segment(content) {
            if seen.insert(token) {
                let word = CodeWord::new(token);
                let term = Term::from_field_text(self.hint_fields().word, &word.word);
                self.hint_pool.update(term, self.mapper.hint_document(&word))?;
            }
        }
        Ok(())
    }

    fn outcome(&self, op: &str, path: &Path, result: IndexResult<()>) -> IndexResult<OpOutcome> {
        match result {
            Ok(()) => {
                info!("{}: {op} completed for {}", self.name, path.display());
                Ok(OpOutcome::Successful)
            }
            Err(IndexError::Cancelled) => Err(IndexError::Cancelled),
            Err(e) => {
                warn!("{}: {op} failed for {}: {e}", self.name, path.display());
                Ok(OpOutcome::from_error(&e))
            }
        }
    }

    /// Index one new file: the code document is written without a commit
    /// and each hint word is upserted.
    pub fn create(&self, path: &Path) -> IndexResult<OpOutcome> {
        let result = self.try_create(path);
        self.outcome("create", path, result)
    }

    fn try_create(&self, path: &Path) -> IndexResult<()> {
        let source = CodeSource::from_file(path)?;
        let (doc, _pk) = self.mapper.code_document(&source);
        self.code_pool.build(vec![doc], false, false, false)?;
        self.upsert_hints(&source.content)
    }

    /// Re-index a modified file in place. The `CodePK` of an already
    /// indexed file is preserved. Hint words are upserted; hint words that
    /// became stale are left behind (see [`compact_hints`](Self::compact_hints)).
    pub fn update(&self, path: &Path, cancel: &CancellationToken) -> IndexResult<OpOutcome> {
        let result = self.try_update(path, cancel);
        self.outcome("update", path, result)
    }

    fn try_update(&self, path: &Path, cancel: &CancellationToken) -> IndexResult<()> {
        cancel.checkpoint()?;
        let mut source = CodeSource::from_file(path)?;
        if let Some(existing) = self.find_by_path(&source.file_path)? {
            source.code_pk = existing.code_pk;
        }
        let (doc, _pk) = self.mapper.code_document(&source);
        self.code_pool.update(self.path_term(&source.file_path), doc)?;
        self.upsert_hints(&source.content)
    }

    /// Remove the document whose untokenized path equals `path`. Pending
    /// until commit. Hint words are not removed.
    pub fn delete(&self, path: &str) -> IndexResult<OpOutcome> {
        let result = self.code_pool.delete(self.path_term(path));
        self.outcome("delete", Path::new(path), result)
    }

    /// Move a single document to its new path, keeping its `CodePK`.
    /// Falls back to `create(new_path)` when the old path is no longer
    /// indexed (template-rename race); multiple matches are refused.
    pub fn rename_file(&self, old_path: &str, new_path: &str) -> IndexResult<OpOutcome> {
        let result = self.try_rename_file(old_path, new_path);
        self.outcome("rename", Path::new(old_path), result)
    }

    fn try_rename_file(&self, old_path: &str, new_path: &str) -> IndexResult<()> {
        let matches = self
            .code_pool
            .search(&term_query(self.code_fields().file_path_raw, old_path), 2)?;

        match matches.len() {
            0 => self.try_create(Path::new(new_path)),
            1 => self.move_document(&matches[0], old_path, new_path),
            n => Err(IndexError::AmbiguousRename {
                path: old_path.to_string(),
                matches: n,
            }),
        }
    }

    /// Rewrite every document under `old_prefix`. All matches are
    /// rewritten, not just the first.
    pub fn rename_folder(
        &self,
        old_prefix: &str,
        new_prefix: &str,
        cancel: &CancellationToken,
    ) -> IndexResult<OpOutcome> {
        let result = self.try_rename_folder(old_prefix, new_prefix, cancel);
        self.outcome("rename folder", Path::new(old_prefix), result)
    }

    fn try_rename_folder(
        &self,
        old_prefix: &str,
        new_prefix: &str,
        cancel: &CancellationToken,
    ) -> IndexResult<()> {
        let query = prefix_query(self.code_fields().file_path_raw, old_prefix);
        let matches = self.code_pool.search_all(&query)?;

        for doc in &matches {
            cancel.checkpoint()?;
            self.move_document(doc, old_prefix, new_prefix)?;
        }
        Ok(())
    }

    /// Mutate a stored document's path by string-replacing `old` with
    /// `new`, then update it in place keyed on its `CodePK`.
    fn move_document(&self, doc: &TantivyDocument, old: &str, new: &str) -> IndexResult<()> {
        let mut source = self.mapper.code_source(doc)?;
        let moved = source.file_path.replacen(old, new, 1);
        source.set_path(moved);

        let (doc, pk) = self.mapper.code_document(&source);
        let pk_term =
            Term::from_field_text(self.code_fields().code_pk, &pk.simple().to_string());
        self.code_pool.update(pk_term, doc)
    }

    /// Enumerate every indexed document as `(path, last_write_utc)`.
    pub fn get_all_indexed(&self) -> IndexResult<Vec<(String, DateTime<Utc>)>> {
        let docs = self.code_pool.search_all(&AllQuery)?;
        docs.iter()
            .map(|doc| {
                let source = self.mapper.code_source(doc)?;
                Ok((source.file_path, source.last_write_time_utc))
            })
            .collect()
    }

    /// Rebuild the hint index from the live code documents, evicting hint
    /// words whose last referencing file is gone.
    pub fn compact_hints(&self, cancel: &CancellationToken) -> IndexResult<usize> {
        let docs = self.code_pool.search_all(&AllQuery)?;
        self.hint_pool.delete_all()?;

        let mut seen: HashSet<String> = HashSet::new();
        for doc in &docs {
            cancel.checkpoint()?;
            let source = self.mapper.code_source(doc)?;
            for token in segmenter::segment(&source.content) {
                if !seen.contains(token) {
                    let word = CodeWord::new(token);
                    seen.insert(word.word.clone());
                    let term = Term::from_field_text(self.hint_fields().word, &word.word);
                    self.hint_pool.update(term, self.mapper.hint_document(&word))?;
                }
            }
        }
        self.hint_pool.commit()?;

        info!(
            "{}: hint index compacted to {} words from {} documents",
            self.name,
            seen.len(),
            docs.len()
        );
        Ok(seen.len())
    }

    /// Typeahead lookup: words starting with `prefix`, case-insensitive
    /// unless `case_sensitive`.
    pub fn lookup_hints(
        &self,
        prefix: &str,
        limit: usize,
        case_sensitive: bool,
    ) -> IndexResult<Vec<String>> {
        let fields = self.hint_fields();
        let query = if case_sensitive {
            prefix_query(fields.word, prefix)
        } else {
            prefix_query(fields.word_lower, &prefix.to_lowercase())
        };

        let docs = self.hint_pool.search(&query, limit)?;
        Ok(docs
            .iter()
            .filter_map(|doc| self.mapper.hint_word(doc))
            .collect())
    }

    /// Remove every document from both indexes. Pending until commit.
    pub fn delete_all(&self) -> IndexResult<()> {
        self.code_pool.delete_all()?;
        self.hint_pool.delete_all()
    }

    /// Commit both pools.
    pub fn commit(&self) -> IndexResult<()> {
        self.code_pool.commit()?;
        self.hint_pool.commit()
    }

    /// Close both pools, reader before writer, code before hint.
    pub fn close(&self) -> IndexResult<()> {
        self.code_pool.close()?;
        self.hint_pool.close()
    }
}

impl IndexMaintenance for CodeIndexBuilder {
    fn create(&self, path: &Path) -> IndexResult<OpOutcome> {
        CodeIndexBuilder::create(self, path)
    }

    fn update(&self, path: &Path, cancel: &CancellationToken) -> IndexResult<OpOutcome> {
        CodeIndexBuilder::update(self, path, cancel)
    }

    fn delete(&self, path: &str) -> IndexResult<OpOutcome> {
        CodeIndexBuilder::delete(self, path)
    }

    fn rename_file(&self, old_path: &str, new_path: &str) -> IndexResult<OpOutcome> {
        CodeIndexBuilder::rename_file(self, old_path, new_path)
    }

    fn rename_folder(
        &self,
        old_prefix: &str,
        new_prefix: &str,
        cancel: &CancellationToken,
    ) -> IndexResult<OpOutcome> {
        CodeIndexBuilder::rename_folder(self, old_prefix, new_prefix, cancel)
    }

    fn build_by_batch(
        &self,
        files: &[PathBuf],
        commit: bool,
        trigger_merge: bool,
        apply_deletes: bool,
        cancel: &CancellationToken,
        batch_size: usize,
    ) -> IndexResult<Vec<PathBuf>> {
        CodeIndexBuilder::build_by_batch(
            self,
            files,
            commit,
            trigger_merge,
            apply_deletes,
            cancel,
            batch_size,
        )
    }

    fn get_all_indexed(&self) -> IndexResult<Vec<(String, DateTime<Utc>)>> {
        CodeIndexBuilder::get_all_indexed(self)
    }

    fn delete_all(&self) -> IndexResult<()> {
        CodeIndexBuilder::delete_all(self)
    }

    fn commit(&self) -> IndexResult<()> {
        CodeIndexBuilder::commit(self)
    }
}
