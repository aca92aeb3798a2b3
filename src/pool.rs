//! Concurrency-safe handle to one on-disk inverted index.
//!
//! The pool hides tantivy's writer/reader split: the writer lives for the
//! pool's lifetime behind a mutex (tantivy allows one writer per directory),
//! and at most one reader is cached behind a reader-writer lock. Searches
//! take the shared side and lazily open a reader; any mutation that must be
//! visible afterwards takes the exclusive side and drops the cached reader,
//! so the next search observes all committed changes. Searches never block
//! searches.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::Query;
use tantivy::schema::{Field, Schema, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{info, warn};

use crate::analyzer::register_code_tokenizer;
use crate::error::{IndexError, IndexResult};

/// Writer heap budget (bytes).
const WRITER_MEMORY_BYTES: usize = 50_000_000;

pub struct IndexPool {
    name: String,
    dir: PathBuf,
    index: Index,
    writer: Mutex<Option<IndexWriter>>,
    reader: RwLock<Option<IndexReader>>,
}

impl IndexPool {
    /// Open the index at `dir`, creating the directory and an empty index
    /// when missing. The code tokenizer is registered on every open.
    pub fn open(name: &str, dir: &Path, schema: Schema) -> IndexResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            info!("Created index folder {}", dir.display());
        }

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            Index::create_in_dir(dir, schema)?
        };
        register_code_tokenizer(&index);

        let writer = index.writer(WRITER_MEMORY_BYTES)?;

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            index,
            writer: Mutex::new(Some(writer)),
            reader: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> IndexResult<T>,
    ) -> IndexResult<T> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| IndexError::PoolClosed(self.name.clone()))?;
        f(writer)
    }

    fn invalidate_reader(&self) {
        *self.reader.write() = None;
    }

    /// Append documents. `commit` makes them durable and visible to new
    /// readers; `trigger_merge` requests consolidation of all searchable
    /// segments; `apply_deletes` forces pending deletes to take effect
    /// (tantivy applies deletes at commit).
    pub fn build(
        &self,
        docs: Vec<TantivyDocument>,
        commit: bool,
        trigger_merge: bool,
        apply_deletes: bool,
    ) -> IndexResult<()> {
        self.with_writer(|writer| {
            for doc in docs {
                writer.add_document(doc)?;
            }
            if commit || apply_deletes {
                writer.commit()?;
            }
            if trigger_merge {
                let segments = self.index.searchable_segment_ids()?;
                if segments.len() > 1 {
                    writer.merge(&segments).wait()?;
                }
            }
            Ok(())
        })?;

        if commit || apply_deletes || trigger_merge {
            self.invalidate_reader();
        }
        Ok(())
    }

    /// Delete every document matching `term`, then add `doc`, as one
    /// serialized writer operation. Acts as a plain insert when the term
    /// matches nothing. Pending until commit.
    pub fn update(&self, term: Term, doc: TantivyDocument) -> IndexResult<()> {
        self.with_writer(|writer| {
            writer.delete_term(term);
            writer.add_document(doc)?;
            Ok(())
        })
    }

    /// Delete every document matching `term`. Pending until commit.
    pub fn delete(&self, term: Term) -> IndexResult<()> {
        self.with_writer(|writer| {
            writer.delete_term(term);
            Ok(())
        })
    }

    /// Delete every document matching `query`.
    ///
    /// The engine deletes by term, so the matches are enumerated first and
    /// removed through `key_field`, which must hold a unique untokenized
    /// value per document. Pending until commit.
    pub fn delete_matching(&self, query: &dyn Query, key_field: Field) -> IndexResult<()> {
        let keys: Vec<String> = self
            .search_all(query)?
            .iter()
            .filter_map(|doc| {
                doc.get_first(key_field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect();

        self.with_writer(|writer| {
            for key in keys {
                writer.delete_term(Term::from_field_text(key_field, &key));
            }
            Ok(())
        })
    }

    /// Remove every document. Pending until commit.
    pub fn delete_all(&self) -> IndexResult<()> {
        self.with_writer(|writer| {
            writer.delete_all_documents()?;
            Ok(())
        })
    }

    /// Flush the writer, then drop the cached reader so the next search
    /// observes all committed changes.
    pub fn commit(&self) -> IndexResult<()> {
        self.with_writer(|writer| {
            writer.commit()?;
            Ok(())
        })?;
        self.invalidate_reader();
        Ok(())
    }

    fn searcher(&self) -> IndexResult<tantivy::Searcher> {
        {
            let guard = self.reader.read();
            if let Some(reader) = guard.as_ref() {
                return Ok(reader.searcher());
            }
        }

        let mut guard = self.reader.write();
        if guard.is_none() {
            let reader = self
                .index
                .reader_builder()
                .reload_policy(ReloadPolicy::Manual)
                .try_into()?;
            *guard = Some(reader);
        }
        let Some(reader) = guard.as_ref() else {
            return Err(IndexError::PoolClosed(self.name.clone()));
        };
        Ok(reader.searcher())
    }

    /// Return up to `max_hits` matching documents, in score order.
    pub fn search(&self, query: &dyn Query, max_hits: usize) -> IndexResult<Vec<TantivyDocument>> {
        let searcher = self.searcher()?;
        let top_docs = searcher.search(query, &TopDocs::with_limit(max_hits.max(1)))?;

        let mut docs = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            docs.push(searcher.doc(address)?);
        }
        Ok(docs)
    }

    /// Return *every* matching document. Used where a bounded collector
    /// would silently drop rewrites (folder renames, full enumeration).
    pub fn search_all(&self, query: &dyn Query) -> IndexResult<Vec<TantivyDocument>> {
        let searcher = self.searcher()?;
        let addresses = searcher.search(query, &DocSetCollector)?;

        let mut docs = Vec::with_capacity(addresses.len());
        for address in addresses {
            docs.push(searcher.doc(address)?);
        }
        Ok(docs)
    }

    /// Number of documents visible to a current reader.
    pub fn num_docs(&self) -> IndexResult<u64> {
        Ok(self.searcher()?.num_docs())
    }

    /// Close reader then writer. Idempotent; uncommitted writes are dropped,
    /// committing first is the caller's responsibility.
    pub fn close(&self) -> IndexResult<()> {
        self.invalidate_reader();
        if let Some(writer) = self.writer.lock().take() {
            writer.wait_merging_threads()?;
        }
        Ok(())
    }
}

impl Drop for IndexPool {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing index pool {}: {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CodeSchema, HintSchema};
    use crate::source::{CodeSource, DocumentMapper};
    use chrono::Utc;
    use tantivy::query::{AllQuery, TermQuery};
    use tantivy::schema::IndexRecordOption;

    fn mapper() -> DocumentMapper {
        DocumentMapper::new(CodeSchema::build(), HintSchema::build())
    }

    fn code_pool(dir: &Path) -> IndexPool {
        IndexPool::open("code-test", dir, CodeSchema::build().schema().clone()).unwrap()
    }

    fn dummy_source(file_name: &str, path: &str) -> CodeSource {
        CodeSource {
            code_pk: None,
            file_name: file_name.to_string(),
            file_extension: "cs".to_string(),
            file_path: path.to_string(),
            content: format!("class {} {{ }}", file_name.replace(' ', "")),
            index_date: Utc::now(),
            last_write_time_utc: Utc::now(),
            info: "csharp".to_string(),
        }
    }

    fn term_query(field: Field, text: &str) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(field, text),
            IndexRecordOption::Basic,
        )
    }

    #[test]
    fn build_then_delete_by_query_and_term() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper();
        let fields = mapper.code_schema().clone();
        let pool = code_pool(dir.path());

        // S1: two documents, visible after a committed build.
        let docs = vec![
            mapper.code_document(&dummy_source("Dummy File 1", "/r/dummy1.cs")).0,
            mapper.code_document(&dummy_source("Dummy File 2", "/r/dummy2.cs")).0,
        ];
        pool.build(docs, true, false, false).unwrap();

        assert_eq!(pool.search_all(&AllQuery).unwrap().len(), 2);
        let hits = pool.search(&term_query(fields.file_name, "2"), 10).unwrap();
        assert_eq!(hits.len(), 1);

        // S2: delete by query on the tokenized name.
        pool.delete_matching(&term_query(fields.file_name, "2"), fields.code_pk)
            .unwrap();
        pool.commit().unwrap();
        assert_eq!(pool.search_all(&AllQuery).unwrap().len(), 1);

        // S3: delete by term.
        pool.delete(Term::from_field_text(fields.file_name, "1")).unwrap();
        pool.commit().unwrap();
        assert_eq!(pool.search_all(&AllQuery).unwrap().len(), 0);
    }

    #[test]
    fn update_acts_as_insert_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper();
        let fields = mapper.code_schema().clone();
        let pool = code_pool(dir.path());

        let source = dummy_source("Solo", "/r/solo.cs");
        let (doc, _) = mapper.code_document(&source);
        pool.update(
            Term::from_field_text(fields.file_path_raw, &source.file_path),
            doc,
        )
        .unwrap();
        pool.commit().unwrap();
        assert_eq!(pool.num_docs().unwrap(), 1);

        // A second update against the same path replaces rather than adds.
        let (doc, _) = mapper.code_document(&source);
        pool.update(
            Term::from_field_text(fields.file_path_raw, &source.file_path),
            doc,
        )
        .unwrap();
        pool.commit().unwrap();
        assert_eq!(pool.num_docs().unwrap(), 1);
    }

    #[test]
    fn commit_refreshes_reader_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper();
        let pool = code_pool(dir.path());

        // Open a reader before any write.
        assert_eq!(pool.num_docs().unwrap(), 0);

        let (doc, _) = mapper.code_document(&dummy_source("Fresh", "/r/fresh.cs"));
        pool.build(vec![doc], false, false, false).unwrap();
        // Uncommitted: still invisible.
        assert_eq!(pool.num_docs().unwrap(), 0);

        pool.commit().unwrap();
        assert_eq!(pool.num_docs().unwrap(), 1);
    }

    #[test]
    fn delete_all_empties_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper();
        let pool = code_pool(dir.path());

        let docs = (0..5)
            .map(|i| {
                mapper
                    .code_document(&dummy_source(&format!("F{i}"), &format!("/r/f{i}.cs")))
                    .0
            })
            .collect();
        pool.build(docs, true, false, false).unwrap();
        assert_eq!(pool.num_docs().unwrap(), 5);

        pool.delete_all().unwrap();
        pool.commit().unwrap();
        assert_eq!(pool.num_docs().unwrap(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = code_pool(dir.path());
        pool.close().unwrap();
        pool.close().unwrap();
        assert!(matches!(
            pool.commit(),
            Err(IndexError::PoolClosed(_))
        ));
    }

    fn stress(pool: &IndexPool, tasks: usize, iterations: usize) {
        let mapper = mapper();
        std::thread::scope(|scope| {
            for task in 0..tasks {
                let mapper = mapper.clone();
                scope.spawn(move || {
                    for i in 0..iterations {
                        let name = format!("T{task}I{i}");
                        let path = format!("/stress/{task}/{i}.cs");
                        let (doc, _) = mapper.code_document(&dummy_source(&name, &path));
                        pool.build(vec![doc], i % 3 == 0, false, false).unwrap();

                        let docs = pool.search_all(&AllQuery).unwrap();
                        // Consistent set: every hit is a complete document.
                        for doc in &docs {
                            assert!(mapper.code_source(doc).is_ok());
                        }
                    }
                });
            }
        });
        pool.commit().unwrap();
        let total = (tasks * iterations) as u64;
        assert_eq!(pool.num_docs().unwrap(), total);
    }

    #[test]
    fn concurrent_builds_and_searches() {
        let dir = tempfile::tempdir().unwrap();
        let pool = code_pool(dir.path());
        stress(&pool, 3, 10);
    }

    #[test]
    #[ignore = "60-second soak; run with --ignored"]
    fn concurrent_builds_and_searches_soak() {
        let dir = tempfile::tempdir().unwrap();
        let pool = code_pool(dir.path());
        let start = std::time::Instant::now();
        while start.elapsed() < std::time::Duration::from_secs(60) {
            stress(&pool, 4, 25);
            pool.delete_all().unwrap();
            pool.commit().unwrap();
        }
    }
}
