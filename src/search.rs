//! Query-side façade over a builder's code index.
//!
//! This is the seam an HTTP or UI layer calls: it validates the raw query,
//! parses it with the same analyzer used at ingest (AND between bare
//! terms), and maps hits into serializable results.

use serde::{Deserialize, Serialize};

use crate::analyzer;
use crate::builder::CodeIndexBuilder;
use crate::config::MAX_SEARCH_QUERY_LENGTH;
use crate::error::{IndexError, IndexResult};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub file_name: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Run a free-text query against the code index.
pub fn search_code(builder: &CodeIndexBuilder, query: &SearchQuery) -> IndexResult<SearchResponse> {
    let raw = query.query.trim();
    if raw.is_empty() {
        return Err(IndexError::InvalidQuery("query must not be empty".into()));
    }
    if raw.len() > MAX_SEARCH_QUERY_LENGTH {
        return Err(IndexError::InvalidQuery(format!(
            "query too long ({} chars, maximum {MAX_SEARCH_QUERY_LENGTH})",
            raw.len()
        )));
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let pool = builder.code_pool();
    let fields = builder.mapper().code_schema();
    let parser = analyzer::query_parser(pool.index(), fields.text_fields());
    let parsed = parser.parse_query(raw)?;

    let docs = pool.search(&*parsed, limit)?;
    let hits: Vec<SearchHit> = docs
        .iter()
        .filter_map(|doc| {
            let source = builder.mapper().code_source(doc).ok()?;
            Some(SearchHit {
                path: source.file_path,
                file_name: source.file_name,
                language: source.info,
            })
        })
        .collect();

    Ok(SearchResponse {
        query: raw.to_string(),
        total: hits.len(),
        hits,
    })
}

/// Typeahead lookup against the hint index.
pub fn lookup_hints(
    builder: &CodeIndexBuilder,
    prefix: &str,
    limit: Option<usize>,
) -> IndexResult<Vec<String>> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(IndexError::InvalidQuery("prefix must not be empty".into()));
    }
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    builder.lookup_hints(prefix, limit, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use std::path::PathBuf;

    fn indexed_builder(root: &tempfile::TempDir, indexes: &tempfile::TempDir) -> CodeIndexBuilder {
        let builder = CodeIndexBuilder::open(
            "search-test",
            &indexes.path().join("CodeIndex"),
            &indexes.path().join("HintIndex"),
        )
        .unwrap();

        let write = |name: &str, content: &str| -> PathBuf {
            let path = root.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        };
        let files = vec![
            write("one.rs", "fn alpha_token beta_token"),
            write("two.rs", "fn alpha_token gamma_token"),
        ];

        let cancel = CancellationToken::new();
        builder
            .build_by_batch(&files, true, false, false, &cancel, 10)
            .unwrap();
        builder
    }

    #[test]
    fn bare_terms_are_conjunctive() {
        let root = tempfile::tempdir().unwrap();
        let indexes = tempfile::tempdir().unwrap();
        let builder = indexed_builder(&root, &indexes);

        let both = search_code(
            &builder,
            &SearchQuery {
                query: "alpha_token".into(),
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(both.total, 2);

        let narrowed = search_code(
            &builder,
            &SearchQuery {
                query: "alpha_token beta_token".into(),
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(narrowed.total, 1);
        assert_eq!(narrowed.hits[0].file_name, "one.rs");
        assert_eq!(narrowed.hits[0].language, "rust");
    }

    #[test]
    fn empty_and_oversized_queries_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let indexes = tempfile::tempdir().unwrap();
        let builder = indexed_builder(&root, &indexes);

        assert!(matches!(
            search_code(&builder, &SearchQuery { query: "  ".into(), limit: None }),
            Err(IndexError::InvalidQuery(_))
        ));

        let huge = "x".repeat(MAX_SEARCH_QUERY_LENGTH + 1);
        assert!(matches!(
            search_code(&builder, &SearchQuery { query: huge, limit: None }),
            Err(IndexError::InvalidQuery(_))
        ));
    }

    #[test]
    fn hint_lookup_validates_prefix() {
        let root = tempfile::tempdir().unwrap();
        let indexes = tempfile::tempdir().unwrap();
        let builder = indexed_builder(&root, &indexes);

        assert!(matches!(
            lookup_hints(&builder, " ", None),
            Err(IndexError::InvalidQuery(_))
        ));

        let mut hits = lookup_hints(&builder, "ALPHA", None).unwrap();
        hits.sort();
        assert_eq!(hits, vec!["alpha_token".to_string()]);
    }
}
