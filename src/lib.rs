//! Full-text source-code indexing and search.
//!
//! Files under watched roots are tokenized with code-aware rules and kept
//! in two persistent tantivy indexes per root: a code index (one document
//! per file) and a hint index (distinct words powering typeahead). The
//! watcher keeps both synchronized with disk.

pub mod analyzer;
pub mod builder;
pub mod cancel;
pub mod config;
pub mod error;
pub mod lang;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod search;
pub mod segmenter;
pub mod source;
pub mod watcher;
