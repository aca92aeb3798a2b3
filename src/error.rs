use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index engine error: {0}")]
    Engine(#[from] tantivy::TantivyError),

    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("Ambiguous rename: {matches} documents match path {path}")]
    AmbiguousRename { path: String, matches: usize },

    #[error("Document for {0} is missing required fields")]
    MalformedDocument(String),

    #[error("Index pool {0} is closed")]
    PoolClosed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl IndexError {
    /// Whether the underlying cause is a disk/permission failure rather than
    /// an engine or caller error.
    pub fn is_io(&self) -> bool {
        match self {
            IndexError::Io(_) => true,
            IndexError::Engine(e) => {
                matches!(e, tantivy::TantivyError::IoError { .. })
            }
            _ => false,
        }
    }
}

/// Result of a single-file maintenance operation.
///
/// Cancellation is never an outcome; it propagates as
/// [`IndexError::Cancelled`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Successful,
    FailedWithIo,
    FailedWithError,
}

impl OpOutcome {
    pub fn from_error(err: &IndexError) -> Self {
        if err.is_io() {
            OpOutcome::FailedWithIo
        } else {
            OpOutcome::FailedWithError
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
