//! Error taxonomy for the index.
//!
//! Every fallible call site returns a concrete error kind; the query
//! facade is the only place that collapses failures into empty
//! results. `BackendUnavailable` is the one startup-fatal kind.

use std::path::PathBuf;

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Recorded shard no longer matches the current digest. Handled
    /// locally by triggering a reindex.
    #[error("stale shard for package {0}")]
    Stale(String),

    /// A hash is recorded but the shard file is absent. Treated as
    /// stale.
    #[error("missing shard file {0}")]
    MissingShard(PathBuf),

    /// A shard failed verification; the file has been deleted.
    #[error("malformed shard buffer")]
    MalformedBuffer(#[from] CodecError),

    /// The SQLite backend failed to open or its schema check failed
    /// irrecoverably.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An update aborted after the walk started; the old shard
    /// remains authoritative.
    #[error("update failed for package {pkg}")]
    UpdateFailed {
        pkg: String,
        #[source]
        source: Box<IndexError>,
    },

    /// Unexpected backend failure during a read.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The cancellation token was triggered.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

impl IndexError {
    pub(crate) fn update_failed(pkg: &str, source: IndexError) -> Self {
        IndexError::UpdateFailed {
            pkg: pkg.to_string(),
            source: Box::new(source),
        }
    }
}
