//! symdex — persistent symbol index for a language server.
//!
//! The index is the server's cold cache: per-package shards of
//! symbols, references, relations, extend records, and cross-language
//! bridges, content-addressed by the package's AST digest and
//! persisted across restarts. Queries are served from an in-memory
//! slab index layered under a dirty-buffer overlay, or from an
//! optional SQLite backend with the same logical schema.
//!
//! The pieces compose like this:
//!
//! ```no_run
//! use std::sync::Arc;
//! use symdex::models::{IndexBackendKind, IndexConfig};
//! use symdex::overlay::DirtyOverlay;
//! use symdex::query::QueryEngine;
//! use symdex::update::{CancelToken, UpdateController};
//!
//! # fn main() -> Result<(), symdex::error::IndexError> {
//! let config = IndexConfig::new("/workspace", IndexBackendKind::Shard);
//! let cancel = CancelToken::new();
//! let backend: Arc<_> = Arc::from(symdex::index::open_backend(&config, &cancel)?);
//!
//! let updates = UpdateController::new(Arc::clone(&backend), cancel.clone());
//! updates.update_package("demo.pkg", "digest-1", |_sink| {
//!     // The AST walker replays its facts into the sink here.
//!     Ok(())
//! })?;
//!
//! let engine = QueryEngine::new(backend, Arc::new(DirtyOverlay::new()));
//! let _hits = engine.lookup_by_name("main");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod index;
pub mod models;
pub mod overlay;
pub mod query;
pub mod update;

pub use error::IndexError;
pub use index::{open_backend, IndexBackend, ShardIndexBackend, SqliteIndexBackend};
pub use models::{IndexBackendKind, IndexConfig, Shard, Symbol, SymbolId};
pub use overlay::{DirtyOverlay, OverlaySlab};
pub use query::QueryEngine;
pub use update::{CancelToken, ShardBuilder, UpdateController, UpdateOutcome};
