//! Index backend abstraction.
//!
//! The `IndexBackend` trait is the single query-and-update surface
//! the query engine and update controller program against, so the
//! shard-backed store and the SQLite store stay interchangeable.

use crate::error::IndexError;
use crate::models::{
    Comment, CompletionItem, CrossSymbol, ExtendItem, IndexBackendKind, IndexConfig, MatchQuery,
    Ref, RefKind, Relation, RelationKind, Shard, Symbol, SymbolFilter, SymbolId,
};
use crate::update::CancelToken;

/// Pluggable index backend.
///
/// Queries return owned rows in backend order; `matching_symbols`
/// returns rank order. Implementations never panic across this
/// boundary — every failure is an `IndexError`.
pub trait IndexBackend: Send + Sync {
    /// Kind of backend implementation.
    fn kind(&self) -> IndexBackendKind;

    /// Whether the recorded index for `pkg` no longer serves
    /// `digest`.
    fn is_stale(&self, pkg: &str, digest: &str) -> bool;

    /// Atomically replace one package's facts with a freshly built
    /// shard.
    fn publish(&self, shard: Shard) -> Result<(), IndexError>;

    /// Drop one package from the index.
    fn evict(&self, pkg: &str) -> Result<(), IndexError>;

    /// Release cached memory where the backend holds any.
    fn release_memory(&self);

    fn symbol_by_id(&self, id: SymbolId) -> Result<Option<Symbol>, IndexError>;

    fn symbols_by_name(&self, name: &str) -> Result<Vec<Symbol>, IndexError>;

    /// Bulk iteration with optional package / scope / kind filters.
    fn symbols(&self, filter: &SymbolFilter) -> Result<Vec<Symbol>, IndexError>;

    /// Fuzzy identifier search; results carry recomputed `rank` and
    /// `references` counters and arrive in rank order.
    fn matching_symbols(&self, query: &MatchQuery) -> Result<Vec<Symbol>, IndexError>;

    fn references_to(&self, id: SymbolId, kind: Option<RefKind>) -> Result<Vec<Ref>, IndexError>;

    fn file_references(
        &self,
        uri: &str,
        kind: Option<RefKind>,
    ) -> Result<Vec<(SymbolId, Ref)>, IndexError>;

    /// Refs whose enclosing declaration is `id`.
    fn referred(&self, id: SymbolId) -> Result<Vec<(SymbolId, Ref)>, IndexError>;

    /// Merged forward and reverse edges for a predicate. `Overrides`
    /// is answered from the stored `OverriddenBy` edges with the
    /// predicate rewritten on the way out.
    fn relations(&self, id: SymbolId, predicate: RelationKind) -> Result<Vec<Relation>, IndexError>;

    fn relations_down(
        &self,
        id: SymbolId,
        predicate: RelationKind,
    ) -> Result<Vec<Relation>, IndexError>;

    fn relations_up(
        &self,
        id: SymbolId,
        predicate: RelationKind,
    ) -> Result<Vec<Relation>, IndexError>;

    /// Extend records keyed by (package, extended id).
    fn extend_items(&self, id: SymbolId) -> Result<Vec<(String, ExtendItem)>, IndexError>;

    fn cross_symbols(&self, pkg: &str, name: &str) -> Result<Vec<CrossSymbol>, IndexError>;

    /// Completion entries whose label fuzzy-matches `prefix`, with
    /// their owning symbols.
    fn completions(&self, prefix: &str) -> Result<Vec<(Symbol, CompletionItem)>, IndexError>;

    /// Flattened comment rows for one symbol.
    fn comments(&self, id: SymbolId) -> Result<Vec<Comment>, IndexError>;
}

/// Construct the backend selected by the configuration.
///
/// The cancellation token is wired into long-running backend work
/// (SQLite progress polling); it is the only shutdown signal the
/// backends see.
pub fn open_backend(
    config: &IndexConfig,
    cancel: &CancelToken,
) -> Result<Box<dyn IndexBackend>, IndexError> {
    match config.backend {
        IndexBackendKind::Shard => Ok(Box::new(crate::index::ShardIndexBackend::open(config)?)),
        IndexBackendKind::Sqlite => Ok(Box::new(crate::index::SqliteIndexBackend::open(
            config,
            cancel.clone(),
        )?)),
    }
}
