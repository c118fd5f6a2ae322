//! Backend-agnostic query surface.
//!
//! The engine is bound to exactly one primary backend at
//! construction. The dirty overlay is always consulted first and its
//! results shadow the backend per file URI: an edited buffer masks
//! the on-disk facts for that file only. Backend failures never
//! escape this facade — they are logged and collapsed into empty
//! results, matching what callers can usefully do with them.

pub mod fuzzy;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::index::backend::IndexBackend;
use crate::models::{
    Comment, CompletionItem, CrossSymbol, ExtendItem, MatchQuery, Ref, RefKind, Relation,
    RelationKind, Symbol, SymbolFilter, SymbolId,
};
use crate::overlay::DirtyOverlay;

/// Facade over the primary backend plus the dirty overlay.
pub struct QueryEngine {
    backend: Arc<dyn IndexBackend>,
    overlay: Arc<DirtyOverlay>,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn IndexBackend>, overlay: Arc<DirtyOverlay>) -> Self {
        Self { backend, overlay }
    }

    pub fn overlay(&self) -> &Arc<DirtyOverlay> {
        &self.overlay
    }

    fn shadowed(&self) -> HashSet<String> {
        self.overlay.shadowed_uris().into_iter().collect()
    }

    fn absorb<T>(result: Result<T, crate::error::IndexError>, what: &str) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(query = what, error = %err, "query failed, returning empty result");
                None
            }
        }
    }

    /// Symbol by id: overlay first, then the backend unless the
    /// symbol's file is shadowed by an edited buffer.
    pub fn lookup_by_id(&self, id: SymbolId) -> Option<Symbol> {
        if let Some(sym) = self.overlay.symbol_by_id(id) {
            return Some(sym);
        }
        let sym = Self::absorb(self.backend.symbol_by_id(id), "lookup_by_id")??;
        if self.overlay.contains(&sym.location.file_uri) {
            // The edited buffer no longer carries this symbol.
            return None;
        }
        Some(sym)
    }

    /// Exact-name lookup.
    pub fn lookup_by_name(&self, name: &str) -> Vec<Symbol> {
        let shadowed = self.shadowed();
        let mut out = self.overlay.symbols_by_name(name);
        let from_backend =
            Self::absorb(self.backend.symbols_by_name(name), "lookup_by_name").unwrap_or_default();
        out.extend(
            from_backend
                .into_iter()
                .filter(|sym| !shadowed.contains(&sym.location.file_uri)),
        );
        out
    }

    /// Bulk iteration with optional filters.
    pub fn symbols(&self, filter: &SymbolFilter) -> Vec<Symbol> {
        let shadowed = self.shadowed();
        let from_backend =
            Self::absorb(self.backend.symbols(filter), "symbols").unwrap_or_default();
        let mut out: Vec<Symbol> = from_backend
            .into_iter()
            .filter(|sym| !shadowed.contains(&sym.location.file_uri))
            .collect();
        // Overlay slabs are keyed by file, not package, so a package
        // filter cannot be answered from them; scope and kind still
        // apply.
        if filter.pkg.is_none() {
            for (_, slab) in self.overlay.snapshot() {
                for sym in &slab.symbols {
                    if filter.accepts("", sym) {
                        out.push(sym.clone());
                    }
                }
            }
        }
        out
    }

    /// Fuzzy identifier search in rank order.
    pub fn matching(&self, query: &MatchQuery) -> Vec<Symbol> {
        let shadowed = self.shadowed();
        let mut out: Vec<Symbol> =
            Self::absorb(self.backend.matching_symbols(query), "matching")
                .unwrap_or_default()
                .into_iter()
                .filter(|sym| !shadowed.contains(&sym.location.file_uri))
                .collect();

        let tokens = fuzzy::tokenize_identifier(&query.query);
        for (_, slab) in self.overlay.snapshot() {
            for sym in &slab.symbols {
                if let Some(scope) = &query.scope {
                    if !sym.scope.starts_with(scope.as_str()) {
                        continue;
                    }
                }
                if let Some(mask) = query.flags_mask {
                    if sym.flags & mask != mask {
                        continue;
                    }
                }
                let Some(rank) = fuzzy::match_score(&tokens, &sym.name) else {
                    continue;
                };
                let mut sym = sym.clone();
                sym.rank = rank;
                sym.references = self.overlay.refs_for(sym.id, Some(RefKind::Reference)).len()
                    as u32;
                out.push(sym);
            }
        }
        fuzzy::sort_by_rank(&mut out);
        out
    }

    /// Use sites of a symbol, optionally restricted by kind.
    pub fn references_to(&self, id: SymbolId, kind: Option<RefKind>) -> Vec<Ref> {
        let shadowed = self.shadowed();
        let mut out = self.overlay.refs_for(id, kind);
        let from_backend =
            Self::absorb(self.backend.references_to(id, kind), "references_to").unwrap_or_default();
        out.extend(
            from_backend
                .into_iter()
                .filter(|r| !shadowed.contains(&r.location.file_uri)),
        );
        out
    }

    /// All refs recorded in one file. An overlaid file answers from
    /// the overlay alone.
    pub fn file_references(&self, uri: &str, kind: Option<RefKind>) -> Vec<(SymbolId, Ref)> {
        if let Some(slab) = self.overlay.slab(uri) {
            return slab
                .refs
                .iter()
                .filter(|entry| kind.map_or(true, |k| entry.item.kind == k))
                .map(|entry| (entry.id, entry.item.clone()))
                .collect();
        }
        Self::absorb(self.backend.file_references(uri, kind), "file_references")
            .unwrap_or_default()
    }

    /// Symbols used inside the declaration of `id`.
    pub fn referred(&self, id: SymbolId) -> Vec<(SymbolId, Ref)> {
        let shadowed = self.shadowed();
        let mut out = self.overlay.referred(id);
        let from_backend =
            Self::absorb(self.backend.referred(id), "referred").unwrap_or_default();
        out.extend(
            from_backend
                .into_iter()
                .filter(|(_, r)| !shadowed.contains(&r.location.file_uri)),
        );
        out
    }

    /// Relations along a predicate, merged across both directions.
    ///
    /// `Overrides` is answered from the stored `OverriddenBy` edges
    /// with the predicate rewritten, so callers always see the
    /// predicate they asked for. Overlay relations are additive: an
    /// edge carries no file URI to mask by.
    pub fn relations(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = if predicate == RelationKind::Overrides {
            self.overlay
                .relations_down(id, RelationKind::OverriddenBy)
                .into_iter()
                .map(|rel| Relation {
                    subject: id,
                    predicate: RelationKind::Overrides,
                    object: rel.object,
                })
                .collect()
        } else {
            self.overlay.relations(id, predicate)
        };
        out.extend(
            Self::absorb(self.backend.relations(id, predicate), "relations").unwrap_or_default(),
        );
        out
    }

    /// Forward edges only.
    pub fn relations_down(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = self.overlay.relations_down(id, predicate);
        out.extend(
            Self::absorb(self.backend.relations_down(id, predicate), "relations_down")
                .unwrap_or_default(),
        );
        out
    }

    /// Reverse edges only.
    pub fn relations_up(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = self.overlay.relations_up(id, predicate);
        out.extend(
            Self::absorb(self.backend.relations_up(id, predicate), "relations_up")
                .unwrap_or_default(),
        );
        out
    }

    /// Extend records for an extended symbol.
    pub fn extend_items(&self, id: SymbolId) -> Vec<(String, ExtendItem)> {
        Self::absorb(self.backend.extend_items(id), "extend_items").unwrap_or_default()
    }

    /// Cross-language bridge symbols for a package and name.
    pub fn cross_symbols(&self, pkg: &str, name: &str) -> Vec<CrossSymbol> {
        Self::absorb(self.backend.cross_symbols(pkg, name), "cross_symbols").unwrap_or_default()
    }

    /// Fuzzy-prefix completion over precomputed completion items.
    pub fn completions(&self, prefix: &str) -> Vec<(Symbol, CompletionItem)> {
        let shadowed = self.shadowed();
        let mut out: Vec<(Symbol, CompletionItem)> =
            Self::absorb(self.backend.completions(prefix), "completions")
                .unwrap_or_default()
                .into_iter()
                .filter(|(sym, _)| !shadowed.contains(&sym.location.file_uri))
                .collect();
        for (_, slab) in self.overlay.snapshot() {
            for sym in &slab.symbols {
                for item in &sym.completion_items {
                    if fuzzy::fuzzy_label_match(prefix, &item.label) {
                        out.push((sym.clone(), item.clone()));
                    }
                }
            }
        }
        out
    }

    /// Comment rows for one symbol.
    pub fn comments(&self, id: SymbolId) -> Vec<Comment> {
        Self::absorb(self.backend.comments(id), "comments").unwrap_or_default()
    }
}
