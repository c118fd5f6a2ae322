//! In-memory snapshot of all loaded shards.
//!
//! Each package owns one immutable slab set behind an `Arc`;
//! publishing a new shard swaps the pointer, so readers always see
//! either the old slabs or the new ones, never a mix. Lookups are
//! linear scans in slab insertion order — shards stay compact and the
//! per-package partition keeps scans short.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{
    CompletionItem, CrossSymbol, ExtendEntry, ExtendItem, Ref, RefEntry, RefKind, Relation,
    RelationKind, Shard, Symbol, SymbolFilter, SymbolId,
};
use crate::query::fuzzy;

/// Decoded slab set for one package, same shape as a shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageSlabs {
    pub symbols: Vec<Symbol>,
    pub refs: Vec<RefEntry>,
    pub relations: Vec<Relation>,
    pub extends: Vec<ExtendEntry>,
    pub cross_symbols: Vec<CrossSymbol>,
}

impl From<Shard> for PackageSlabs {
    fn from(shard: Shard) -> Self {
        Self {
            symbols: shard.symbols,
            refs: shard.refs,
            relations: shard.relations,
            extends: shard.extends,
            cross_symbols: shard.cross_symbols,
        }
    }
}

/// Read-only view over every currently-loaded package.
#[derive(Default)]
pub struct MemIndex {
    packages: RwLock<HashMap<String, Arc<PackageSlabs>>>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<PackageSlabs>>> {
        self.packages.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<PackageSlabs>>> {
        self.packages.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically replace one package's slabs.
    pub fn publish(&self, pkg: &str, slabs: PackageSlabs) {
        self.write().insert(pkg.to_string(), Arc::new(slabs));
    }

    /// Drop one package. Returns whether it was loaded.
    pub fn evict(&self, pkg: &str) -> bool {
        self.write().remove(pkg).is_some()
    }

    /// Drop everything (explicit memory release).
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stable snapshot of every package's slabs, ordered by name so
    /// repeated scans yield identical sequences.
    fn snapshot(&self) -> Vec<(String, Arc<PackageSlabs>)> {
        let mut entries: Vec<(String, Arc<PackageSlabs>)> = self
            .read()
            .iter()
            .map(|(pkg, slabs)| (pkg.clone(), Arc::clone(slabs)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn symbols(&self, filter: &SymbolFilter) -> Vec<Symbol> {
        let mut out = Vec::new();
        for (pkg, slabs) in self.snapshot() {
            for sym in &slabs.symbols {
                if filter.accepts(&pkg, sym) {
                    out.push(sym.clone());
                }
            }
        }
        out
    }

    pub fn symbol_by_id(&self, id: SymbolId) -> Option<Symbol> {
        for (_, slabs) in self.snapshot() {
            if let Some(sym) = slabs.symbols.iter().find(|sym| sym.id == id) {
                return Some(sym.clone());
            }
        }
        None
    }

    pub fn symbols_by_name(&self, name: &str) -> Vec<Symbol> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for sym in &slabs.symbols {
                if sym.name == name {
                    out.push(sym.clone());
                }
            }
        }
        out
    }

    /// Use sites of `id`, optionally restricted to one ref kind.
    pub fn refs_for(&self, id: SymbolId, kind: Option<RefKind>) -> Vec<Ref> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for entry in &slabs.refs {
                if entry.id == id && kind.map_or(true, |k| entry.item.kind == k) {
                    out.push(entry.item.clone());
                }
            }
        }
        out
    }

    /// All refs recorded in one file.
    pub fn file_refs(&self, uri: &str, kind: Option<RefKind>) -> Vec<(SymbolId, Ref)> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for entry in &slabs.refs {
                if entry.item.location.file_uri == uri
                    && kind.map_or(true, |k| entry.item.kind == k)
                {
                    out.push((entry.id, entry.item.clone()));
                }
            }
        }
        out
    }

    /// Refs whose enclosing declaration is `container`.
    pub fn referred(&self, container: SymbolId) -> Vec<(SymbolId, Ref)> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for entry in &slabs.refs {
                if entry.item.container == container {
                    out.push((entry.id, entry.item.clone()));
                }
            }
        }
        out
    }

    /// Relations touching `id` with the given predicate. Each stored
    /// edge is checked subject-first then object, so a self-loop is
    /// yielded twice.
    pub fn relations(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for rel in &slabs.relations {
                if rel.predicate != predicate {
                    continue;
                }
                if rel.subject == id {
                    out.push(*rel);
                }
                if rel.object == id {
                    out.push(*rel);
                }
            }
        }
        out
    }

    /// Forward edges only: `subject == id`.
    pub fn relations_down(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for rel in &slabs.relations {
                if rel.predicate == predicate && rel.subject == id {
                    out.push(*rel);
                }
            }
        }
        out
    }

    /// Reverse edges only: `object == id`.
    pub fn relations_up(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for rel in &slabs.relations {
                if rel.predicate == predicate && rel.object == id {
                    out.push(*rel);
                }
            }
        }
        out
    }

    /// Extend records for one extended symbol, with the owning
    /// package name.
    pub fn extend_items(&self, id: SymbolId) -> Vec<(String, ExtendItem)> {
        let mut out = Vec::new();
        for (pkg, slabs) in self.snapshot() {
            for entry in &slabs.extends {
                if entry.id == id {
                    out.push((pkg.clone(), entry.item.clone()));
                }
            }
        }
        out
    }

    pub fn cross_symbols(&self, pkg: &str, name: &str) -> Vec<CrossSymbol> {
        let mut out = Vec::new();
        for (slab_pkg, slabs) in self.snapshot() {
            if slab_pkg != pkg {
                continue;
            }
            for crs in &slabs.cross_symbols {
                if crs.name == name {
                    out.push(crs.clone());
                }
            }
        }
        out
    }

    /// Completion entries whose label fuzzy-matches `prefix`.
    pub fn completions(&self, prefix: &str) -> Vec<(Symbol, CompletionItem)> {
        let mut out = Vec::new();
        for (_, slabs) in self.snapshot() {
            for sym in &slabs.symbols {
                for item in &sym.completion_items {
                    if fuzzy::fuzzy_label_match(prefix, &item.label) {
                        out.push((sym.clone(), item.clone()));
                    }
                }
            }
        }
        out
    }
}
