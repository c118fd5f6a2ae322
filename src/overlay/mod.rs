//! Dirty-buffer overlay.
//!
//! Holds the indexed output of the most recent parse of each open,
//! unsaved buffer. The query engine consults the overlay first; a
//! file present here masks the on-disk facts for that file (and only
//! that file) until the buffer is closed or a save-driven reindex
//! publishes a new shard.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{Ref, RefEntry, RefKind, Relation, RelationKind, Symbol, SymbolId};

/// Lightweight shard-equivalent for one file: only the facts a single
/// buffer can contribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlaySlab {
    pub symbols: Vec<Symbol>,
    pub refs: Vec<RefEntry>,
    pub relations: Vec<Relation>,
}

/// Per-open-file overlay, keyed by file URI.
#[derive(Default)]
pub struct DirtyOverlay {
    files: RwLock<HashMap<String, Arc<OverlaySlab>>>,
}

impl DirtyOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<OverlaySlab>>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Install (or replace) the overlay for one file. Called on each
    /// incremental reparse.
    pub fn publish(&self, uri: &str, slab: OverlaySlab) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.to_string(), Arc::new(slab));
    }

    /// Drop the overlay for one file (buffer closed, or a completed
    /// reindex superseded it).
    pub fn evict(&self, uri: &str) -> bool {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uri)
            .is_some()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.read().contains_key(uri)
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// URIs currently shadowed, for masking backend results.
    pub fn shadowed_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.read().keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Stable snapshot of every overlaid file.
    pub fn snapshot(&self) -> Vec<(String, Arc<OverlaySlab>)> {
        let mut entries: Vec<(String, Arc<OverlaySlab>)> = self
            .read()
            .iter()
            .map(|(uri, slab)| (uri.clone(), Arc::clone(slab)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Slab for one file, if overlaid.
    pub fn slab(&self, uri: &str) -> Option<Arc<OverlaySlab>> {
        self.read().get(uri).cloned()
    }

    pub fn symbol_by_id(&self, id: SymbolId) -> Option<Symbol> {
        for (_, slab) in self.snapshot() {
            if let Some(sym) = slab.symbols.iter().find(|sym| sym.id == id) {
                return Some(sym.clone());
            }
        }
        None
    }

    pub fn symbols_by_name(&self, name: &str) -> Vec<Symbol> {
        let mut out = Vec::new();
        for (_, slab) in self.snapshot() {
            for sym in &slab.symbols {
                if sym.name == name {
                    out.push(sym.clone());
                }
            }
        }
        out
    }

    pub fn refs_for(&self, id: SymbolId, kind: Option<RefKind>) -> Vec<Ref> {
        let mut out = Vec::new();
        for (_, slab) in self.snapshot() {
            for entry in &slab.refs {
                if entry.id == id && kind.map_or(true, |k| entry.item.kind == k) {
                    out.push(entry.item.clone());
                }
            }
        }
        out
    }

    pub fn referred(&self, container: SymbolId) -> Vec<(SymbolId, Ref)> {
        let mut out = Vec::new();
        for (_, slab) in self.snapshot() {
            for entry in &slab.refs {
                if entry.item.container == container {
                    out.push((entry.id, entry.item.clone()));
                }
            }
        }
        out
    }

    /// Relation scan with the same subject-then-object order as the
    /// mem index.
    pub fn relations(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = Vec::new();
        for (_, slab) in self.snapshot() {
            for rel in &slab.relations {
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

    pub fn relations_down(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = Vec::new();
        for (_, slab) in self.snapshot() {
            for rel in &slab.relations {
                if rel.predicate == predicate && rel.subject == id {
                    out.push(*rel);
                }
            }
        }
        out
    }

    pub fn relations_up(&self, id: SymbolId, predicate: RelationKind) -> Vec<Relation> {
        let mut out = Vec::new();
        for (_, slab) in self.snapshot() {
            for rel in &slab.relations {
                if rel.predicate == predicate && rel.object == id {
                    out.push(*rel);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Range;

    fn symbol_in(uri: &str, id: SymbolId, name: &str) -> Symbol {
        Symbol {
            id,
            name: name.to_string(),
            location: Range {
                file_uri: uri.to_string(),
                ..Range::default()
            },
            ..Symbol::default()
        }
    }

    #[test]
    fn publish_replaces_and_evict_drops() {
        let overlay = DirtyOverlay::new();
        let uri = "file:///open.cj";

        overlay.publish(
            uri,
            OverlaySlab {
                symbols: vec![symbol_in(uri, 1, "foo")],
                ..OverlaySlab::default()
            },
        );
        assert!(overlay.contains(uri));
        assert_eq!(overlay.symbol_by_id(1).expect("found").name, "foo");

        // Reparse replaces the slab wholesale.
        overlay.publish(
            uri,
            OverlaySlab {
                symbols: vec![symbol_in(uri, 1, "foo_edited")],
                ..OverlaySlab::default()
            },
        );
        assert_eq!(overlay.symbol_by_id(1).expect("found").name, "foo_edited");

        assert!(overlay.evict(uri));
        assert!(!overlay.contains(uri));
        assert!(overlay.symbol_by_id(1).is_none());
    }

    #[test]
    fn relation_scan_matches_mem_index_order() {
        let overlay = DirtyOverlay::new();
        overlay.publish(
            "file:///a.cj",
            OverlaySlab {
                relations: vec![Relation {
                    subject: 1,
                    predicate: RelationKind::BaseOf,
                    object: 1,
                }],
                ..OverlaySlab::default()
            },
        );
        let seen = overlay.relations(1, RelationKind::BaseOf);
        assert_eq!(seen.len(), 2);
    }
}
