//! Shard-backed index: ShardStore persistence plus MemIndex serving.
//!
//! Opening the backend reloads every recorded shard from disk into
//! the mem index, which is what makes the cache cold-start cheap:
//! navigation works immediately after a server restart, before any
//! package has been reparsed.

use tracing::debug;

use crate::codec;
use crate::error::IndexError;
use crate::index::backend::IndexBackend;
use crate::index::mem::MemIndex;
use crate::index::store::{pkg_file_stem, ShardStore};
use crate::models::{
    Comment, CompletionItem, CrossSymbol, ExtendItem, IndexBackendKind, IndexConfig, MatchQuery,
    Ref, RefKind, Relation, RelationKind, Shard, Symbol, SymbolFilter, SymbolId,
};
use crate::query::fuzzy;

/// The default backend: persistent shards served from in-memory
/// slabs.
pub struct ShardIndexBackend {
    store: ShardStore,
    mem: MemIndex,
}

impl ShardIndexBackend {
    /// Open the store and warm the mem index from every shard
    /// recorded on disk. Shards that fail verification are purged by
    /// the store and simply skipped here.
    pub fn open(config: &IndexConfig) -> Result<Self, IndexError> {
        let store = ShardStore::open(&config.cache_root)?;
        let mem = MemIndex::new();
        for (pkg, hash) in store.packages() {
            match store.load(&pkg, &hash) {
                Some(shard) => mem.publish(&pkg, shard.into()),
                None => debug!(pkg, hash, "shard skipped during warm load"),
            }
        }
        Ok(Self { store, mem })
    }

}

impl IndexBackend for ShardIndexBackend {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::Shard
    }

    fn is_stale(&self, pkg: &str, digest: &str) -> bool {
        self.store.is_stale(pkg, digest)
    }

    fn publish(&self, shard: Shard) -> Result<(), IndexError> {
        let pkg = shard.pkg_name.clone();
        let hash = shard.hash_code.clone();

        // Serialize, verify the bytes we are about to persist, then
        // write; only after the file is durable does the slab swap
        // make the new facts visible. Slabs are keyed by the same
        // stem the shard filename uses, so a warm load after restart
        // lands on identical keys.
        let bytes = codec::encode(&shard)?;
        codec::verify(&bytes)?;
        self.store.store(&pkg, &hash, &bytes)?;
        self.mem.publish(&pkg_file_stem(&pkg), shard.into());
        Ok(())
    }

    fn evict(&self, pkg: &str) -> Result<(), IndexError> {
        self.mem.evict(&pkg_file_stem(pkg));
        self.store.remove(pkg)
    }

    fn release_memory(&self) {
        self.mem.clear();
    }

    fn symbol_by_id(&self, id: SymbolId) -> Result<Option<Symbol>, IndexError> {
        Ok(self.mem.symbol_by_id(id))
    }

    fn symbols_by_name(&self, name: &str) -> Result<Vec<Symbol>, IndexError> {
        Ok(self.mem.symbols_by_name(name))
    }

    fn symbols(&self, filter: &SymbolFilter) -> Result<Vec<Symbol>, IndexError> {
        // Slabs are keyed by the shard filename stem; accept either
        // spelling of the package name.
        match &filter.pkg {
            Some(pkg) => {
                let mut filter = filter.clone();
                filter.pkg = Some(pkg_file_stem(pkg));
                Ok(self.mem.symbols(&filter))
            }
            None => Ok(self.mem.symbols(filter)),
        }
    }

    fn matching_symbols(&self, query: &MatchQuery) -> Result<Vec<Symbol>, IndexError> {
        let tokens = fuzzy::tokenize_identifier(&query.query);
        let mut out = Vec::new();
        for mut sym in self.mem.symbols(&SymbolFilter::default()) {
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
            sym.rank = rank;
            sym.references = self.mem.refs_for(sym.id, Some(RefKind::Reference)).len() as u32;
            out.push(sym);
        }
        fuzzy::sort_by_rank(&mut out);
        Ok(out)
    }

    fn references_to(&self, id: SymbolId, kind: Option<RefKind>) -> Result<Vec<Ref>, IndexError> {
        Ok(self.mem.refs_for(id, kind))
    }

    fn file_references(
        &self,
        uri: &str,
        kind: Option<RefKind>,
    ) -> Result<Vec<(SymbolId, Ref)>, IndexError> {
        Ok(self.mem.file_refs(uri, kind))
    }

    fn referred(&self, id: SymbolId) -> Result<Vec<(SymbolId, Ref)>, IndexError> {
        Ok(self.mem.referred(id))
    }

    fn relations(&self, id: SymbolId, predicate: RelationKind) -> Result<Vec<Relation>, IndexError> {
        if predicate == RelationKind::Overrides {
            // Stored edges use OverriddenBy; rewrite the predicate so
            // callers see the one they asked for.
            let rewritten = self
                .mem
                .relations_down(id, RelationKind::OverriddenBy)
                .into_iter()
                .map(|rel| Relation {
                    subject: id,
                    predicate: RelationKind::Overrides,
                    object: rel.object,
                })
                .collect();
            return Ok(rewritten);
        }
        Ok(self.mem.relations(id, predicate))
    }

    fn relations_down(
        &self,
        id: SymbolId,
        predicate: RelationKind,
    ) -> Result<Vec<Relation>, IndexError> {
        Ok(self.mem.relations_down(id, predicate))
    }

    fn relations_up(
        &self,
        id: SymbolId,
        predicate: RelationKind,
    ) -> Result<Vec<Relation>, IndexError> {
        Ok(self.mem.relations_up(id, predicate))
    }

    fn extend_items(&self, id: SymbolId) -> Result<Vec<(String, ExtendItem)>, IndexError> {
        Ok(self.mem.extend_items(id))
    }

    fn cross_symbols(&self, pkg: &str, name: &str) -> Result<Vec<CrossSymbol>, IndexError> {
        Ok(self.mem.cross_symbols(&pkg_file_stem(pkg), name))
    }

    fn completions(&self, prefix: &str) -> Result<Vec<(Symbol, CompletionItem)>, IndexError> {
        Ok(self.mem.completions(prefix))
    }

    fn comments(&self, id: SymbolId) -> Result<Vec<Comment>, IndexError> {
        let Some(sym) = self.mem.symbol_by_id(id) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for group in sym
            .comments
            .leading
            .iter()
            .chain(sym.comments.inner.iter())
            .chain(sym.comments.trailing.iter())
        {
            out.extend(group.comments.iter().cloned());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RefEntry, SymbolKind};
    use tempfile::tempdir;

    fn config(root: &std::path::Path) -> IndexConfig {
        IndexConfig::new(root, IndexBackendKind::Shard)
    }

    fn shard_with_symbol(pkg: &str, hash: &str, id: u64, name: &str) -> Shard {
        let mut shard = Shard::new(pkg, hash);
        shard.symbols.push(Symbol {
            id,
            name: name.to_string(),
            kind: SymbolKind::Function,
            ..Symbol::default()
        });
        shard
    }

    #[test]
    fn publish_persists_and_serves() {
        let dir = tempdir().expect("tempdir");
        let backend = ShardIndexBackend::open(&config(dir.path())).expect("open");

        backend
            .publish(shard_with_symbol("p", "h1", 1, "foo"))
            .expect("publish");

        assert!(!backend.is_stale("p", "h1"));
        let sym = backend.symbol_by_id(1).expect("query").expect("found");
        assert_eq!(sym.name, "foo");
    }

    #[test]
    fn reopen_serves_from_disk() {
        let dir = tempdir().expect("tempdir");
        {
            let backend = ShardIndexBackend::open(&config(dir.path())).expect("open");
            backend
                .publish(shard_with_symbol("p", "h1", 1, "foo"))
                .expect("publish");
        }
        let backend = ShardIndexBackend::open(&config(dir.path())).expect("reopen");
        let sym = backend.symbol_by_id(1).expect("query").expect("found");
        assert_eq!(sym.name, "foo");
    }

    #[test]
    fn republish_swaps_package_contents() {
        let dir = tempdir().expect("tempdir");
        let backend = ShardIndexBackend::open(&config(dir.path())).expect("open");

        backend
            .publish(shard_with_symbol("p", "h1", 1, "foo"))
            .expect("publish h1");
        backend
            .publish(shard_with_symbol("p", "h2", 2, "bar"))
            .expect("publish h2");

        assert!(backend.symbol_by_id(1).expect("query").is_none());
        assert_eq!(
            backend.symbol_by_id(2).expect("query").expect("found").name,
            "bar"
        );
    }

    #[test]
    fn matching_ranks_and_counts_references() {
        let dir = tempdir().expect("tempdir");
        let backend = ShardIndexBackend::open(&config(dir.path())).expect("open");

        let mut shard = Shard::new("p", "h1");
        shard.symbols.push(Symbol {
            id: 1,
            name: "parse".to_string(),
            kind: SymbolKind::Function,
            ..Symbol::default()
        });
        shard.symbols.push(Symbol {
            id: 2,
            name: "parseConfigFile".to_string(),
            kind: SymbolKind::Function,
            ..Symbol::default()
        });
        shard.refs.push(RefEntry {
            id: 1,
            item: Ref {
                kind: RefKind::Reference,
                ..Ref::default()
            },
        });
        backend.publish(shard).expect("publish");

        let hits = backend
            .matching_symbols(&MatchQuery::new("parse"))
            .expect("matching");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "parse");
        assert_eq!(hits[0].references, 1);
        assert_eq!(hits[1].name, "parseConfigFile");
        assert_eq!(hits[1].references, 0);

        // Empty query matches every symbol.
        let all = backend
            .matching_symbols(&MatchQuery::new(""))
            .expect("matching");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn overrides_predicate_is_rewritten() {
        let dir = tempdir().expect("tempdir");
        let backend = ShardIndexBackend::open(&config(dir.path())).expect("open");

        let mut shard = Shard::new("p", "h1");
        shard.relations.push(Relation {
            subject: 10,
            predicate: RelationKind::OverriddenBy,
            object: 20,
        });
        backend.publish(shard).expect("publish");

        let rels = backend
            .relations(10, RelationKind::Overrides)
            .expect("relations");
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].predicate, RelationKind::Overrides);
        assert_eq!(rels[0].subject, 10);
        assert_eq!(rels[0].object, 20);

        // The raw predicate still answers both directions.
        let raw = backend
            .relations(20, RelationKind::OverriddenBy)
            .expect("relations");
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn comments_flatten_symbol_groups() {
        use crate::models::{Comment, CommentGroup, CommentGroups};

        let dir = tempdir().expect("tempdir");
        let backend = ShardIndexBackend::open(&config(dir.path())).expect("open");

        let mut shard = Shard::new("p", "h1");
        let mut sym = Symbol {
            id: 5,
            name: "doc".to_string(),
            ..Symbol::default()
        };
        sym.comments = CommentGroups {
            leading: vec![CommentGroup {
                comments: vec![Comment {
                    text: "lead".to_string(),
                    ..Comment::default()
                }],
            }],
            trailing: vec![CommentGroup {
                comments: vec![Comment {
                    text: "trail".to_string(),
                    ..Comment::default()
                }],
            }],
            ..CommentGroups::default()
        };
        shard.symbols.push(sym);
        backend.publish(shard).expect("publish");

        let comments = backend.comments(5).expect("comments");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "lead");
        assert_eq!(comments[1].text, "trail");
    }
}
