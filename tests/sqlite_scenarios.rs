//! The same end-to-end scenarios against the SQLite backend, plus
//! checks that both backends answer identically for a shared
//! workload.

use std::path::Path;
use std::sync::Arc;

use symdex::models::{
    CrossSymbol, ExtendItem, IndexBackendKind, IndexConfig, MatchQuery, Range, Ref, RefKind,
    Relation, RelationKind, Symbol, SymbolFilter, SymbolKind,
};
use symdex::overlay::OverlaySlab;
use symdex::update::{CancelToken, UpdateController, UpdateOutcome};
use symdex::{DirtyOverlay, IndexBackend, QueryEngine};
use tempfile::tempdir;

struct Fixture {
    controller: UpdateController,
    engine: QueryEngine,
    backend: Arc<dyn IndexBackend>,
}

fn fixture(root: &Path) -> Fixture {
    let config = IndexConfig::new(root, IndexBackendKind::Sqlite);
    let cancel = CancelToken::new();
    let backend: Arc<dyn IndexBackend> =
        Arc::from(symdex::open_backend(&config, &cancel).expect("backend"));
    let controller = UpdateController::new(Arc::clone(&backend), cancel);
    let engine = QueryEngine::new(Arc::clone(&backend), Arc::new(DirtyOverlay::new()));
    Fixture {
        controller,
        engine,
        backend,
    }
}

fn symbol(uri: &str, id: u64, name: &str) -> Symbol {
    Symbol {
        id,
        name: name.to_string(),
        kind: SymbolKind::Function,
        location: Range {
            file_uri: uri.to_string(),
            ..Range::default()
        },
        ..Symbol::default()
    }
}

#[test]
fn cold_load_and_lookup() {
    let dir = tempdir().expect("tempdir");
    let fx = fixture(dir.path());

    let outcome = fx
        .controller
        .update_package("p", "h1", |sink| {
            sink.emit_symbol(symbol("file:///p/a.cj", 0x1, "foo"))
        })
        .expect("update");
    assert_eq!(outcome, UpdateOutcome::Updated);
    assert_eq!(fx.engine.lookup_by_id(0x1).expect("found").name, "foo");
}

#[test]
fn same_digest_is_a_no_op() {
    let dir = tempdir().expect("tempdir");
    let fx = fixture(dir.path());

    fx.controller
        .update_package("p", "h1", |sink| {
            sink.emit_symbol(symbol("file:///p/a.cj", 0x1, "foo"))
        })
        .expect("update");

    let outcome = fx
        .controller
        .update_package("p", "h1", |_| panic!("walk ran for unchanged digest"))
        .expect("update");
    assert_eq!(outcome, UpdateOutcome::Unchanged);
    assert!(!fx.backend.is_stale("p", "h1"));
}

#[test]
fn changed_digest_supersedes() {
    let dir = tempdir().expect("tempdir");
    let fx = fixture(dir.path());

    fx.controller
        .update_package("p", "h1", |sink| {
            sink.emit_symbol(symbol("file:///p/a.cj", 0x1, "foo"))
        })
        .expect("update");
    fx.controller
        .update_package("p", "h2", |sink| {
            sink.emit_symbol(symbol("file:///p/a.cj", 0x2, "bar"))
        })
        .expect("update");

    assert!(fx.engine.lookup_by_id(0x1).is_none());
    assert_eq!(fx.engine.lookup_by_id(0x2).expect("found").name, "bar");
}

#[test]
fn overlay_shadows_sql_results_too() {
    let dir = tempdir().expect("tempdir");
    let fx = fixture(dir.path());
    let uri = "file:///p/a.cj";

    fx.controller
        .update_package("p", "h1", |sink| sink.emit_symbol(symbol(uri, 0x1, "foo")))
        .expect("update");

    fx.engine.overlay().publish(
        uri,
        OverlaySlab {
            symbols: vec![symbol(uri, 0x1, "foo_edited")],
            ..OverlaySlab::default()
        },
    );
    assert_eq!(
        fx.engine.lookup_by_id(0x1).expect("found").name,
        "foo_edited"
    );

    fx.engine.overlay().evict(uri);
    assert_eq!(fx.engine.lookup_by_id(0x1).expect("found").name, "foo");
}

#[test]
fn relation_symmetry_and_override_rewrite() {
    let dir = tempdir().expect("tempdir");
    let fx = fixture(dir.path());

    fx.controller
        .update_package("p", "h1", |sink| {
            sink.emit_relation(Relation {
                subject: 0x1,
                predicate: RelationKind::BaseOf,
                object: 0x2,
            })?;
            sink.emit_relation(Relation {
                subject: 0x5,
                predicate: RelationKind::OverriddenBy,
                object: 0x6,
            })
        })
        .expect("update");

    assert_eq!(fx.engine.relations(0x1, RelationKind::BaseOf).len(), 1);
    assert_eq!(fx.engine.relations(0x2, RelationKind::BaseOf).len(), 1);

    let overrides = fx.engine.relations(0x5, RelationKind::Overrides);
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].predicate, RelationKind::Overrides);
    assert_eq!(overrides[0].object, 0x6);
}

#[test]
fn separator_package_names_answer_identically_on_both_backends() {
    let shard_dir = tempdir().expect("tempdir");
    let sqlite_dir = tempdir().expect("tempdir");
    let cancel = CancelToken::new();

    let backends: Vec<Arc<dyn IndexBackend>> = vec![
        Arc::from(
            symdex::open_backend(
                &IndexConfig::new(shard_dir.path(), IndexBackendKind::Shard),
                &cancel,
            )
            .expect("shard backend"),
        ),
        Arc::from(
            symdex::open_backend(
                &IndexConfig::new(sqlite_dir.path(), IndexBackendKind::Sqlite),
                &cancel,
            )
            .expect("sqlite backend"),
        ),
    ];

    for backend in &backends {
        let controller = UpdateController::new(Arc::clone(backend), cancel.clone());
        controller
            .update_package("ark/lsp/service", "h1", |sink| {
                sink.emit_symbol(Symbol {
                    id: 0x1,
                    name: "serve".to_string(),
                    scope: "ark.lsp.service:".to_string(),
                    kind: SymbolKind::Function,
                    location: Range {
                        file_uri: "file:///ark/serve.cj".to_string(),
                        ..Range::default()
                    },
                    ..Symbol::default()
                })?;
                sink.emit_cross(CrossSymbol {
                    id: 0x2,
                    name: "bridge".to_string(),
                    container: 0x1,
                    ..CrossSymbol::default()
                })?;
                sink.emit_extend(
                    0x1,
                    ExtendItem {
                        id: 0x3,
                        modifier: "public".to_string(),
                        interface_name: "Server".to_string(),
                    },
                )
            })
            .expect("update");
        assert!(!backend.is_stale("ark/lsp/service", "h1"));
    }

    for backend in &backends {
        // Either spelling of the package name answers identically.
        for pkg in ["ark/lsp/service", "ark.lsp.service"] {
            let filter = SymbolFilter {
                pkg: Some(pkg.to_string()),
                ..SymbolFilter::default()
            };
            let symbols = backend.symbols(&filter).expect("symbols");
            assert_eq!(symbols.len(), 1, "package filter {pkg}");
            assert_eq!(symbols[0].name, "serve");

            let cross = backend.cross_symbols(pkg, "bridge").expect("cross symbols");
            assert_eq!(cross.len(), 1, "cross symbols for {pkg}");
            assert_eq!(cross[0].container, 0x1);
        }

        // Extend records report the dotted stem as the owning package.
        let extends = backend.extend_items(0x1).expect("extends");
        assert_eq!(extends.len(), 1);
        assert_eq!(extends[0].0, "ark.lsp.service");
        assert_eq!(extends[0].1.interface_name, "Server");
    }
}

#[test]
fn both_backends_agree_on_a_shared_workload() {
    let shard_dir = tempdir().expect("tempdir");
    let sqlite_dir = tempdir().expect("tempdir");

    let shard_config = IndexConfig::new(shard_dir.path(), IndexBackendKind::Shard);
    let sqlite_config = IndexConfig::new(sqlite_dir.path(), IndexBackendKind::Sqlite);
    let cancel = CancelToken::new();

    let backends: Vec<Arc<dyn IndexBackend>> = vec![
        Arc::from(symdex::open_backend(&shard_config, &cancel).expect("shard backend")),
        Arc::from(symdex::open_backend(&sqlite_config, &cancel).expect("sqlite backend")),
    ];

    for backend in &backends {
        let controller = UpdateController::new(Arc::clone(backend), cancel.clone());
        controller
            .update_package("demo.pkg", "h1", |sink| {
                sink.emit_symbol(symbol("file:///d/a.cj", 0x1, "parseConfig"))?;
                sink.emit_symbol(symbol("file:///d/a.cj", 0x2, "renderFrame"))?;
                sink.emit_ref(
                    0x1,
                    Ref {
                        location: Range {
                            file_uri: "file:///d/b.cj".to_string(),
                            ..Range::default()
                        },
                        kind: RefKind::Reference,
                        container: 0x2,
                        ..Ref::default()
                    },
                )?;
                sink.emit_relation(Relation {
                    subject: 0x1,
                    predicate: RelationKind::BaseOf,
                    object: 0x2,
                })
            })
            .expect("update");
    }

    let engines: Vec<QueryEngine> = backends
        .iter()
        .map(|b| QueryEngine::new(Arc::clone(b), Arc::new(DirtyOverlay::new())))
        .collect();

    for engine in &engines {
        assert_eq!(engine.lookup_by_id(0x1).expect("found").name, "parseConfig");
        assert_eq!(engine.lookup_by_name("renderFrame").len(), 1);

        let hits = engine.matching(&MatchQuery::new("parse"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 0x1);
        assert_eq!(hits[0].references, 1);

        assert_eq!(engine.references_to(0x1, None).len(), 1);
        assert_eq!(engine.referred(0x2).len(), 1);
        assert_eq!(engine.relations(0x1, RelationKind::BaseOf).len(), 1);
        assert_eq!(
            engine
                .file_references("file:///d/b.cj", Some(RefKind::Reference))
                .len(),
            1
        );
    }
}
