//! Package reindex driver.
//!
//! `UpdateController` owns the end-to-end "reindex one package"
//! sequence: staleness early-out, per-package serialization, draining
//! the AST walk into a shard builder, and a single atomic publish.
//! Readers on other packages are never blocked, and a failed or
//! cancelled update leaves the predecessor shard authoritative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::IndexError;
use crate::index::backend::IndexBackend;
use crate::models::{CrossSymbol, ExtendEntry, ExtendItem, Ref, RefEntry, Relation, Shard, Symbol, SymbolId};

/// Injected cancellation token: one shared flag, one predicate.
///
/// Cloned into every component that must stop on shutdown; flipping
/// it is a one-way operation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Sink handed to the AST walk. Each `emit_*` call accumulates one
/// fact and polls the cancellation token, so a shutdown interrupts
/// the walk between items.
pub struct ShardBuilder {
    shard: Shard,
    cancel: CancelToken,
}

impl ShardBuilder {
    fn new(pkg: &str, digest: &str, cancel: CancelToken) -> Self {
        Self {
            shard: Shard::new(pkg, digest),
            cancel,
        }
    }

    fn check(&self) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn emit_symbol(&mut self, symbol: Symbol) -> Result<(), IndexError> {
        self.check()?;
        self.shard.symbols.push(symbol);
        Ok(())
    }

    pub fn emit_ref(&mut self, id: SymbolId, item: Ref) -> Result<(), IndexError> {
        self.check()?;
        self.shard.refs.push(RefEntry { id, item });
        Ok(())
    }

    pub fn emit_relation(&mut self, relation: Relation) -> Result<(), IndexError> {
        self.check()?;
        self.shard.relations.push(relation);
        Ok(())
    }

    pub fn emit_extend(&mut self, id: SymbolId, item: ExtendItem) -> Result<(), IndexError> {
        self.check()?;
        self.shard.extends.push(ExtendEntry { id, item });
        Ok(())
    }

    pub fn emit_cross(&mut self, cross: CrossSymbol) -> Result<(), IndexError> {
        self.check()?;
        self.shard.cross_symbols.push(cross);
        Ok(())
    }

    fn finish(self) -> Shard {
        self.shard
    }
}

/// Result of one `update_package` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new shard was built and published.
    Updated,
    /// The recorded shard already serves this digest; nothing was
    /// written.
    Unchanged,
}

/// Drives reindexing against one backend.
pub struct UpdateController {
    backend: Arc<dyn IndexBackend>,
    /// One lock per package so unrelated packages update in
    /// parallel.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel: CancelToken,
}

impl UpdateController {
    pub fn new(backend: Arc<dyn IndexBackend>, cancel: CancelToken) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.backend
    }

    fn package_lock(&self, pkg: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(pkg.to_string()).or_default())
    }

    /// Reindex one package if its digest changed.
    ///
    /// `walk` receives the builder sink and replays the package's AST
    /// facts into it. The new shard becomes visible only after it was
    /// fully built, verified, and persisted; on any failure the old
    /// shard stays authoritative.
    pub fn update_package<F>(
        &self,
        pkg: &str,
        digest: &str,
        walk: F,
    ) -> Result<UpdateOutcome, IndexError>
    where
        F: FnOnce(&mut ShardBuilder) -> Result<(), IndexError>,
    {
        if !self.backend.is_stale(pkg, digest) {
            debug!(pkg, digest, "package up to date");
            return Ok(UpdateOutcome::Unchanged);
        }

        let lock = self.package_lock(pkg);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        // A racing update may have published this digest while we
        // waited on the lock.
        if !self.backend.is_stale(pkg, digest) {
            return Ok(UpdateOutcome::Unchanged);
        }
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let mut builder = ShardBuilder::new(pkg, digest, self.cancel.clone());
        if let Err(err) = walk(&mut builder) {
            warn!(pkg, error = %err, "index walk aborted");
            return Err(IndexError::update_failed(pkg, err));
        }
        let shard = builder.finish();

        if let Err(err) = self.backend.publish(shard) {
            warn!(pkg, error = %err, "shard publish failed");
            return Err(IndexError::update_failed(pkg, err));
        }
        Ok(UpdateOutcome::Updated)
    }

    /// Drop a removed package from the index.
    pub fn remove_package(&self, pkg: &str) -> Result<(), IndexError> {
        let lock = self.package_lock(pkg);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.backend.evict(pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::backend::open_backend;
    use crate::models::{IndexBackendKind, IndexConfig, SymbolKind};
    use tempfile::tempdir;

    fn controller(root: &std::path::Path) -> UpdateController {
        let config = IndexConfig::new(root, IndexBackendKind::Shard);
        let cancel = CancelToken::new();
        let backend = open_backend(&config, &cancel).expect("backend");
        UpdateController::new(Arc::from(backend), cancel)
    }

    fn emit_one(builder: &mut ShardBuilder, id: u64, name: &str) -> Result<(), IndexError> {
        builder.emit_symbol(Symbol {
            id,
            name: name.to_string(),
            kind: SymbolKind::Function,
            ..Symbol::default()
        })
    }

    #[test]
    fn first_update_publishes() {
        let dir = tempdir().expect("tempdir");
        let ctl = controller(dir.path());

        let outcome = ctl
            .update_package("p", "h1", |b| emit_one(b, 1, "foo"))
            .expect("update");
        assert_eq!(outcome, UpdateOutcome::Updated);

        let sym = ctl
            .backend()
            .symbol_by_id(1)
            .expect("query")
            .expect("found");
        assert_eq!(sym.name, "foo");
    }

    #[test]
    fn same_digest_is_a_no_op() {
        let dir = tempdir().expect("tempdir");
        let ctl = controller(dir.path());

        ctl.update_package("p", "h1", |b| emit_one(b, 1, "foo"))
            .expect("update");

        // The walk must not even run for an unchanged digest.
        let outcome = ctl
            .update_package("p", "h1", |_| {
                panic!("walk ran for an up-to-date package")
            })
            .expect("update");
        assert_eq!(outcome, UpdateOutcome::Unchanged);
    }

    #[test]
    fn changed_digest_supersedes() {
        let dir = tempdir().expect("tempdir");
        let ctl = controller(dir.path());

        ctl.update_package("p", "h1", |b| emit_one(b, 1, "foo"))
            .expect("update");
        let outcome = ctl
            .update_package("p", "h2", |b| emit_one(b, 2, "bar"))
            .expect("update");
        assert_eq!(outcome, UpdateOutcome::Updated);

        assert!(ctl.backend().symbol_by_id(1).expect("query").is_none());
        assert_eq!(
            ctl.backend()
                .symbol_by_id(2)
                .expect("query")
                .expect("found")
                .name,
            "bar"
        );
    }

    #[test]
    fn failed_walk_keeps_old_shard() {
        let dir = tempdir().expect("tempdir");
        let ctl = controller(dir.path());

        ctl.update_package("p", "h1", |b| emit_one(b, 1, "foo"))
            .expect("update");

        let result = ctl.update_package("p", "h2", |b| {
            emit_one(b, 2, "bar")?;
            Err(IndexError::QueryFailed("walk exploded".to_string()))
        });
        assert!(matches!(result, Err(IndexError::UpdateFailed { .. })));

        // Old facts still served.
        assert_eq!(
            ctl.backend()
                .symbol_by_id(1)
                .expect("query")
                .expect("found")
                .name,
            "foo"
        );
        assert!(ctl.backend().symbol_by_id(2).expect("query").is_none());
    }

    #[test]
    fn cancellation_stops_the_walk() {
        let dir = tempdir().expect("tempdir");
        let config = IndexConfig::new(dir.path(), IndexBackendKind::Shard);
        let cancel = CancelToken::new();
        let backend = open_backend(&config, &cancel).expect("backend");
        let ctl = UpdateController::new(Arc::from(backend), cancel.clone());

        let result = ctl.update_package("p", "h1", |b| {
            emit_one(b, 1, "foo")?;
            cancel.cancel();
            emit_one(b, 2, "bar")
        });
        assert!(matches!(result, Err(IndexError::UpdateFailed { .. })));
        assert!(ctl.backend().symbol_by_id(1).expect("query").is_none());
    }

    #[test]
    fn remove_package_evicts() {
        let dir = tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        ctl.update_package("p", "h1", |b| emit_one(b, 1, "foo"))
            .expect("update");

        ctl.remove_package("p").expect("remove");
        assert!(ctl.backend().symbol_by_id(1).expect("query").is_none());
        assert!(ctl.backend().is_stale("p", "h1"));
    }
}
