//! SQLite-backed index.
//!
//! The same logical schema as the shard backend, materialized in a
//! relational database. One writer connection is serialized behind a
//! mutex and every write runs inside a transaction; readers come from
//! a small pool of read-only connections, each with its own prepared-
//! statement cache keyed by SQL text. The connection is configured
//! with:
//!
//! - `journal_mode = WAL` for concurrent readers and a single writer.
//! - `synchronous = NORMAL` as a balance between safety and speed.
//! - a busy handler that sleeps briefly and retries `database is
//!   locked` errors until shutdown is requested.
//!
//! Cancellation is cooperative: a progress handler polls the injected
//! token while statements run, so long scans stop mid-flight with
//! `Cancelled`, and each operation also checks the token before
//! touching the database at all.
//!
//! On open the schema is checked against the `application_id` and
//! `user_version` pragmas. A version mismatch records a deferred
//! migration: the first operation that needs the database applies the
//! upgrade scripts in sequence and, if the target version is still
//! unreachable, drops and recreates the schema inside a transaction.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::index::backend::IndexBackend;
use crate::index::statements as sql;
use crate::index::store::pkg_file_stem;
use crate::models::{
    id_from_bytes, id_to_bytes, Comment, CommentKind, CommentStyle, CompletionItem, CrossSymbol,
    ExtendItem, FileRecord, IndexBackendKind, IndexConfig, MatchQuery, Position, Range, Ref,
    RefKind, Relation, RelationKind, Shard, Symbol, SymbolFilter, SymbolId, SymbolKind,
};
use crate::query::fuzzy;
use crate::update::CancelToken;

// Serialized-mode configuration happens at most once per process; an
// explicit lock-protected flag rather than a call-once cell so the
// check is observable.
static CONFIGURED: Mutex<bool> = Mutex::new(false);

fn configure_process_once() {
    let mut configured = CONFIGURED.lock().unwrap_or_else(|e| e.into_inner());
    if *configured {
        return;
    }
    debug!(version = rusqlite::version(), "sqlite backend configured");
    *configured = true;
}

// The busy handler is installed as a plain callback, so the shutdown
// predicate it polls is process-wide; every token handed to `open`
// feeds it.
static SHUTDOWN_TOKENS: Mutex<Vec<CancelToken>> = Mutex::new(Vec::new());

const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Statements between progress-handler polls of the cancellation
/// token.
const PROGRESS_POLL_OPS: i32 = 100;

fn register_shutdown_token(token: &CancelToken) {
    SHUTDOWN_TOKENS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(token.clone());
}

fn shutdown_requested() -> bool {
    SHUTDOWN_TOKENS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .any(CancelToken::is_cancelled)
}

// Retries a locked database every 100ms until shutdown is requested.
fn busy_wait(_try_count: i32) -> bool {
    std::thread::sleep(BUSY_RETRY_DELAY);
    !shutdown_requested()
}

// An interrupted statement is a cooperative cancellation, not a query
// failure.
fn interrupted_to_cancelled(err: IndexError) -> IndexError {
    if let IndexError::Sql(rusqlite::Error::SqliteFailure(cause, _)) = &err {
        if cause.code == rusqlite::ErrorCode::OperationInterrupted {
            return IndexError::Cancelled;
        }
    }
    err
}

/// SQLite implementation of `IndexBackend`.
pub struct SqliteIndexBackend {
    path: PathBuf,
    in_memory: bool,
    read_only: bool,
    cancel: CancelToken,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    /// Recorded `user_version` awaiting migration; drained by the
    /// first operation that touches the database.
    pending_upgrade: Mutex<Option<i32>>,
}

impl SqliteIndexBackend {
    /// Open (or create) the index database described by the
    /// configuration. Fails with `BackendUnavailable` when the file
    /// cannot be opened or the schema check is irrecoverable.
    pub fn open(config: &IndexConfig, cancel: CancelToken) -> Result<Self, IndexError> {
        configure_process_once();
        register_shutdown_token(&cancel);

        let path = config.db_path();
        if !config.open_in_memory {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| IndexError::BackendUnavailable(err.to_string()))?;
            }
        }

        let conn = open_connection(&path, config.open_read_only, config.open_in_memory, &cancel)?;

        let schema_empty: bool = conn
            .query_row(
                "SELECT COUNT(*) = 0 FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .map_err(|err| IndexError::BackendUnavailable(err.to_string()))?;

        let mut pending = None;
        if schema_empty {
            if config.open_read_only {
                return Err(IndexError::BackendUnavailable(
                    "read-only open of an uninitialized index database".to_string(),
                ));
            }
            conn.execute_batch(sql::CREATE_DB)
                .map_err(|err| IndexError::BackendUnavailable(err.to_string()))?;
        } else {
            let app_id: i32 = conn
                .pragma_query_value(None, "application_id", |row| row.get(0))
                .map_err(|err| IndexError::BackendUnavailable(err.to_string()))?;
            if app_id != sql::APPLICATION_ID {
                return Err(IndexError::BackendUnavailable(format!(
                    "not an index database (application_id {app_id})"
                )));
            }
            let user_version: i32 = conn
                .pragma_query_value(None, "user_version", |row| row.get(0))
                .map_err(|err| IndexError::BackendUnavailable(err.to_string()))?;
            if user_version != sql::SCHEMA_VERSION {
                if config.open_read_only {
                    return Err(IndexError::BackendUnavailable(format!(
                        "schema version {user_version} needs migration but database is read-only"
                    )));
                }
                pending = Some(user_version);
            }
        }

        Ok(Self {
            path,
            in_memory: config.open_in_memory,
            read_only: config.open_read_only,
            cancel,
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            pending_upgrade: Mutex::new(pending),
        })
    }

    fn lock_writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply any deferred schema migration. Fast-path when nothing is
    /// pending.
    fn ensure_ready(&self) -> Result<(), IndexError> {
        let mut pending = self
            .pending_upgrade
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(from) = *pending else {
            return Ok(());
        };

        let conn = self.lock_writer();
        let mut version = from;
        for (ver, script) in sql::UPGRADES {
            if *ver < version {
                continue;
            }
            conn.execute_batch(script)?;
            version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        }
        if version != sql::SCHEMA_VERSION {
            warn!(
                from_version = from,
                "schema unreachable by upgrades, rebuilding index database"
            );
            conn.execute_batch("BEGIN")?;
            let rebuilt = conn
                .execute_batch(sql::DELETE_DB)
                .and_then(|()| conn.execute_batch(sql::CREATE_DB));
            match rebuilt {
                Ok(()) => conn.execute_batch("COMMIT")?,
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(err.into());
                }
            }
        }
        *pending = None;
        Ok(())
    }

    /// Run a read against a pooled read-only connection. In-memory
    /// databases have exactly one connection, so reads share the
    /// writer there.
    fn with_reader<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, IndexError>,
    ) -> Result<R, IndexError> {
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        self.ensure_ready()?;
        if self.in_memory {
            let conn = self.lock_writer();
            return f(&conn).map_err(interrupted_to_cancelled);
        }
        let pooled = {
            self.readers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop()
        };
        let conn = match pooled {
            Some(conn) => conn,
            None => open_connection(&self.path, true, false, &self.cancel)?,
        };
        let out = f(&conn);
        self.readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conn);
        out.map_err(interrupted_to_cancelled)
    }

    /// Run `callback` inside a write transaction. Commits on success;
    /// any error (including commit failure) rolls the transaction
    /// back.
    pub fn update<F>(&self, callback: F) -> Result<(), IndexError>
    where
        F: FnOnce(&DbUpdate<'_>) -> Result<(), IndexError>,
    {
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        if self.read_only {
            return Err(IndexError::BackendUnavailable(
                "index database is read-only".to_string(),
            ));
        }
        self.ensure_ready()?;
        let mut conn = self.lock_writer();
        let result = (|| {
            let tx = conn.transaction()?;
            callback(&DbUpdate { conn: &tx })?;
            tx.commit()?;
            Ok(())
        })();
        result.map_err(interrupted_to_cancelled)
    }

    /// Whether a source file is recorded.
    pub fn file_exists(&self, uri: &str) -> Result<bool, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_FILE_EXISTS)?;
            Ok(stmt.query_row(params![uri], |row| row.get(0))?)
        })
    }

    /// Digest recorded for a file id.
    pub fn file_digest(&self, file_id: u32) -> Result<Option<String>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_FILE_DIGEST)?;
            Ok(stmt
                .query_row(params![file_id], |row| row.get(0))
                .optional()?)
        })
    }

    pub fn file_by_uri(&self, uri: &str) -> Result<Option<FileRecord>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_FILE_BY_URI)?;
            Ok(stmt
                .query_row(params![uri], file_from_row)
                .optional()?)
        })
    }

    pub fn file_by_id(&self, file_id: u32) -> Result<Option<FileRecord>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_FILE_BY_ID)?;
            Ok(stmt
                .query_row(params![file_id], file_from_row)
                .optional()?)
        })
    }

    /// Read a configuration value from the `meta` table.
    pub fn meta(&self, key: &str) -> Result<Option<String>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_META)?;
            Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
        })
    }

    /// Store a configuration value in the `meta` table.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), IndexError> {
        self.update(|u| {
            let mut stmt = u.conn.prepare_cached(sql::UPSERT_META)?;
            stmt.execute(params![key, value])?;
            Ok(())
        })
    }

    fn is_stale_inner(&self, pkg: &str, digest: &str) -> Result<bool, IndexError> {
        let pkg = pkg_file_stem(pkg);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_PACKAGE_DIGEST)?;
            let recorded: Option<String> = stmt
                .query_row(params![pkg], |row| row.get(0))
                .optional()?;
            Ok(recorded.as_deref() != Some(digest))
        })
    }
}

/// Write handle passed to `update` callbacks; every method runs in
/// the surrounding transaction.
pub struct DbUpdate<'a> {
    conn: &'a Connection,
}

impl DbUpdate<'_> {
    /// Remove everything recorded for one package.
    pub fn delete_package(&self, pkg: &str) -> Result<(), IndexError> {
        for stmt_sql in [
            sql::DELETE_PACKAGE_SYMBOLS,
            sql::DELETE_PACKAGE_REFS,
            sql::DELETE_PACKAGE_RELATIONS,
            sql::DELETE_PACKAGE_EXTENDS,
            sql::DELETE_PACKAGE_CROSS,
            sql::DELETE_PACKAGE_COMPLETIONS,
            sql::DELETE_PACKAGE_COMMENTS,
            sql::DELETE_PACKAGE,
        ] {
            let mut stmt = self.conn.prepare_cached(stmt_sql)?;
            stmt.execute(params![pkg])?;
        }
        Ok(())
    }

    pub fn record_package(&self, pkg: &str, digest: &str) -> Result<(), IndexError> {
        let mut stmt = self.conn.prepare_cached(sql::UPSERT_PACKAGE)?;
        stmt.execute(params![pkg, digest])?;
        Ok(())
    }

    pub fn insert_symbols(&self, pkg: &str, symbols: &[Symbol]) -> Result<(), IndexError> {
        let rows: Vec<Vec<Value>> = symbols
            .iter()
            .filter(|sym| sym.id != crate::models::NO_SYMBOL)
            .map(|sym| symbol_values(pkg, sym))
            .collect();
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_SYMBOLS_HEAD,
            sql::MULTI_INSERT_SYMBOLS_ROW,
            &rows,
        )
    }

    pub fn insert_refs(
        &self,
        pkg: &str,
        refs: &[(SymbolId, Ref)],
    ) -> Result<(), IndexError> {
        let rows: Vec<Vec<Value>> = refs
            .iter()
            .map(|(id, item)| {
                vec![
                    id_value(*id),
                    Value::Text(pkg.to_string()),
                    Value::Text(item.location.file_uri.clone()),
                    Value::Integer(i64::from(item.location.begin.line)),
                    Value::Integer(i64::from(item.location.begin.column)),
                    Value::Integer(i64::from(item.location.end.line)),
                    Value::Integer(i64::from(item.location.end.column)),
                    Value::Text(item.kind.as_str().to_string()),
                    id_value(item.container),
                    Value::Integer(i64::from(item.is_cjo_ref)),
                    Value::Integer(i64::from(item.is_super)),
                ]
            })
            .collect();
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_REFS_HEAD,
            sql::MULTI_INSERT_REFS_ROW,
            &rows,
        )
    }

    pub fn insert_relations(&self, pkg: &str, relations: &[Relation]) -> Result<(), IndexError> {
        let rows: Vec<Vec<Value>> = relations
            .iter()
            .map(|rel| {
                vec![
                    id_value(rel.subject),
                    Value::Text(rel.predicate.as_str().to_string()),
                    id_value(rel.object),
                    Value::Text(pkg.to_string()),
                ]
            })
            .collect();
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_RELATIONS_HEAD,
            sql::MULTI_INSERT_RELATIONS_ROW,
            &rows,
        )
    }

    pub fn insert_extends(
        &self,
        pkg: &str,
        extends: &[(SymbolId, ExtendItem)],
    ) -> Result<(), IndexError> {
        let rows: Vec<Vec<Value>> = extends
            .iter()
            .map(|(extended, item)| {
                vec![
                    id_value(*extended),
                    id_value(item.id),
                    Value::Text(item.modifier.clone()),
                    Value::Text(item.interface_name.clone()),
                    Value::Text(pkg.to_string()),
                ]
            })
            .collect();
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_EXTENDS_HEAD,
            sql::MULTI_INSERT_EXTENDS_ROW,
            &rows,
        )
    }

    pub fn insert_cross_symbols(
        &self,
        pkg: &str,
        cross: &[CrossSymbol],
    ) -> Result<(), IndexError> {
        let rows: Vec<Vec<Value>> = cross
            .iter()
            .map(|crs| {
                vec![
                    Value::Text(pkg.to_string()),
                    id_value(crs.id),
                    Value::Text(crs.name.clone()),
                    Value::Integer(i64::from(crs.cross_type)),
                    id_value(crs.container),
                    Value::Text(crs.container_name.clone()),
                    Value::Text(crs.location.file_uri.clone()),
                    Value::Integer(i64::from(crs.location.begin.line)),
                    Value::Integer(i64::from(crs.location.begin.column)),
                    Value::Integer(i64::from(crs.location.end.line)),
                    Value::Integer(i64::from(crs.location.end.column)),
                    Value::Integer(i64::from(crs.declaration.begin.line)),
                    Value::Integer(i64::from(crs.declaration.begin.column)),
                    Value::Integer(i64::from(crs.declaration.end.line)),
                    Value::Integer(i64::from(crs.declaration.end.column)),
                ]
            })
            .collect();
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_CROSS_HEAD,
            sql::MULTI_INSERT_CROSS_ROW,
            &rows,
        )
    }

    pub fn insert_completions(
        &self,
        pkg: &str,
        completions: &[(SymbolId, CompletionItem)],
    ) -> Result<(), IndexError> {
        let rows: Vec<Vec<Value>> = completions
            .iter()
            .map(|(id, item)| {
                vec![
                    id_value(*id),
                    Value::Text(item.label.clone()),
                    Value::Text(item.insert_text.clone()),
                    Value::Text(pkg.to_string()),
                ]
            })
            .collect();
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_COMPLETIONS_HEAD,
            sql::MULTI_INSERT_COMPLETIONS_ROW,
            &rows,
        )
    }

    pub fn insert_comments(&self, pkg: &str, symbols: &[Symbol]) -> Result<(), IndexError> {
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for sym in symbols {
            let groups = [
                ("leading", &sym.comments.leading),
                ("inner", &sym.comments.inner),
                ("trailing", &sym.comments.trailing),
            ];
            for (grp, list) in groups {
                for (grp_index, group) in list.iter().enumerate() {
                    for (ordinal, comment) in group.comments.iter().enumerate() {
                        rows.push(vec![
                            id_value(sym.id),
                            Value::Text(grp.to_string()),
                            Value::Integer(grp_index as i64),
                            Value::Integer(ordinal as i64),
                            Value::Text(comment.style.as_str().to_string()),
                            Value::Text(comment.kind.as_str().to_string()),
                            Value::Text(comment.text.clone()),
                            Value::Text(pkg.to_string()),
                        ]);
                    }
                }
            }
        }
        multi_insert(
            self.conn,
            sql::MULTI_INSERT_COMMENTS_HEAD,
            sql::MULTI_INSERT_COMMENTS_ROW,
            &rows,
        )
    }

    pub fn insert_file(&self, record: &FileRecord) -> Result<(), IndexError> {
        let mut stmt = self.conn.prepare_cached(sql::INSERT_FILE)?;
        stmt.execute(params![
            record.file_id,
            record.uri,
            record.package,
            record.module,
            record.digest,
        ])?;
        Ok(())
    }

    pub fn delete_file(&self, uri: &str) -> Result<(), IndexError> {
        let mut stmt = self.conn.prepare_cached(sql::DELETE_FILE)?;
        stmt.execute(params![uri])?;
        Ok(())
    }
}

impl IndexBackend for SqliteIndexBackend {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::Sqlite
    }

    fn is_stale(&self, pkg: &str, digest: &str) -> bool {
        match self.is_stale_inner(pkg, digest) {
            Ok(stale) => stale,
            Err(err) => {
                warn!(pkg, error = %err, "staleness check failed, assuming stale");
                true
            }
        }
    }

    fn publish(&self, shard: Shard) -> Result<(), IndexError> {
        // Package rows share the shard filename stem, so both
        // backends key a separator-bearing package identically.
        let pkg = pkg_file_stem(&shard.pkg_name);
        let refs: Vec<(SymbolId, Ref)> = shard
            .refs
            .iter()
            .map(|entry| (entry.id, entry.item.clone()))
            .collect();
        let extends: Vec<(SymbolId, ExtendItem)> = shard
            .extends
            .iter()
            .map(|entry| (entry.id, entry.item.clone()))
            .collect();
        let completions: Vec<(SymbolId, CompletionItem)> = shard
            .symbols
            .iter()
            .flat_map(|sym| {
                sym.completion_items
                    .iter()
                    .map(|item| (sym.id, item.clone()))
            })
            .collect();

        self.update(|u| {
            u.delete_package(&pkg)?;
            u.insert_symbols(&pkg, &shard.symbols)?;
            u.insert_refs(&pkg, &refs)?;
            u.insert_relations(&pkg, &shard.relations)?;
            u.insert_extends(&pkg, &extends)?;
            u.insert_cross_symbols(&pkg, &shard.cross_symbols)?;
            u.insert_completions(&pkg, &completions)?;
            u.insert_comments(&pkg, &shard.symbols)?;
            u.record_package(&pkg, &shard.hash_code)?;
            Ok(())
        })
    }

    fn evict(&self, pkg: &str) -> Result<(), IndexError> {
        let pkg = pkg_file_stem(pkg);
        self.update(|u| u.delete_package(&pkg))
    }

    fn release_memory(&self) {
        let conn = self.lock_writer();
        if let Err(err) = conn.execute_batch("PRAGMA shrink_memory") {
            debug!(error = %err, "shrink_memory failed");
        }
    }

    fn symbol_by_id(&self, id: SymbolId) -> Result<Option<Symbol>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_SYMBOL_BY_ID)?;
            Ok(stmt
                .query_row(params![id_to_bytes(id).to_vec()], symbol_from_row)
                .optional()?)
        })
    }

    fn symbols_by_name(&self, name: &str) -> Result<Vec<Symbol>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_SYMBOLS_BY_NAME)?;
            let rows = stmt.query_map(params![name], symbol_from_row)?;
            collect_rows(rows)
        })
    }

    fn symbols(&self, filter: &SymbolFilter) -> Result<Vec<Symbol>, IndexError> {
        let pkg = filter.pkg.as_deref().map(pkg_file_stem);
        let mut out = self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_SYMBOLS)?;
            let rows = stmt.query_map(
                params![pkg, filter.scope_prefix.as_deref()],
                symbol_from_row,
            )?;
            collect_rows(rows)
        })?;
        if let Some(kinds) = &filter.kinds {
            out.retain(|sym| kinds.contains(&sym.kind));
        }
        Ok(out)
    }

    fn matching_symbols(&self, query: &MatchQuery) -> Result<Vec<Symbol>, IndexError> {
        let tokens = fuzzy::tokenize_identifier(&query.query);
        let mut out = self.with_reader(|conn| {
            let mut stmt_sql = String::from(sql::SELECT_MATCHING_BASE);
            let mut bound: Vec<Value> = Vec::new();
            for token in &tokens {
                stmt_sql.push_str(" AND (' ' || tokens) LIKE '% ' || ? || '%'");
                bound.push(Value::Text(token.clone()));
            }
            if let Some(scope) = &query.scope {
                stmt_sql.push_str(" AND scope LIKE ? || '%'");
                bound.push(Value::Text(scope.clone()));
            }
            if let Some(mask) = query.flags_mask {
                stmt_sql.push_str(" AND (flags & ?) = ?");
                bound.push(Value::Integer(i64::from(mask)));
                bound.push(Value::Integer(i64::from(mask)));
            }

            let mut stmt = conn.prepare_cached(&stmt_sql)?;
            let rows = stmt.query_map(params_from_iter(bound), symbol_from_row)?;
            let mut symbols = collect_rows(rows)?;

            let mut count_stmt = conn.prepare_cached(sql::SELECT_REFERENCE_COUNT)?;
            symbols.retain_mut(|sym| {
                let Some(rank) = fuzzy::match_score(&tokens, &sym.name) else {
                    return false;
                };
                sym.rank = rank;
                sym.references = count_stmt
                    .query_row(
                        params![id_to_bytes(sym.id).to_vec(), RefKind::Reference.as_str()],
                        |row| row.get::<_, i64>(0),
                    )
                    .unwrap_or(0) as u32;
                true
            });
            Ok(symbols)
        })?;
        fuzzy::sort_by_rank(&mut out);
        Ok(out)
    }

    fn references_to(&self, id: SymbolId, kind: Option<RefKind>) -> Result<Vec<Ref>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_REFERENCES)?;
            let rows = stmt.query_map(
                params![id_to_bytes(id).to_vec(), kind.map(|k| k.as_str())],
                ref_from_row,
            )?;
            let pairs = collect_rows(rows)?;
            Ok(pairs.into_iter().map(|(_, item)| item).collect())
        })
    }

    fn file_references(
        &self,
        uri: &str,
        kind: Option<RefKind>,
    ) -> Result<Vec<(SymbolId, Ref)>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_FILE_REFERENCES)?;
            let rows = stmt.query_map(params![uri, kind.map(|k| k.as_str())], ref_from_row)?;
            collect_rows(rows)
        })
    }

    fn referred(&self, id: SymbolId) -> Result<Vec<(SymbolId, Ref)>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_REFERRED)?;
            let rows = stmt.query_map(params![id_to_bytes(id).to_vec()], ref_from_row)?;
            collect_rows(rows)
        })
    }

    fn relations(&self, id: SymbolId, predicate: RelationKind) -> Result<Vec<Relation>, IndexError> {
        self.with_reader(|conn| {
            let blob = id_to_bytes(id).to_vec();
            if predicate == RelationKind::Overrides {
                // Stored edges carry OverriddenBy; synthesize the
                // tuple the caller asked for.
                let mut stmt = conn.prepare_cached(sql::SELECT_RELATIONS)?;
                let rows = stmt.query_map(
                    params![blob, RelationKind::OverriddenBy.as_str()],
                    relation_from_row,
                )?;
                let rewritten = collect_rows(rows)?
                    .into_iter()
                    .map(|rel| Relation {
                        subject: id,
                        predicate: RelationKind::Overrides,
                        object: rel.object,
                    })
                    .collect();
                return Ok(rewritten);
            }

            let mut out = Vec::new();
            let mut forward = conn.prepare_cached(sql::SELECT_RELATIONS)?;
            let rows = forward.query_map(params![blob, predicate.as_str()], relation_from_row)?;
            out.extend(collect_rows(rows)?);
            let mut reverse = conn.prepare_cached(sql::SELECT_REVERSE_RELATIONS)?;
            let rows = reverse.query_map(params![blob, predicate.as_str()], relation_from_row)?;
            out.extend(collect_rows(rows)?);
            Ok(out)
        })
    }

    fn relations_down(
        &self,
        id: SymbolId,
        predicate: RelationKind,
    ) -> Result<Vec<Relation>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_RELATIONS)?;
            let rows = stmt.query_map(
                params![id_to_bytes(id).to_vec(), predicate.as_str()],
                relation_from_row,
            )?;
            collect_rows(rows)
        })
    }

    fn relations_up(
        &self,
        id: SymbolId,
        predicate: RelationKind,
    ) -> Result<Vec<Relation>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_REVERSE_RELATIONS)?;
            let rows = stmt.query_map(
                params![id_to_bytes(id).to_vec(), predicate.as_str()],
                relation_from_row,
            )?;
            collect_rows(rows)
        })
    }

    fn extend_items(&self, id: SymbolId) -> Result<Vec<(String, ExtendItem)>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_EXTENDS)?;
            let rows = stmt.query_map(params![id_to_bytes(id).to_vec()], |row| {
                let pkg: String = row.get(0)?;
                let decl: Vec<u8> = row.get(1)?;
                Ok((
                    pkg,
                    ExtendItem {
                        id: id_from_blob(&decl),
                        modifier: row.get(2)?,
                        interface_name: row.get(3)?,
                    },
                ))
            })?;
            collect_rows(rows)
        })
    }

    fn cross_symbols(&self, pkg: &str, name: &str) -> Result<Vec<CrossSymbol>, IndexError> {
        let pkg = pkg_file_stem(pkg);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_CROSS_SYMBOLS)?;
            let rows = stmt.query_map(params![pkg, name], cross_from_row)?;
            collect_rows(rows)
        })
    }

    fn completions(&self, prefix: &str) -> Result<Vec<(Symbol, CompletionItem)>, IndexError> {
        let pattern = fuzzy::fuzzy_like_pattern(prefix);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_COMPLETIONS)?;
            let rows = stmt.query_map(params![pattern], |row| {
                let sym = symbol_from_row(row)?;
                let item = CompletionItem {
                    label: row.get(33)?,
                    insert_text: row.get(34)?,
                };
                Ok((sym, item))
            })?;
            collect_rows(rows)
        })
    }

    fn comments(&self, id: SymbolId) -> Result<Vec<Comment>, IndexError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_COMMENTS)?;
            let rows = stmt.query_map(params![id_to_bytes(id).to_vec()], |row| {
                let style: String = row.get(0)?;
                let kind: String = row.get(1)?;
                Ok(Comment {
                    style: CommentStyle::from_str(&style)
                        .ok_or_else(|| bad_enum(0, &style))?,
                    kind: CommentKind::from_str(&kind).ok_or_else(|| bad_enum(1, &kind))?,
                    text: row.get(2)?,
                })
            })?;
            collect_rows(rows)
        })
    }
}

fn open_connection(
    path: &std::path::Path,
    read_only: bool,
    in_memory: bool,
    cancel: &CancelToken,
) -> Result<Connection, IndexError> {
    let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if read_only {
        flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
    } else {
        flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    }
    if in_memory {
        flags |= OpenFlags::SQLITE_OPEN_MEMORY;
    }
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|err| IndexError::BackendUnavailable(err.to_string()))?;

    conn.set_prepared_statement_cache_capacity(64);
    conn.pragma_update(None, "foreign_keys", "ON")?;
    if !read_only && !in_memory {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.busy_handler(Some(busy_wait))?;

    let token = cancel.clone();
    conn.progress_handler(PROGRESS_POLL_OPS, Some(move || token.is_cancelled()));

    Ok(conn)
}

fn multi_insert(
    conn: &Connection,
    head: &str,
    row_sql: &str,
    rows: &[Vec<Value>],
) -> Result<(), IndexError> {
    for chunk in rows.chunks(sql::MULTI_INSERT_MAX_ROWS) {
        let mut stmt_sql = String::with_capacity(head.len() + chunk.len() * (row_sql.len() + 1));
        stmt_sql.push_str(head);
        for i in 0..chunk.len() {
            if i > 0 {
                stmt_sql.push(',');
            }
            stmt_sql.push_str(row_sql);
        }
        let mut stmt = conn.prepare_cached(&stmt_sql)?;
        let bound: Vec<Value> = chunk.iter().flat_map(|row| row.iter().cloned()).collect();
        stmt.execute(params_from_iter(bound))?;
    }
    Ok(())
}

fn id_value(id: SymbolId) -> Value {
    Value::Blob(id_to_bytes(id).to_vec())
}

fn id_from_blob(bytes: &[u8]) -> SymbolId {
    let mut arr = [0u8; 8];
    for (i, b) in bytes.iter().take(8).enumerate() {
        arr[i] = *b;
    }
    id_from_bytes(arr)
}

fn bad_enum(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown enum token `{value}`").into(),
    )
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, IndexError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn symbol_values(pkg: &str, sym: &Symbol) -> Vec<Value> {
    vec![
        id_value(sym.id),
        Value::Text(pkg.to_string()),
        Value::Text(fuzzy::token_text(&sym.name)),
        Value::Text(sym.kind.as_str().to_string()),
        Value::Integer(i64::from(sym.sub_kind)),
        Value::Integer(i64::from(sym.language)),
        Value::Integer(i64::from(sym.properties)),
        Value::Text(sym.name.clone()),
        Value::Text(sym.scope.clone()),
        Value::Text(sym.location.file_uri.clone()),
        Value::Integer(i64::from(sym.location.begin.line)),
        Value::Integer(i64::from(sym.location.begin.column)),
        Value::Integer(i64::from(sym.location.end.line)),
        Value::Integer(i64::from(sym.location.end.column)),
        Value::Text(sym.declaration.file_uri.clone()),
        Value::Integer(i64::from(sym.declaration.begin.line)),
        Value::Integer(i64::from(sym.declaration.begin.column)),
        Value::Integer(i64::from(sym.declaration.end.line)),
        Value::Integer(i64::from(sym.declaration.end.column)),
        Value::Text(sym.signature.clone()),
        Value::Text(sym.template_args.clone()),
        Value::Text(sym.completion_snippet_suffix.clone()),
        Value::Text(sym.documentation.clone()),
        Value::Text(sym.return_type.clone()),
        Value::Text(sym.ty.clone()),
        Value::Integer(i64::from(sym.flags)),
        Value::Text(sym.modifier.clone()),
        Value::Text(sym.syscap.clone()),
        Value::Text(sym.pkg_modifier.clone()),
        Value::Text(sym.cur_module.clone()),
        Value::Text(sym.cur_macro_call.file_uri.clone()),
        Value::Integer(i64::from(sym.cur_macro_call.begin.line)),
        Value::Integer(i64::from(sym.cur_macro_call.begin.column)),
        Value::Integer(i64::from(sym.cur_macro_call.end.line)),
        Value::Integer(i64::from(sym.cur_macro_call.end.column)),
    ]
}

fn range_from_parts(uri: String, bl: i64, bc: i64, el: i64, ec: i64) -> Range {
    Range {
        begin: Position {
            file_id: 0,
            line: bl as u32,
            column: bc as u32,
        },
        end: Position {
            file_id: 0,
            line: el as u32,
            column: ec as u32,
        },
        file_uri: uri,
    }
}

fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
    let id: Vec<u8> = row.get(0)?;
    let kind: String = row.get(1)?;
    let loc_uri: String = row.get(7)?;
    let decl_uri: String = row.get(12)?;
    let macro_uri: String = row.get(28)?;

    Ok(Symbol {
        id: id_from_blob(&id),
        kind: SymbolKind::from_str(&kind).ok_or_else(|| bad_enum(1, &kind))?,
        sub_kind: row.get::<_, i64>(2)? as u8,
        language: row.get::<_, i64>(3)? as u8,
        properties: row.get::<_, i64>(4)? as u8,
        name: row.get(5)?,
        scope: row.get(6)?,
        location: range_from_parts(
            loc_uri,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
            row.get(11)?,
        ),
        declaration: range_from_parts(
            decl_uri,
            row.get(13)?,
            row.get(14)?,
            row.get(15)?,
            row.get(16)?,
        ),
        signature: row.get(17)?,
        template_args: row.get(18)?,
        completion_snippet_suffix: row.get(19)?,
        documentation: row.get(20)?,
        return_type: row.get(21)?,
        ty: row.get(22)?,
        flags: row.get::<_, i64>(23)? as u32,
        modifier: row.get(24)?,
        syscap: row.get(25)?,
        pkg_modifier: row.get(26)?,
        cur_module: row.get(27)?,
        cur_macro_call: range_from_parts(
            macro_uri,
            row.get(29)?,
            row.get(30)?,
            row.get(31)?,
            row.get(32)?,
        ),
        ..Symbol::default()
    })
}

fn ref_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SymbolId, Ref)> {
    let id: Vec<u8> = row.get(0)?;
    let uri: String = row.get(1)?;
    let kind: String = row.get(6)?;
    let container: Vec<u8> = row.get(7)?;
    Ok((
        id_from_blob(&id),
        Ref {
            location: range_from_parts(uri, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
            kind: RefKind::from_str(&kind).ok_or_else(|| bad_enum(6, &kind))?,
            container: id_from_blob(&container),
            is_cjo_ref: row.get(8)?,
            is_super: row.get(9)?,
        },
    ))
}

fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    let subject: Vec<u8> = row.get(0)?;
    let predicate: String = row.get(1)?;
    let object: Vec<u8> = row.get(2)?;
    Ok(Relation {
        subject: id_from_blob(&subject),
        predicate: RelationKind::from_str(&predicate).ok_or_else(|| bad_enum(1, &predicate))?,
        object: id_from_blob(&object),
    })
}

fn cross_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CrossSymbol> {
    let id: Vec<u8> = row.get(0)?;
    let container: Vec<u8> = row.get(3)?;
    let uri: String = row.get(5)?;
    Ok(CrossSymbol {
        id: id_from_blob(&id),
        name: row.get(1)?,
        cross_type: row.get::<_, i64>(2)? as u8,
        container: id_from_blob(&container),
        container_name: row.get(4)?,
        location: range_from_parts(uri, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?),
        declaration: range_from_parts(
            String::new(),
            row.get(10)?,
            row.get(11)?,
            row.get(12)?,
            row.get(13)?,
        ),
    })
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get::<_, i64>(0)? as u32,
        uri: row.get(1)?,
        package: row.get(2)?,
        module: row.get(3)?,
        digest: row.get(4)?,
    })
}
