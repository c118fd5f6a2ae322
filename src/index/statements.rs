//! SQL text for the SQLite backend.
//!
//! Schema scripts are compiled in from resource files; the DML/DQL
//! statements below form a static named table so every query the
//! backend can run is visible in one place. Multi-row insert
//! statements are assembled at run time from the `MULTI_*` fragments,
//! chunked so the largest prepared statement stays under SQLite's
//! default parameter limit.

/// Schema creation script (tables, indexes, version pragmas).
pub const CREATE_DB: &str = include_str!("sql/create_db.sql");

/// Drop script used before a rebuild.
pub const DELETE_DB: &str = include_str!("sql/delete_db.sql");

/// Upgrade scripts as `(from_version, script)` pairs, applied in
/// order starting at the recorded `user_version`. Empty while the
/// schema is at its first version; the drop-and-recreate fallback
/// covers anything unreachable from here.
pub static UPGRADES: &[(i32, &str)] = &[];

/// Pragma `application_id` value marking a database as ours
/// (`"SDX1"`).
pub const APPLICATION_ID: i32 = 0x5344_5831;

/// Current schema version, mirrored by `create_db.sql`.
pub const SCHEMA_VERSION: i32 = 1;

/// Rows per chunk in multi-row inserts. Symbols carry the widest rows
/// (35 columns), so this keeps every statement under SQLite's default
/// 999-parameter cap.
pub const MULTI_INSERT_MAX_ROWS: usize = 25;

macro_rules! symbol_select {
    ($tail:expr) => {
        concat!(
            "SELECT id, kind, sub_kind, language, properties, name, scope, \
             loc_uri, loc_begin_line, loc_begin_col, loc_end_line, loc_end_col, \
             decl_uri, decl_begin_line, decl_begin_col, decl_end_line, decl_end_col, \
             signature, template_args, completion_snippet, documentation, \
             return_type, type, flags, modifier, syscap, pkg_modifier, cur_module, \
             macro_uri, macro_begin_line, macro_begin_col, macro_end_line, macro_end_col \
             FROM symbols ",
            $tail
        )
    };
}

pub const SELECT_SYMBOL_BY_ID: &str = symbol_select!("WHERE id = ?1");

pub const SELECT_SYMBOLS_BY_NAME: &str = symbol_select!("WHERE name = ?1 ORDER BY rowid");

pub const SELECT_SYMBOLS: &str = symbol_select!(
    "WHERE (?1 IS NULL OR pkg = ?1) AND (?2 IS NULL OR scope LIKE ?2 || '%') ORDER BY rowid"
);

/// Base of the fuzzy identifier search; per-token conditions are
/// appended at run time.
pub const SELECT_MATCHING_BASE: &str = symbol_select!("WHERE 1 = 1");

pub const SELECT_REFERENCES: &str = "SELECT symbol_id, uri, begin_line, begin_col, end_line, \
     end_col, kind, container, is_cjo, is_super FROM refs WHERE symbol_id = ?1 \
     AND (?2 IS NULL OR kind = ?2) ORDER BY rowid";

pub const SELECT_FILE_REFERENCES: &str = "SELECT symbol_id, uri, begin_line, begin_col, end_line, \
     end_col, kind, container, is_cjo, is_super FROM refs WHERE uri = ?1 \
     AND (?2 IS NULL OR kind = ?2) ORDER BY rowid";

pub const SELECT_REFERRED: &str = "SELECT symbol_id, uri, begin_line, begin_col, end_line, \
     end_col, kind, container, is_cjo, is_super FROM refs WHERE container = ?1 ORDER BY rowid";

pub const SELECT_REFERENCE_COUNT: &str =
    "SELECT COUNT(*) FROM refs WHERE symbol_id = ?1 AND kind = ?2";

pub const SELECT_RELATIONS: &str =
    "SELECT subject, predicate, object FROM relations WHERE subject = ?1 AND predicate = ?2 \
     ORDER BY rowid";

pub const SELECT_REVERSE_RELATIONS: &str =
    "SELECT subject, predicate, object FROM relations WHERE object = ?1 AND predicate = ?2 \
     ORDER BY rowid";

pub const SELECT_EXTENDS: &str =
    "SELECT pkg, decl_id, modifier, interface_name FROM extends WHERE extended_id = ?1 \
     ORDER BY rowid";

pub const SELECT_CROSS_SYMBOLS: &str =
    "SELECT id, name, cross_type, container, container_name, uri, begin_line, begin_col, \
     end_line, end_col, decl_begin_line, decl_begin_col, decl_end_line, decl_end_col \
     FROM cross_symbols WHERE pkg = ?1 AND name = ?2 ORDER BY rowid";

pub const SELECT_COMPLETIONS: &str = concat!(
    "SELECT s.id, s.kind, s.sub_kind, s.language, s.properties, s.name, s.scope, ",
    "s.loc_uri, s.loc_begin_line, s.loc_begin_col, s.loc_end_line, s.loc_end_col, ",
    "s.decl_uri, s.decl_begin_line, s.decl_begin_col, s.decl_end_line, s.decl_end_col, ",
    "s.signature, s.template_args, s.completion_snippet, s.documentation, ",
    "s.return_type, s.type, s.flags, s.modifier, s.syscap, s.pkg_modifier, s.cur_module, ",
    "s.macro_uri, s.macro_begin_line, s.macro_begin_col, s.macro_end_line, s.macro_end_col, ",
    "c.label, c.insert_text FROM completions c JOIN symbols s ON s.id = c.symbol_id ",
    "WHERE c.label LIKE ?1 ORDER BY c.rowid"
);

pub const SELECT_COMMENTS: &str = "SELECT style, kind, body FROM comments WHERE symbol_id = ?1 \
     ORDER BY CASE grp WHEN 'leading' THEN 0 WHEN 'inner' THEN 1 ELSE 2 END, grp_index, ordinal";

pub const SELECT_PACKAGE_DIGEST: &str = "SELECT digest FROM packages WHERE pkg = ?1";

pub const UPSERT_PACKAGE: &str = "INSERT INTO packages (pkg, digest) VALUES (?1, ?2) \
     ON CONFLICT(pkg) DO UPDATE SET digest = excluded.digest";

pub const DELETE_PACKAGE: &str = "DELETE FROM packages WHERE pkg = ?1";
pub const DELETE_PACKAGE_SYMBOLS: &str = "DELETE FROM symbols WHERE pkg = ?1";
pub const DELETE_PACKAGE_REFS: &str = "DELETE FROM refs WHERE pkg = ?1";
pub const DELETE_PACKAGE_RELATIONS: &str = "DELETE FROM relations WHERE pkg = ?1";
pub const DELETE_PACKAGE_EXTENDS: &str = "DELETE FROM extends WHERE pkg = ?1";
pub const DELETE_PACKAGE_CROSS: &str = "DELETE FROM cross_symbols WHERE pkg = ?1";
pub const DELETE_PACKAGE_COMPLETIONS: &str = "DELETE FROM completions WHERE pkg = ?1";
pub const DELETE_PACKAGE_COMMENTS: &str = "DELETE FROM comments WHERE pkg = ?1";

pub const INSERT_FILE: &str = "INSERT OR REPLACE INTO files (id, uri, pkg, module, digest) \
     VALUES (?1, ?2, ?3, ?4, ?5)";

pub const DELETE_FILE: &str = "DELETE FROM files WHERE uri = ?1";

pub const SELECT_FILE_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM files WHERE uri = ?1)";

pub const SELECT_FILE_DIGEST: &str = "SELECT digest FROM files WHERE id = ?1";

pub const SELECT_FILE_BY_URI: &str =
    "SELECT id, uri, pkg, module, digest FROM files WHERE uri = ?1";

pub const SELECT_FILE_BY_ID: &str = "SELECT id, uri, pkg, module, digest FROM files WHERE id = ?1";

pub const SELECT_META: &str = "SELECT value FROM meta WHERE key = ?1";

pub const UPSERT_META: &str = "INSERT INTO meta (key, value) VALUES (?1, ?2) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";

// Multi-row insert fragments: HEAD + N ROW groups joined by commas.

pub const MULTI_INSERT_SYMBOLS_HEAD: &str = "INSERT OR REPLACE INTO symbols (id, pkg, tokens, \
     kind, sub_kind, language, properties, name, scope, \
     loc_uri, loc_begin_line, loc_begin_col, loc_end_line, loc_end_col, \
     decl_uri, decl_begin_line, decl_begin_col, decl_end_line, decl_end_col, \
     signature, template_args, completion_snippet, documentation, return_type, type, flags, \
     modifier, syscap, pkg_modifier, cur_module, \
     macro_uri, macro_begin_line, macro_begin_col, macro_end_line, macro_end_col) VALUES ";
pub const MULTI_INSERT_SYMBOLS_ROW: &str =
    "(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
     ?, ?, ?, ?, ?)";

pub const MULTI_INSERT_REFS_HEAD: &str = "INSERT INTO refs (symbol_id, pkg, uri, begin_line, \
     begin_col, end_line, end_col, kind, container, is_cjo, is_super) VALUES ";
pub const MULTI_INSERT_REFS_ROW: &str = "(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub const MULTI_INSERT_RELATIONS_HEAD: &str =
    "INSERT INTO relations (subject, predicate, object, pkg) VALUES ";
pub const MULTI_INSERT_RELATIONS_ROW: &str = "(?, ?, ?, ?)";

pub const MULTI_INSERT_EXTENDS_HEAD: &str =
    "INSERT INTO extends (extended_id, decl_id, modifier, interface_name, pkg) VALUES ";
pub const MULTI_INSERT_EXTENDS_ROW: &str = "(?, ?, ?, ?, ?)";

pub const MULTI_INSERT_CROSS_HEAD: &str = "INSERT INTO cross_symbols (pkg, id, name, cross_type, \
     container, container_name, uri, begin_line, begin_col, end_line, end_col, \
     decl_begin_line, decl_begin_col, decl_end_line, decl_end_col) VALUES ";
pub const MULTI_INSERT_CROSS_ROW: &str = "(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub const MULTI_INSERT_COMPLETIONS_HEAD: &str =
    "INSERT INTO completions (symbol_id, label, insert_text, pkg) VALUES ";
pub const MULTI_INSERT_COMPLETIONS_ROW: &str = "(?, ?, ?, ?)";

pub const MULTI_INSERT_COMMENTS_HEAD: &str = "INSERT INTO comments (symbol_id, grp, grp_index, \
     ordinal, style, kind, body, pkg) VALUES ";
pub const MULTI_INSERT_COMMENTS_ROW: &str = "(?, ?, ?, ?, ?, ?, ?, ?)";

/// Named statement table; every fixed statement the backend prepares.
pub static STATEMENTS: &[(&str, &str)] = &[
    ("select_symbol_by_id", SELECT_SYMBOL_BY_ID),
    ("select_symbols_by_name", SELECT_SYMBOLS_BY_NAME),
    ("select_symbols", SELECT_SYMBOLS),
    ("select_matching_base", SELECT_MATCHING_BASE),
    ("select_references", SELECT_REFERENCES),
    ("select_file_references", SELECT_FILE_REFERENCES),
    ("select_referred", SELECT_REFERRED),
    ("select_reference_count", SELECT_REFERENCE_COUNT),
    ("select_relations", SELECT_RELATIONS),
    ("select_reverse_relations", SELECT_REVERSE_RELATIONS),
    ("select_extends", SELECT_EXTENDS),
    ("select_cross_symbols", SELECT_CROSS_SYMBOLS),
    ("select_completions", SELECT_COMPLETIONS),
    ("select_comments", SELECT_COMMENTS),
    ("select_package_digest", SELECT_PACKAGE_DIGEST),
    ("upsert_package", UPSERT_PACKAGE),
    ("delete_package", DELETE_PACKAGE),
    ("delete_package_symbols", DELETE_PACKAGE_SYMBOLS),
    ("delete_package_refs", DELETE_PACKAGE_REFS),
    ("delete_package_relations", DELETE_PACKAGE_RELATIONS),
    ("delete_package_extends", DELETE_PACKAGE_EXTENDS),
    ("delete_package_cross", DELETE_PACKAGE_CROSS),
    ("delete_package_completions", DELETE_PACKAGE_COMPLETIONS),
    ("delete_package_comments", DELETE_PACKAGE_COMMENTS),
    ("insert_file", INSERT_FILE),
    ("delete_file", DELETE_FILE),
    ("select_file_exists", SELECT_FILE_EXISTS),
    ("select_file_digest", SELECT_FILE_DIGEST),
    ("select_file_by_uri", SELECT_FILE_BY_URI),
    ("select_file_by_id", SELECT_FILE_BY_ID),
    ("select_meta", SELECT_META),
    ("upsert_meta", UPSERT_META),
];
