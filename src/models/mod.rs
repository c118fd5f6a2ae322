//! Shared logical index model.
//!
//! These types describe everything the index persists: symbols,
//! references, relations, extend records, and cross-language bridge
//! symbols, grouped per package into a [`Shard`]. The same shapes are
//! used by the binary shard codec, the in-memory slabs, and the SQLite
//! backend, so a query sees identical data regardless of where it was
//! answered from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque 64-bit identifier for a declaration.
///
/// Stable across parses of the same declaration; derived by the AST
/// producer. Zero is reserved and means "none".
pub type SymbolId = u64;

/// Reserved id meaning "no symbol".
pub const NO_SYMBOL: SymbolId = 0;

/// Wire representation of a [`SymbolId`]: a fixed 8-byte array in
/// little-endian byte order. Used verbatim as the SQLite primary key
/// blob.
pub type IdArray = [u8; 8];

/// Serialize an id into its 8-byte little-endian array.
pub fn id_to_bytes(id: SymbolId) -> IdArray {
    id.to_le_bytes()
}

/// Rebuild an id from its 8-byte array, walking bytes from the most
/// significant end and shifting each into place.
pub fn id_from_bytes(bytes: IdArray) -> SymbolId {
    let mut id: u64 = 0;
    for byte in bytes.iter().rev() {
        id = (id << 8) | u64::from(*byte);
    }
    id
}

/// A point in a source file. The zero triple means "unknown".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct Position {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn is_unknown(&self) -> bool {
        self.file_id == 0 && self.line == 0 && self.column == 0
    }
}

/// A span in a source file. `begin <= end` in (line, column) order.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct Range {
    pub begin: Position,
    pub end: Position,
    pub file_uri: String,
}

impl Range {
    pub fn is_unknown(&self) -> bool {
        self.begin.is_unknown() && self.end.is_unknown() && self.file_uri.is_empty()
    }
}

/// High-level kind of an indexed declaration.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug, PartialEq, Eq))]
pub enum SymbolKind {
    Module,
    Class,
    Interface,
    Struct,
    Enum,
    Function,
    Method,
    Property,
    #[default]
    Variable,
    TypeAlias,
    Macro,
    GenericParam,
    Constructor,
    Field,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Module => "module",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Property => "property",
            SymbolKind::Variable => "variable",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Macro => "macro",
            SymbolKind::GenericParam => "generic_param",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Field => "field",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "module" => SymbolKind::Module,
            "class" => SymbolKind::Class,
            "interface" => SymbolKind::Interface,
            "struct" => SymbolKind::Struct,
            "enum" => SymbolKind::Enum,
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            "property" => SymbolKind::Property,
            "variable" => SymbolKind::Variable,
            "type_alias" => SymbolKind::TypeAlias,
            "macro" => SymbolKind::Macro,
            "generic_param" => SymbolKind::GenericParam,
            "constructor" => SymbolKind::Constructor,
            "field" => SymbolKind::Field,
            _ => return None,
        })
    }
}

/// Kind of a recorded use site.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug, PartialEq, Eq))]
pub enum RefKind {
    #[default]
    Reference,
    Declaration,
    Definition,
    Call,
    SuperCall,
    Override,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Reference => "reference",
            RefKind::Declaration => "declaration",
            RefKind::Definition => "definition",
            RefKind::Call => "call",
            RefKind::SuperCall => "super_call",
            RefKind::Override => "override",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "reference" => RefKind::Reference,
            "declaration" => RefKind::Declaration,
            "definition" => RefKind::Definition,
            "call" => RefKind::Call,
            "super_call" => RefKind::SuperCall,
            "override" => RefKind::Override,
            _ => return None,
        })
    }
}

/// Predicate of a relation edge between two symbols.
///
/// `Overrides` is a query-side alias: stored edges use `OverriddenBy`
/// and the query layer rewrites the predicate on the way out.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug, PartialEq, Eq))]
pub enum RelationKind {
    #[default]
    BaseOf,
    Extend,
    Overrides,
    OverriddenBy,
    InheritedBy,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::BaseOf => "base_of",
            RelationKind::Extend => "extend",
            RelationKind::Overrides => "overrides",
            RelationKind::OverriddenBy => "overridden_by",
            RelationKind::InheritedBy => "inherited_by",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "base_of" => RelationKind::BaseOf,
            "extend" => RelationKind::Extend,
            "overrides" => RelationKind::Overrides,
            "overridden_by" => RelationKind::OverriddenBy,
            "inherited_by" => RelationKind::InheritedBy,
            _ => return None,
        })
    }
}

/// Symbol flag bits. Carried as a plain bitset so the AST producer can
/// extend it without a schema change.
pub mod sym_flags {
    pub const DEPRECATED: u32 = 1 << 0;
    pub const MEMBER_PARAM: u32 = 1 << 1;
    pub const CJO_SYM: u32 = 1 << 2;
}

/// Comment style as recorded by the parser.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug, PartialEq, Eq))]
pub enum CommentStyle {
    #[default]
    Line,
    Block,
    Doc,
}

impl CommentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentStyle::Line => "line",
            CommentStyle::Block => "block",
            CommentStyle::Doc => "doc",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "line" => CommentStyle::Line,
            "block" => CommentStyle::Block,
            "doc" => CommentStyle::Doc,
            _ => return None,
        })
    }
}

/// Comment classification.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug, PartialEq, Eq))]
pub enum CommentKind {
    #[default]
    Ordinary,
    Directive,
}

impl CommentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::Ordinary => "ordinary",
            CommentKind::Directive => "directive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "ordinary" => CommentKind::Ordinary,
            "directive" => CommentKind::Directive,
            _ => return None,
        })
    }
}

/// A single source comment attached to a symbol.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct Comment {
    pub style: CommentStyle,
    pub kind: CommentKind,
    pub text: String,
}

/// A run of adjacent comments.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct CommentGroup {
    pub comments: Vec<Comment>,
}

/// The three ordered comment positions around a declaration.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct CommentGroups {
    pub leading: Vec<CommentGroup>,
    pub inner: Vec<CommentGroup>,
    pub trailing: Vec<CommentGroup>,
}

impl CommentGroups {
    pub fn is_empty(&self) -> bool {
        self.leading.is_empty() && self.inner.is_empty() && self.trailing.is_empty()
    }
}

/// A completion entry precomputed by the indexer for a symbol.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct CompletionItem {
    pub label: String,
    pub insert_text: String,
}

/// A declaration indexed at a point in a source file.
///
/// `rank` and `references` are query-time counters: every query that
/// reports them recomputes them, and the update path always writes
/// them as zero.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    /// Fully-qualified enclosing path, e.g. `demo.pkg:Outer.Inner`.
    pub scope: String,
    pub kind: SymbolKind,
    /// Language-specific refinement of `kind`, carried opaque.
    pub sub_kind: u8,
    /// Source language tag, carried opaque.
    pub language: u8,
    /// Extra property bits, carried opaque.
    pub properties: u8,
    /// Identifier occurrence.
    pub location: Range,
    /// Full declaration span.
    pub declaration: Range,
    pub signature: String,
    pub return_type: String,
    pub ty: String,
    pub documentation: String,
    pub template_args: String,
    pub completion_snippet_suffix: String,
    pub modifier: String,
    pub syscap: String,
    /// Bitset, see [`sym_flags`].
    pub flags: u32,
    pub cur_module: String,
    pub pkg_modifier: String,
    /// Enclosing macro expansion, zero range if none.
    pub cur_macro_call: Range,
    pub comments: CommentGroups,
    pub completion_items: Vec<CompletionItem>,
    pub rank: f32,
    pub references: u32,
}

/// A use site of a symbol. The referenced id is the slab key, see
/// [`RefEntry`].
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct Ref {
    pub location: Range,
    pub kind: RefKind,
    /// Enclosing declaration, `NO_SYMBOL` if top-level.
    pub container: SymbolId,
    pub is_cjo_ref: bool,
    pub is_super: bool,
}

/// A directed edge `(subject, predicate, object)` between two symbols.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct Relation {
    pub subject: SymbolId,
    pub predicate: RelationKind,
    pub object: SymbolId,
}

/// A type extension declaration attached to an extended symbol.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct ExtendItem {
    /// The extending declaration.
    pub id: SymbolId,
    pub modifier: String,
    pub interface_name: String,
}

/// A bridge record linking a declaration to its counterpart in another
/// language. `cross_type` is carried opaque.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct CrossSymbol {
    pub id: SymbolId,
    pub name: String,
    pub cross_type: u8,
    pub container: SymbolId,
    pub container_name: String,
    pub location: Range,
    pub declaration: Range,
}

/// Per-source-file record kept by the SQLite backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: u32,
    pub uri: String,
    pub package: String,
    pub module: String,
    pub digest: String,
}

/// A ref slab entry: the referenced symbol id plus the use site.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct RefEntry {
    pub id: SymbolId,
    pub item: Ref,
}

/// An extend slab entry: the extended symbol id plus the extend record.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct ExtendEntry {
    pub id: SymbolId,
    pub item: ExtendItem,
}

/// One package's index at one content version: the persistent unit.
#[derive(Debug, Clone, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct Shard {
    pub pkg_name: String,
    /// Content digest of the package's parsed AST.
    pub hash_code: String,
    pub symbols: Vec<Symbol>,
    pub refs: Vec<RefEntry>,
    pub relations: Vec<Relation>,
    pub extends: Vec<ExtendEntry>,
    pub cross_symbols: Vec<CrossSymbol>,
}

impl Shard {
    pub fn new(pkg_name: impl Into<String>, hash_code: impl Into<String>) -> Self {
        Self {
            pkg_name: pkg_name.into(),
            hash_code: hash_code.into(),
            ..Self::default()
        }
    }
}

/// Backend kind for the persistent index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackendKind {
    Shard,
    Sqlite,
}

/// Configuration for opening the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Workspace cache root; shard files live under
    /// `<cache_root>/.cache/index/`.
    pub cache_root: PathBuf,
    /// Selected backend implementation.
    pub backend: IndexBackendKind,
    /// Open the SQLite database read-only.
    #[serde(default)]
    pub open_read_only: bool,
    /// Keep the SQLite database in memory (tests, scratch sessions).
    #[serde(default)]
    pub open_in_memory: bool,
}

impl IndexConfig {
    pub fn new(cache_root: impl Into<PathBuf>, backend: IndexBackendKind) -> Self {
        Self {
            cache_root: cache_root.into(),
            backend,
            open_read_only: false,
            open_in_memory: false,
        }
    }

    /// Path of the SQLite database when the sqlite backend is selected.
    pub fn db_path(&self) -> PathBuf {
        self.cache_root.join(".cache").join("index.db")
    }
}

/// Optional filters for bulk symbol iteration.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    /// Restrict to one package.
    pub pkg: Option<String>,
    /// Restrict to symbols whose scope starts with this prefix.
    pub scope_prefix: Option<String>,
    /// Restrict to these kinds.
    pub kinds: Option<Vec<SymbolKind>>,
}

impl SymbolFilter {
    pub fn accepts(&self, pkg: &str, sym: &Symbol) -> bool {
        if let Some(want) = &self.pkg {
            if want != pkg {
                return false;
            }
        }
        if let Some(prefix) = &self.scope_prefix {
            if !sym.scope.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&sym.kind) {
                return false;
            }
        }
        true
    }
}

/// A fuzzy identifier query, see `QueryEngine::matching`.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub query: String,
    /// Restrict to symbols whose scope starts with this prefix.
    pub scope: Option<String>,
    /// Require all of these flag bits, see [`sym_flags`].
    pub flags_mask: Option<u32>,
}

impl MatchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope: None,
            flags_mask: None,
        }
    }
}
