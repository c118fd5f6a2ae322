//! File-per-shard persistent store.
//!
//! Shards live under `<cache_root>/.cache/index/` as
//! `<pkg>.<hash>.idx`, with path separators in the package name
//! converted to dots so the two staleness keys can be read back from
//! the filename without opening the file. Updates write a temp file
//! and rename it into place; superseded shards are deleted when a
//! newer digest is recorded. Filesystem failures are non-fatal here:
//! reads collapse to `None` and are logged for operators.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::codec;
use crate::error::IndexError;
use crate::models::Shard;

const INDEX_SUBDIR: &str = "index";
const AST_SUBDIR: &str = "astdata";
const SHARD_EXT: &str = "idx";

/// Join the two staleness keys into a shard filename.
pub(crate) fn merge_file_name(stem: &str, hash: &str, ext: &str) -> String {
    format!("{stem}.{hash}.{ext}")
}

/// Split a shard filename back into `(stem, hash)`.
///
/// Needs at least two dots; anything shorter yields empty parts.
pub(crate) fn split_file_name(name: &str) -> (String, String) {
    let Some(ext_dot) = name.rfind('.') else {
        return (String::new(), String::new());
    };
    let Some(hash_dot) = name[..ext_dot].rfind('.') else {
        return (String::new(), String::new());
    };
    let stem = &name[..hash_dot];
    let hash = &name[hash_dot + 1..ext_dot];
    if stem.is_empty() || hash.is_empty() {
        return (String::new(), String::new());
    }
    (stem.to_string(), hash.to_string())
}

/// Package name as it appears in shard filenames.
pub(crate) fn pkg_file_stem(pkg: &str) -> String {
    pkg.replace(['/', '\\'], ".")
}

/// Persistent shard store rooted at a workspace cache directory.
pub struct ShardStore {
    cache_root: PathBuf,
    /// Currently-recorded digest per package (keyed by file stem).
    versions: Mutex<HashMap<String, String>>,
}

impl ShardStore {
    /// Open the store, creating the cache directories and rebuilding
    /// the version map from the shard filenames already on disk.
    pub fn open(cache_root: &Path) -> Result<Self, IndexError> {
        let store = Self {
            cache_root: cache_root.to_path_buf(),
            versions: Mutex::new(HashMap::new()),
        };
        fs::create_dir_all(store.index_dir())?;
        fs::create_dir_all(store.ast_dir())?;
        store.scan_existing();
        Ok(store)
    }

    fn index_dir(&self) -> PathBuf {
        self.cache_root.join(".cache").join(INDEX_SUBDIR)
    }

    fn ast_dir(&self) -> PathBuf {
        self.cache_root.join(".cache").join(AST_SUBDIR)
    }

    /// On-disk path for one package version.
    pub fn shard_path(&self, pkg: &str, hash: &str) -> PathBuf {
        self.index_dir()
            .join(merge_file_name(&pkg_file_stem(pkg), hash, SHARD_EXT))
    }

    fn scan_existing(&self) {
        let entries = match fs::read_dir(self.index_dir()) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to scan shard directory");
                return;
            }
        };
        let mut versions = self.lock_versions();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(&format!(".{SHARD_EXT}")) {
                continue;
            }
            let (stem, hash) = split_file_name(name);
            if stem.is_empty() || hash.is_empty() {
                continue;
            }
            versions.insert(stem, hash);
        }
    }

    fn lock_versions(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.versions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Packages with a recorded version, as `(pkg, digest)` pairs.
    pub fn packages(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .lock_versions()
            .iter()
            .map(|(pkg, hash)| (pkg.clone(), hash.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Digest currently recorded for a package.
    pub fn recorded_digest(&self, pkg: &str) -> Option<String> {
        self.lock_versions().get(&pkg_file_stem(pkg)).cloned()
    }

    /// Whether the recorded shard for `pkg` no longer serves
    /// `current_hash`.
    ///
    /// True when nothing is recorded, when the recorded digest
    /// differs, or when the recorded digest's file has gone missing.
    /// A differing recorded file is deleted here, so the next store
    /// starts clean.
    pub fn is_stale(&self, pkg: &str, current_hash: &str) -> bool {
        let stem = pkg_file_stem(pkg);
        let recorded = { self.lock_versions().get(&stem).cloned() };
        match recorded {
            None => true,
            Some(recorded) if recorded == current_hash => {
                let path = self.shard_path(pkg, &recorded);
                if path.exists() {
                    false
                } else {
                    debug!(pkg, "recorded shard file missing, treating as stale");
                    true
                }
            }
            Some(recorded) => {
                let stale_path = self.shard_path(pkg, &recorded);
                if stale_path.exists() {
                    if let Err(err) = fs::remove_file(&stale_path) {
                        warn!(pkg, error = %err, "failed to delete superseded shard");
                    }
                }
                true
            }
        }
    }

    /// Persist a shard's bytes and record its digest, deleting the
    /// predecessor version if one exists. Re-storing the same
    /// (pkg, hash) overwrites in place.
    pub fn store(&self, pkg: &str, hash: &str, bytes: &[u8]) -> Result<(), IndexError> {
        let target = self.shard_path(pkg, hash);
        let tmp = target.with_extension("idx.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;

        let stem = pkg_file_stem(pkg);
        let prior = { self.lock_versions().insert(stem, hash.to_string()) };
        if let Some(prior) = prior {
            if prior != hash {
                let old_path = self.shard_path(pkg, &prior);
                if let Err(err) = fs::remove_file(&old_path) {
                    if old_path.exists() {
                        warn!(pkg, error = %err, "failed to delete superseded shard");
                    }
                }
            }
        }
        Ok(())
    }

    /// Load and decode one package version. Open failures return
    /// `None`; a shard that fails verification is deleted (it is
    /// unrecoverable) and its recorded digest cleared.
    pub fn load(&self, pkg: &str, hash: &str) -> Option<Shard> {
        let path = self.shard_path(pkg, hash);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(pkg, hash, error = %err, "shard not readable");
                return None;
            }
        };
        match codec::decode(&bytes) {
            Ok(shard) => Some(shard),
            Err(err) => {
                warn!(pkg, hash, error = %err, "corrupt shard purged");
                if let Err(err) = fs::remove_file(&path) {
                    warn!(pkg, error = %err, "failed to delete corrupt shard");
                }
                let stem = pkg_file_stem(pkg);
                let mut versions = self.lock_versions();
                if versions.get(&stem).map(String::as_str) == Some(hash) {
                    versions.remove(&stem);
                }
                None
            }
        }
    }

    /// Forget a package and delete its recorded shard file.
    pub fn remove(&self, pkg: &str) -> Result<(), IndexError> {
        let stem = pkg_file_stem(pkg);
        let recorded = { self.lock_versions().remove(&stem) };
        if let Some(hash) = recorded {
            let path = self.shard_path(pkg, &hash);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn record_version(&self, pkg: &str, hash: &str) {
        self.lock_versions()
            .insert(pkg_file_stem(pkg), hash.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Symbol, SymbolKind};
    use tempfile::tempdir;

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
    fn split_file_name_edge_cases() {
        assert_eq!(split_file_name("filename"), (String::new(), String::new()));
        assert_eq!(split_file_name("file.txt"), (String::new(), String::new()));
        assert_eq!(
            split_file_name("archive.tar.gz"),
            ("archive".to_string(), "tar".to_string())
        );
        assert_eq!(split_file_name(""), (String::new(), String::new()));
        assert_eq!(split_file_name("file."), (String::new(), String::new()));
        assert_eq!(
            split_file_name(".hidden.file.idx"),
            (".hidden".to_string(), "file".to_string())
        );
    }

    #[test]
    fn merge_file_name_joins_keys() {
        assert_eq!(merge_file_name("mypkg", "123abc", "bin"), "mypkg.123abc.bin");
    }

    #[test]
    fn shard_path_converts_separators_to_dots() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");
        let path = store.shard_path("ark/lsp/service", "hash123");
        assert!(path
            .to_string_lossy()
            .contains("ark.lsp.service.hash123.idx"));
    }

    #[test]
    fn open_creates_cache_directories() {
        let dir = tempdir().expect("tempdir");
        ShardStore::open(dir.path()).expect("open");
        assert!(dir.path().join(".cache/index").is_dir());
        assert!(dir.path().join(".cache/astdata").is_dir());
    }

    #[test]
    fn staleness_transitions() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");

        // No entry means stale.
        assert!(store.is_stale("demo.pkg", "aaaa"));

        let shard = shard_with_symbol("demo.pkg", "aaaa", 1, "foo");
        let bytes = codec::encode(&shard).expect("encode");
        store.store("demo.pkg", "aaaa", &bytes).expect("store");

        assert!(!store.is_stale("demo.pkg", "aaaa"));
        assert!(store.is_stale("demo.pkg", "bbbb"));
    }

    #[test]
    fn stale_check_deletes_superseded_file() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");

        let shard = shard_with_symbol("demo.pkg", "old", 1, "foo");
        let bytes = codec::encode(&shard).expect("encode");
        store.store("demo.pkg", "old", &bytes).expect("store");
        let old_path = store.shard_path("demo.pkg", "old");
        assert!(old_path.exists());

        assert!(store.is_stale("demo.pkg", "new"));
        assert!(!old_path.exists());
    }

    #[test]
    fn missing_recorded_file_is_stale() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");
        store.record_version("demo.pkg", "aaaa");
        assert!(store.is_stale("demo.pkg", "aaaa"));
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");

        let shard = shard_with_symbol("test.package", "v1", 77, "TestSym");
        let bytes = codec::encode(&shard).expect("encode");
        store.store("test.package", "v1", &bytes).expect("store");
        assert!(store.shard_path("test.package", "v1").exists());

        let loaded = store.load("test.package", "v1").expect("loaded");
        assert_eq!(loaded, shard);
    }

    #[test]
    fn store_replaces_predecessor_file() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");

        let v1 = shard_with_symbol("cleanup.pkg", "v1", 1, "foo");
        store
            .store("cleanup.pkg", "v1", &codec::encode(&v1).expect("encode"))
            .expect("store v1");
        let v1_path = store.shard_path("cleanup.pkg", "v1");
        assert!(v1_path.exists());

        let v2 = shard_with_symbol("cleanup.pkg", "v2", 2, "bar");
        store
            .store("cleanup.pkg", "v2", &codec::encode(&v2).expect("encode"))
            .expect("store v2");
        assert!(!v1_path.exists());
        assert!(store.shard_path("cleanup.pkg", "v2").exists());
    }

    #[test]
    fn corrupt_shard_is_purged_on_load() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");

        let path = store.shard_path("bad.file", "x");
        fs::write(&path, b"This is not a shard").expect("write garbage");
        store.record_version("bad.file", "x");

        assert!(store.load("bad.file", "x").is_none());
        assert!(!path.exists());
        assert_eq!(store.recorded_digest("bad.file"), None);
    }

    #[test]
    fn missing_file_load_returns_none() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");
        assert!(store.load("error.pkg", "h1").is_none());
    }

    #[test]
    fn reopen_rebuilds_versions_from_filenames() {
        let dir = tempdir().expect("tempdir");
        {
            let store = ShardStore::open(dir.path()).expect("open");
            let shard = shard_with_symbol("demo.pkg", "h1", 1, "foo");
            store
                .store("demo.pkg", "h1", &codec::encode(&shard).expect("encode"))
                .expect("store");
        }
        let store = ShardStore::open(dir.path()).expect("reopen");
        assert_eq!(store.recorded_digest("demo.pkg"), Some("h1".to_string()));
        assert!(!store.is_stale("demo.pkg", "h1"));
    }

    #[test]
    fn remove_forgets_and_deletes() {
        let dir = tempdir().expect("tempdir");
        let store = ShardStore::open(dir.path()).expect("open");
        let shard = shard_with_symbol("demo.pkg", "h1", 1, "foo");
        store
            .store("demo.pkg", "h1", &codec::encode(&shard).expect("encode"))
            .expect("store");

        store.remove("demo.pkg").expect("remove");
        assert!(!store.shard_path("demo.pkg", "h1").exists());
        assert!(store.is_stale("demo.pkg", "h1"));
    }
}
