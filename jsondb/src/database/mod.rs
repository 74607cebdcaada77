use crate::collection::Collection;
use crate::config::Options;
use crate::error::{JsonDbError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Collection used when the caller does not name one.
pub const DEFAULT_COLLECTION: &str = "collection-1";

/// A directory of collections.
/// Hands out one shared [`Collection`] per file and closes them all on shutdown.
pub struct Database {
    root: PathBuf,
    options: Options,
    collections: Mutex<HashMap<PathBuf, Collection>>,
}

impl Database {
    /// Open (or create) a database rooted at `root` with default options.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(root, Options::default())
    }

    pub fn open_with_options(root: impl AsRef<Path>, options: Options) -> Result<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|source| JsonDbError::Bootstrap {
                path: root.clone(),
                source,
            })?;
            log::info!("Created database directory {}", root.display());
        }
        let root = root.canonicalize()?;

        Ok(Database {
            root,
            options,
            collections: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Absolute path of the file backing collection `name`.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let suffix = format!(".{}", self.options.extension);
        if name.ends_with(&suffix) {
            self.root.join(name)
        } else {
            self.root.join(format!("{name}{suffix}"))
        }
    }

    /// Get a collection, opening it on first use. Repeated calls for the same
    /// file return handles to the same instance until it is closed.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        let path = self.resolve(name);
        let mut collections = self.lock();

        if let Some(existing) = collections.get(&path) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }

        let collection = Collection::open(&path, self.options.clone())?;
        collections.insert(path, collection.clone());
        Ok(collection)
    }

    pub fn default_collection(&self) -> Result<Collection> {
        self.collection(DEFAULT_COLLECTION)
    }

    /// Names of the collection files present in the root directory.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let pattern = format!(
            "{}/*.{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            self.options.extension
        );
        let mut names: Vec<String> = glob::glob(&pattern)
            .map_err(|e| JsonDbError::Other(format!("Glob error: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Handles to every collection currently open through this database.
    pub fn open_collections(&self) -> Vec<Collection> {
        self.lock()
            .values()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect()
    }

    /// Close one collection. Returns false if it was not open.
    pub fn close_collection(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name);
        let removed = self.lock().remove(&path);
        match removed {
            Some(collection) => {
                collection.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every open collection. A failure in one does not stop the rest;
    /// the first error is returned once all have been attempted.
    pub fn close(&self) -> Result<()> {
        let collections: Vec<Collection> = self.lock().drain().map(|(_, c)| c).collect();
        let mut first_error = None;

        for collection in collections {
            if let Err(e) = collection.close() {
                log::warn!("Failed to close collection {}: {e}", collection.path().display());
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Collection>> {
        self.collections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error while closing database {}: {e}", self.root.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn quiet() -> Options {
        Options {
            watch: false,
            flush_interval_ms: 60_000,
            ..Options::default()
        }
    }

    #[test]
    fn test_open_creates_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("db");
        let db = Database::open_with_options(&root, quiet()).unwrap();
        assert!(root.is_dir());
        assert!(db.root().is_absolute());
    }

    #[test]
    fn test_open_root_blocked_by_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let err = Database::open_with_options(blocker.join("db"), quiet()).err().unwrap();
        assert!(matches!(err, JsonDbError::Bootstrap { .. }));
    }

    #[test]
    fn test_resolve_appends_extension() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        assert_eq!(db.resolve("users"), db.root().join("users.json"));
        assert_eq!(db.resolve("users.json"), db.root().join("users.json"));
    }

    #[test]
    fn test_collection_is_cached_per_path() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        let a = db.collection("users").unwrap();
        let b = db.collection("users.json").unwrap();
        let c = db.collection("posts").unwrap();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(db.open_collections().len(), 2);
    }

    #[test]
    fn test_closed_collection_is_reopened() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        let first = db.collection("users").unwrap();
        first.insert(json!({"name": "a"})).unwrap();
        first.close().unwrap();

        let second = db.collection("users").unwrap();
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_close_flushes_everything() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        let users = db.collection("users").unwrap();
        let posts = db.default_collection().unwrap();
        users.insert(json!({"name": "a"})).unwrap();
        posts.insert(json!({"title": "t"})).unwrap();
        assert_eq!(users.stats().pending, 1);

        db.close().unwrap();
        assert!(users.is_closed());
        assert!(posts.is_closed());
        assert!(db.open_collections().is_empty());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(db.resolve("users")).unwrap()).unwrap();
        assert_eq!(raw["items"][0]["name"], json!("a"));
        assert_eq!(
            db.collection_names().unwrap(),
            vec![DEFAULT_COLLECTION.to_string(), "users".to_string()]
        );
    }

    #[test]
    fn test_close_collection() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        let users = db.collection("users").unwrap();
        assert!(db.close_collection("users").unwrap());
        assert!(!db.close_collection("users").unwrap());
        assert!(users.is_closed());
    }

    #[test]
    fn test_close_tolerates_failing_collection() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        let doomed = db.collection("doomed").unwrap();
        let fine = db.collection("fine").unwrap();
        doomed.insert(json!({"n": 1})).unwrap();
        fine.insert(json!({"n": 1})).unwrap();

        // a directory where the file was makes the final flush fail
        std::fs::remove_file(doomed.path()).unwrap();
        std::fs::create_dir(doomed.path()).unwrap();

        assert!(db.close().is_err());
        assert!(doomed.is_closed());
        assert!(fine.is_closed());
        let raw = std::fs::read_to_string(fine.path()).unwrap();
        assert!(raw.contains("\"n\": 1"));
    }

    #[test]
    fn test_collection_names_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with_options(tmp.path(), quiet()).unwrap();
        db.collection("b").unwrap();
        db.collection("a").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        assert_eq!(db.collection_names().unwrap(), vec!["a", "b"]);
    }
}
