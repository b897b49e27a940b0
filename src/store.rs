//! Path-addressable object stores backing the buffer, versions, and experiments.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use walkdir::WalkDir;

use crate::constants::store::KEY_SEPARATOR;
use crate::errors::PipelineError;
use crate::types::ObjectKey;

const TEMP_FILE_PREFIX: &str = ".featurestream-tmp";

/// Durable key/value object store addressed by `/`-separated keys.
///
/// This is the only contract the pipeline needs from a blob store: whole-object
/// reads and writes, deletes, and prefix listing.
pub trait ObjectStore: Send + Sync {
    /// Read an object, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError>;
    /// Create or replace an object.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError>;
    /// Create an object only if `key` is absent. Returns `false` when it already existed.
    fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<bool, PipelineError>;
    /// Delete an object. Returns `false` when it was already absent.
    fn delete(&self, key: &str) -> Result<bool, PipelineError>;
    /// All keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectKey>, PipelineError>;

    /// True when `key` exists.
    fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Join key segments with the store separator.
pub fn join_key(parts: &[&str]) -> ObjectKey {
    let mut key = String::new();
    for part in parts {
        let part = part.trim_matches(KEY_SEPARATOR);
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoryObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.objects.read().map(|guard| guard.len()).unwrap_or(0);
        f.debug_struct("MemoryObjectStore")
            .field("objects", &count)
            .finish()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self
            .objects
            .read()
            .map_err(|_| PipelineError::Store("object map lock poisoned".into()))?
            .get(key)
            .cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        self.objects
            .write()
            .map_err(|_| PipelineError::Store("object map lock poisoned".into()))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<bool, PipelineError> {
        let mut guard = self
            .objects
            .write()
            .map_err(|_| PipelineError::Store("object map lock poisoned".into()))?;
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_string(), bytes.to_vec());
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, PipelineError> {
        Ok(self
            .objects
            .write()
            .map_err(|_| PipelineError::Store("object map lock poisoned".into()))?
            .remove(key)
            .is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectKey>, PipelineError> {
        Ok(self
            .objects
            .read()
            .map_err(|_| PipelineError::Store("object map lock poisoned".into()))?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Directory-backed object store; keys map to relative file paths.
///
/// Writes go through a temp file in the target directory followed by a rename,
/// so a reader never observes a half-written object.
pub struct FileObjectStore {
    root: PathBuf,
}

impl fmt::Debug for FileObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileObjectStore")
            .field("root", &self.root)
            .finish()
    }
}

impl FileObjectStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self, PipelineError> {
        let root = root.into();
        if root.is_file() {
            return Err(PipelineError::Store(format!(
                "store root '{}' is a file",
                root.display()
            )));
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(PipelineError::Store(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn write_temp(&self, path: &Path, bytes: &[u8]) -> Result<tempfile::NamedTempFile, PipelineError> {
        let parent = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent)?;
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(parent)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        Ok(temp)
    }

    fn key_for(&self, path: &Path) -> Option<ObjectKey> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(join_key(&parts))
    }
}

impl ObjectStore for FileObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.path_for(key)?;
        let temp = self.write_temp(&path, bytes)?;
        temp.persist(&path).map_err(|err| PipelineError::Io(err.error))?;
        Ok(())
    }

    fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<bool, PipelineError> {
        let path = self.path_for(key)?;
        let temp = self.write_temp(&path, bytes)?;
        match temp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(PipelineError::Io(err.error)),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, PipelineError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectKey>, PipelineError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|err| PipelineError::Store(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_temp = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(TEMP_FILE_PREFIX));
            if is_temp {
                continue;
            }
            if let Some(key) = self.key_for(entry.path())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
