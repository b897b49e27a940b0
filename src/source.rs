//! Raw record sources drained once per producer run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::codec::decode_raw_csv;
use crate::constants::sources::{
    BLOB_SOURCE_ID, COLLECTION_SOURCE_ID, DOCUMENT_EXTENSION, DOCUMENT_ID_FIELD,
    DROPPED_BLOB_COLUMN,
};
use crate::data::RawRecord;
use crate::errors::PipelineError;
use crate::store::ObjectStore;
use crate::types::{ObjectKey, SourceId};

/// A JSON document as stored in a collection.
pub type Document = Map<String, Value>;

/// A destructive source of raw records.
pub trait RecordSource: Send + Sync {
    /// Identifier used in logs and on drained records.
    fn id(&self) -> &str;
    /// Take every pending record. Absent data yields an empty batch.
    fn drain(&self) -> Result<Vec<RawRecord>, PipelineError>;
}

/// A single CSV blob that is read, parsed and deleted.
pub struct BlobCsvSource {
    store: Arc<dyn ObjectStore>,
    key: ObjectKey,
}

impl BlobCsvSource {
    /// Drain `key` from `store`.
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<ObjectKey>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    fn unavailable(&self, err: PipelineError) -> PipelineError {
        PipelineError::SourceUnavailable {
            source_id: BLOB_SOURCE_ID.to_string(),
            reason: err.to_string(),
        }
    }
}

impl RecordSource for BlobCsvSource {
    fn id(&self) -> &str {
        BLOB_SOURCE_ID
    }

    fn drain(&self) -> Result<Vec<RawRecord>, PipelineError> {
        let Some(bytes) = self.store.get(&self.key).map_err(|err| self.unavailable(err))? else {
            debug!(key = %self.key, "no blob to drain");
            return Ok(Vec::new());
        };
        // Parse before deleting so a malformed blob stays in place.
        let mut records = decode_raw_csv(BLOB_SOURCE_ID, &bytes)?;
        for record in &mut records {
            record.remove(DROPPED_BLOB_COLUMN);
        }
        self.store
            .delete(&self.key)
            .map_err(|err| self.unavailable(err))?;
        info!(key = %self.key, rows = records.len(), "drained blob");
        Ok(records)
    }
}

/// A document collection that can be emptied in one call.
pub trait DocumentCollection: Send + Sync {
    /// Remove and return every document.
    fn drain(&self) -> Result<Vec<Document>, PipelineError>;
}

/// In-process collection.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    documents: Mutex<Vec<Document>>,
}

impl MemoryCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document.
    pub fn insert(&self, document: Document) {
        self.lock().push(document);
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the collection holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Document>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DocumentCollection for MemoryCollection {
    fn drain(&self) -> Result<Vec<Document>, PipelineError> {
        Ok(std::mem::take(&mut *self.lock()))
    }
}

/// Collection backed by a directory holding one JSON object per `.json` file.
#[derive(Debug)]
pub struct JsonDirCollection {
    root: PathBuf,
}

impl JsonDirCollection {
    /// Use `root`, creating it when missing.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self, PipelineError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory backing the collection.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `document` as a new file. The file only becomes visible once complete.
    pub fn insert(&self, document: &Document) -> Result<PathBuf, PipelineError> {
        let payload = serde_json::to_vec(document)?;
        let mut file = tempfile::Builder::new()
            .prefix("doc-")
            .suffix(".partial")
            .tempfile_in(&self.root)?;
        file.write_all(&payload)?;
        file.as_file().sync_all()?;
        let path = file.path().with_extension(DOCUMENT_EXTENSION);
        file.persist(&path).map_err(|err| err.error)?;
        Ok(path)
    }

    fn document_paths(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| PipelineError::Store(err.to_string()))?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(DOCUMENT_EXTENSION)
            {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read every path before deleting any, so a failed read loses nothing.
    /// A failed delete stops the drain; documents whose files were removed are
    /// still returned and the rest stay on disk for the next drain.
    fn take(paths: Vec<PathBuf>) -> Result<Vec<Document>, PipelineError> {
        let mut parsed = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(document)) => parsed.push((path, document)),
                Ok(_) => warn!(path = %path.display(), "leaving non-object document in place"),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "leaving unreadable document in place")
                }
            }
        }

        let mut documents = Vec::with_capacity(parsed.len());
        for (path, document) in parsed {
            if let Err(err) = fs::remove_file(&path) {
                warn!(
                    path = %path.display(),
                    error = %err,
                    drained = documents.len(),
                    "stopping drain at undeletable document"
                );
                break;
            }
            documents.push(document);
        }
        Ok(documents)
    }
}

impl DocumentCollection for JsonDirCollection {
    fn drain(&self) -> Result<Vec<Document>, PipelineError> {
        Self::take(self.document_paths()?)
    }
}

/// Records from a document collection, with the store-assigned id stripped.
pub struct CollectionSource {
    collection: Arc<dyn DocumentCollection>,
}

impl CollectionSource {
    /// Drain `collection`.
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self { collection }
    }
}

impl RecordSource for CollectionSource {
    fn id(&self) -> &str {
        COLLECTION_SOURCE_ID
    }

    fn drain(&self) -> Result<Vec<RawRecord>, PipelineError> {
        let documents = self
            .collection
            .drain()
            .map_err(|err| PipelineError::SourceUnavailable {
                source_id: COLLECTION_SOURCE_ID.to_string(),
                reason: err.to_string(),
            })?;
        let records: Vec<RawRecord> = documents
            .into_iter()
            .map(|document| {
                let mut record = RawRecord::new(COLLECTION_SOURCE_ID);
                record.fields.extend(document);
                record.remove(DOCUMENT_ID_FIELD);
                record
            })
            .collect();
        info!(rows = records.len(), "drained collection");
        Ok(records)
    }
}

/// Drains every configured source in order.
pub struct SourceCollector {
    sources: Vec<Box<dyn RecordSource>>,
}

impl SourceCollector {
    /// Collector over `sources`, drained in the given order.
    pub fn new(sources: Vec<Box<dyn RecordSource>>) -> Self {
        Self { sources }
    }

    /// The usual pair: a CSV blob followed by a document collection.
    pub fn blob_and_collection(
        blob_store: Arc<dyn ObjectStore>,
        blob_key: impl Into<ObjectKey>,
        collection: Arc<dyn DocumentCollection>,
    ) -> Self {
        Self::new(vec![
            Box::new(BlobCsvSource::new(blob_store, blob_key)),
            Box::new(CollectionSource::new(collection)),
        ])
    }

    /// Ids of the configured sources.
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    /// Drain all sources. Unavailable sources contribute nothing.
    pub fn collect(&self) -> Result<Vec<RawRecord>, PipelineError> {
        let mut records = Vec::new();
        for source in &self.sources {
            match source.drain() {
                Ok(batch) => records.extend(batch),
                Err(err @ PipelineError::SourceUnavailable { .. }) => {
                    warn!(source = source.id(), error = %err, "source unavailable; treating as empty")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }
}
