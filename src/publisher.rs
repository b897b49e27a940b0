//! Monotonic version publishing under `versioned/v{N}/`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::{decode_rows, encode_rows};
use crate::constants::store::{
    KEY_SEPARATOR, TRAIN_FILE, VALID_FILE, VERSION_TAG_PREFIX, VERSIONED_PREFIX,
};
use crate::data::DatasetPair;
use crate::errors::PipelineError;
use crate::store::{ObjectStore, join_key};
use crate::types::{ObjectKey, VersionNumber};

/// Consumability of a version number in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionState {
    /// Neither part exists.
    Missing,
    /// Exactly one part exists; `missing` names the other.
    Partial {
        /// Key that has not been written.
        missing: ObjectKey,
    },
    /// Both parts exist; the version can be read.
    Complete,
}

/// Format a version number as its `v{N}` tag.
pub fn version_tag(version: VersionNumber) -> String {
    format!("{VERSION_TAG_PREFIX}{version}")
}

/// Parse the digits following `v` in a version tag.
pub fn parse_version_tag(tag: &str) -> Option<VersionNumber> {
    let digits = tag.trim().strip_prefix(VERSION_TAG_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Version number encoded in a `versioned/v{N}/...` key.
pub fn version_from_key(key: &str) -> Option<VersionNumber> {
    let rest = key.strip_prefix(VERSIONED_PREFIX)?;
    let (segment, _) = rest.split_once(KEY_SEPARATOR)?;
    parse_version_tag(segment)
}

/// Key of one part of a version.
pub fn part_key(version: VersionNumber, file: &str) -> ObjectKey {
    join_key(&[VERSIONED_PREFIX, &version_tag(version), file])
}

/// Publishes immutable dataset versions and reads them back.
pub struct VersionPublisher {
    store: Arc<dyn ObjectStore>,
}

impl VersionPublisher {
    /// Bind the publisher to `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Highest version number present in the store (partial versions included), or 0.
    pub fn latest_version(&self) -> Result<VersionNumber, PipelineError> {
        let latest = self
            .store
            .list(VERSIONED_PREFIX)?
            .iter()
            .filter_map(|key| version_from_key(key))
            .max()
            .unwrap_or(0);
        debug!(latest, "resolved latest published version");
        Ok(latest)
    }

    /// Publish `pair` as `latest + 1`; valid part first, train part last.
    ///
    /// Both writes are conditional creates, so an existing version is never
    /// overwritten. Callers must still keep a single publisher per store.
    pub fn publish(&self, pair: &DatasetPair) -> Result<VersionNumber, PipelineError> {
        let version = self.latest_version()? + 1;
        let valid_key = part_key(version, VALID_FILE);
        let train_key = part_key(version, TRAIN_FILE);

        let valid = encode_rows(&pair.valid)?;
        let train = encode_rows(&pair.train)?;
        if !self.store.put_if_absent(&valid_key, &valid)? {
            return Err(PipelineError::VersionConflict {
                version,
                key: valid_key,
            });
        }
        if !self.store.put_if_absent(&train_key, &train)? {
            return Err(PipelineError::VersionConflict {
                version,
                key: train_key,
            });
        }
        info!(
            version = %version_tag(version),
            train = pair.train.len(),
            valid = pair.valid.len(),
            "published dataset version"
        );
        Ok(version)
    }

    /// Whether `version` is missing, partially written, or complete.
    pub fn version_state(&self, version: VersionNumber) -> Result<VersionState, PipelineError> {
        let train_key = part_key(version, TRAIN_FILE);
        let valid_key = part_key(version, VALID_FILE);
        let state = match (self.store.exists(&train_key)?, self.store.exists(&valid_key)?) {
            (true, true) => VersionState::Complete,
            (false, false) => VersionState::Missing,
            (true, false) => VersionState::Partial { missing: valid_key },
            (false, true) => VersionState::Partial { missing: train_key },
        };
        Ok(state)
    }

    /// Read a complete version.
    pub fn read_version(&self, version: VersionNumber) -> Result<DatasetPair, PipelineError> {
        let train_key = part_key(version, TRAIN_FILE);
        let valid_key = part_key(version, VALID_FILE);
        let train = self.store.get(&train_key)?;
        let valid = self.store.get(&valid_key)?;
        match (train, valid) {
            (Some(train), Some(valid)) => Ok(DatasetPair::new(
                decode_rows(&train_key, &train)?,
                decode_rows(&valid_key, &valid)?,
            )),
            (None, None) => Err(PipelineError::VersionMissing { version }),
            (Some(_), None) => Err(PipelineError::PartialVersionWrite {
                version,
                missing: valid_key,
            }),
            (None, Some(_)) => Err(PipelineError::PartialVersionWrite {
                version,
                missing: train_key,
            }),
        }
    }
}
