//! Per-experiment watermark recording the highest version folded into a model.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::constants::experiments::{EXPERIMENTS_PREFIX, WATERMARK_KEY};
use crate::errors::PipelineError;
use crate::publisher::{parse_version_tag, version_tag};
use crate::store::{ObjectStore, join_key};
use crate::types::{ObjectKey, VersionNumber};

/// Highest version already consumed (`v0` means nothing consumed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub VersionNumber);

impl Watermark {
    /// Version number behind the tag.
    pub fn version(self) -> VersionNumber {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&version_tag(self.0))
    }
}

impl FromStr for Watermark {
    type Err = PipelineError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        parse_version_tag(tag)
            .map(Watermark)
            .ok_or_else(|| PipelineError::InvalidWatermark(tag.to_string()))
    }
}

/// Durable watermark storage, one value per experiment.
pub trait WatermarkStore: Send + Sync {
    /// Current watermark; absent means `v0`.
    fn read(&self, experiment: &str) -> Result<Watermark, PipelineError>;
    /// Persist `watermark`. Implementations must refuse to move it backwards.
    fn advance(&self, experiment: &str, watermark: Watermark) -> Result<(), PipelineError>;
}

/// Watermark store keeping `experiments/{experiment}/trained_till_version` in an object store.
pub struct StoreWatermarkStore {
    store: Arc<dyn ObjectStore>,
}

impl StoreWatermarkStore {
    /// Bind to `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Key holding the watermark tag for `experiment`.
    pub fn key_for(experiment: &str) -> ObjectKey {
        join_key(&[EXPERIMENTS_PREFIX, experiment, WATERMARK_KEY])
    }
}

impl WatermarkStore for StoreWatermarkStore {
    fn read(&self, experiment: &str) -> Result<Watermark, PipelineError> {
        match self.store.get(&Self::key_for(experiment))? {
            None => Ok(Watermark::default()),
            Some(bytes) => String::from_utf8_lossy(&bytes).parse(),
        }
    }

    fn advance(&self, experiment: &str, watermark: Watermark) -> Result<(), PipelineError> {
        let current = self.read(experiment)?;
        if watermark < current {
            return Err(PipelineError::WatermarkRegression {
                experiment: experiment.to_string(),
                current: current.version(),
                requested: watermark.version(),
            });
        }
        self.store
            .put(&Self::key_for(experiment), watermark.to_string().as_bytes())?;
        info!(experiment, from = %current, to = %watermark, "advanced watermark");
        Ok(())
    }
}
