use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_COLLECTION_DIR, DEFAULT_DATASET_STORE, DEFAULT_EXPERIMENT,
    DEFAULT_SOURCE_BLOB, DEFAULT_SOURCE_STORE, DEFAULT_SPLIT_SEED, DEFAULT_TRAIN_FRACTION,
    ENV_BATCH_SIZE, ENV_COLLECTION_DIR, ENV_DATASET_STORE, ENV_EXPERIMENT, ENV_MODEL_KIND,
    ENV_SOURCE_BLOB, ENV_SOURCE_STORE, ENV_SPLIT_SEED, ENV_TRAIN_FRACTION,
};
use crate::errors::PipelineError;
use crate::model::ModelKind;
use crate::types::{ExperimentName, ObjectKey};

/// Settings shared by the producer and consumer jobs.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Train-row count at which the buffer is published as a new version.
    pub batch_size: usize,
    /// Fraction of newly collected rows assigned to train, in `(0, 1]`.
    pub train_fraction: f64,
    /// Shuffle seed for the train/valid split.
    pub split_seed: u64,
    /// Directory of the dataset store (buffer, versions, experiments).
    pub dataset_store: PathBuf,
    /// Directory of the store holding the incoming CSV blob.
    pub source_store: PathBuf,
    /// Key of the CSV blob inside the source store.
    pub source_blob: ObjectKey,
    /// Directory backing the document collection.
    pub collection_dir: PathBuf,
    /// Experiment the consumer trains.
    pub experiment: ExperimentName,
    /// Model the consumer fits.
    pub model_kind: ModelKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            train_fraction: DEFAULT_TRAIN_FRACTION,
            split_seed: DEFAULT_SPLIT_SEED,
            dataset_store: PathBuf::from(DEFAULT_DATASET_STORE),
            source_store: PathBuf::from(DEFAULT_SOURCE_STORE),
            source_blob: DEFAULT_SOURCE_BLOB.to_string(),
            collection_dir: PathBuf::from(DEFAULT_COLLECTION_DIR),
            experiment: DEFAULT_EXPERIMENT.to_string(),
            model_kind: ModelKind::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = value(ENV_BATCH_SIZE) {
            config.batch_size = parse_var(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = value(ENV_TRAIN_FRACTION) {
            config.train_fraction = parse_var(ENV_TRAIN_FRACTION, &raw)?;
        }
        if let Some(raw) = value(ENV_SPLIT_SEED) {
            config.split_seed = parse_var(ENV_SPLIT_SEED, &raw)?;
        }
        if let Some(raw) = value(ENV_DATASET_STORE) {
            config.dataset_store = PathBuf::from(raw);
        }
        if let Some(raw) = value(ENV_SOURCE_STORE) {
            config.source_store = PathBuf::from(raw);
        }
        if let Some(raw) = value(ENV_SOURCE_BLOB) {
            config.source_blob = raw;
        }
        if let Some(raw) = value(ENV_COLLECTION_DIR) {
            config.collection_dir = PathBuf::from(raw);
        }
        if let Some(raw) = value(ENV_EXPERIMENT) {
            config.experiment = raw;
        }
        if let Some(raw) = value(ENV_MODEL_KIND) {
            config.model_kind = raw.parse()?;
        }
        config.validated()
    }

    /// Return `self` if every field is usable.
    pub fn validated(self) -> Result<Self, PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(PipelineError::Configuration(format!(
                "train fraction must be in (0, 1], got {}",
                self.train_fraction
            )));
        }
        let experiment = self.experiment.trim();
        if experiment.is_empty() || experiment.contains('/') {
            return Err(PipelineError::Configuration(format!(
                "experiment name '{}' must be non-empty and contain no '/'",
                self.experiment
            )));
        }
        if self.source_blob.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "source blob key must not be empty".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, PipelineError> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::Configuration(format!("{key}: cannot parse '{raw}'")))
}
