use std::io;

use thiserror::Error;

use crate::types::{ExperimentName, ObjectKey, SourceId, VersionNumber};

/// Error type for transform, storage, publishing, and consumption failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },
    #[error("row {row} is missing target field '{field}'")]
    MissingTarget { row: usize, field: String },
    #[error("'{key}' has {found} columns, expected {expected}")]
    SchemaWidthMismatch {
        key: ObjectKey,
        expected: usize,
        found: usize,
    },
    #[error("'{key}' column {column} is '{found}', expected '{expected}'")]
    SchemaHeaderMismatch {
        key: ObjectKey,
        column: usize,
        expected: String,
        found: String,
    },
    #[error("'{key}' row {row} column '{column}' is not a number: '{value}'")]
    InvalidCell {
        key: ObjectKey,
        row: usize,
        column: String,
        value: String,
    },
    #[error("version v{version} is incomplete: '{missing}' has not been written")]
    PartialVersionWrite {
        version: VersionNumber,
        missing: ObjectKey,
    },
    #[error("version v{version} does not exist")]
    VersionMissing { version: VersionNumber },
    #[error("version v{version} already has '{key}'; refusing to overwrite")]
    VersionConflict {
        version: VersionNumber,
        key: ObjectKey,
    },
    #[error("no loadable versions between v{start} and v{end}")]
    NoTrainingData {
        start: VersionNumber,
        end: VersionNumber,
    },
    #[error("watermark for '{experiment}' was not advanced: {reason}")]
    WatermarkAdvance {
        experiment: ExperimentName,
        reason: String,
    },
    #[error("watermark for '{experiment}' is v{current}; refusing to move it back to v{requested}")]
    WatermarkRegression {
        experiment: ExperimentName,
        current: VersionNumber,
        requested: VersionNumber,
    },
    #[error("invalid watermark tag '{0}'")]
    InvalidWatermark(String),
    #[error("artifact log failure: {0}")]
    ArtifactLog(String),
    #[error("training failure: {0}")]
    Training(String),
    #[error("store failure: {0}")]
    Store(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}
