#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command-line runners behind the producer and consumer binaries.
pub mod apps;
/// Instream accumulation buffer and the deterministic train/valid split.
pub mod buffer;
/// CSV encoding of processed rows and decoding of raw blobs.
pub mod codec;
/// Pipeline configuration types.
pub mod config;
/// Centralized constants for features, store layout, and configuration.
pub mod constants;
/// Incremental watermark-driven consumer.
pub mod consumer;
/// Raw, processed, and partitioned record types.
pub mod data;
/// Categorical feature hashing.
pub mod hash;
/// Regression metrics.
pub mod metrics;
/// Model kinds and trainers.
pub mod model;
/// Producer run orchestration.
pub mod producer;
/// Monotonic version publishing.
pub mod publisher;
/// Model artifact log.
pub mod registry;
/// Raw record sources and the collector that drains them.
pub mod source;
/// Object store abstraction and implementations.
pub mod store;
/// Stateless feature transform.
pub mod transform;
/// Shared type aliases.
pub mod types;
/// Per-experiment consumption watermark.
pub mod watermark;

mod errors;

pub use buffer::{AccumulationBuffer, merge, split_rows};
pub use config::PipelineConfig;
pub use consumer::{ConsumerOutcome, IncrementalConsumer, TrainingReport};
pub use data::{DatasetPair, FeatureMatrix, ProcessedRecord, RawRecord};
pub use errors::PipelineError;
pub use metrics::{ModelMetrics, RegressionScores};
pub use model::{LinearModel, ModelKind, Trainer};
pub use producer::{Producer, ProducerOutcome};
pub use publisher::{VersionPublisher, VersionState};
pub use registry::{ArtifactLog, ModelArtifact, RunParameters, StoreArtifactLog};
pub use source::{
    BlobCsvSource, CollectionSource, DocumentCollection, JsonDirCollection, MemoryCollection,
    RecordSource, SourceCollector,
};
pub use store::{FileObjectStore, MemoryObjectStore, ObjectStore};
pub use transform::{column_names, transform, transform_batch};
pub use types::{ExperimentName, ObjectKey, RunId, SourceId, VersionNumber};
pub use watermark::{StoreWatermarkStore, Watermark, WatermarkStore};
