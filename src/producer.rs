//! One producer run: drain sources, transform, split, merge into the buffer,
//! and publish once the buffered train partition reaches the batch size.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::buffer::{AccumulationBuffer, merge, split_rows};
use crate::config::PipelineConfig;
use crate::constants::store::REJECTED_PREFIX;
use crate::data::{DatasetPair, RawRecord};
use crate::errors::PipelineError;
use crate::publisher::{VersionPublisher, version_tag};
use crate::source::SourceCollector;
use crate::store::ObjectStore;
use crate::transform::transform_batch;
use crate::types::{ObjectKey, VersionNumber};

/// Result of one producer run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// Sources were empty; the buffer was left untouched.
    NoNewData {
        /// Train rows already buffered.
        train: usize,
        /// Valid rows already buffered.
        valid: usize,
    },
    /// New rows were merged into the buffer without publishing.
    Buffered {
        /// Rows collected this run.
        new_rows: usize,
        /// Train rows now buffered.
        train: usize,
        /// Valid rows now buffered.
        valid: usize,
    },
    /// The buffer reached the batch size and was published.
    Published {
        /// Version assigned to the snapshot.
        version: VersionNumber,
        /// Train rows in the snapshot.
        train: usize,
        /// Valid rows in the snapshot.
        valid: usize,
    },
}

#[derive(Serialize)]
struct RejectedBatch<'a> {
    reason: String,
    records: &'a [RawRecord],
}

/// Producer job over a dataset store and a set of sources.
pub struct Producer {
    config: PipelineConfig,
    datasets: Arc<dyn ObjectStore>,
    buffer: AccumulationBuffer,
    publisher: VersionPublisher,
    collector: SourceCollector,
}

impl Producer {
    /// Wire a producer.
    pub fn new(
        config: PipelineConfig,
        datasets: Arc<dyn ObjectStore>,
        collector: SourceCollector,
    ) -> Self {
        Self {
            config,
            buffer: AccumulationBuffer::new(datasets.clone()),
            publisher: VersionPublisher::new(datasets.clone()),
            datasets,
            collector,
        }
    }

    /// Configuration the producer runs with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run.
    pub fn run(&self) -> Result<ProducerOutcome, PipelineError> {
        let existing = self.buffer.load()?;
        let raw = self.collector.collect()?;
        if raw.is_empty() {
            info!(
                train = existing.train.len(),
                valid = existing.valid.len(),
                "no new data"
            );
            return Ok(ProducerOutcome::NoNewData {
                train: existing.train.len(),
                valid: existing.valid.len(),
            });
        }
        info!(rows = raw.len(), "collected raw records");

        // Sources are drained from here on; failures must not drop the batch.
        let rows = transform_batch(&raw).map_err(|err| self.reject(&raw, err))?;
        let incoming = split_rows(rows, self.config.train_fraction, self.config.split_seed);
        debug!(
            train = incoming.train.len(),
            valid = incoming.valid.len(),
            "split new rows"
        );
        let merged = merge(existing.clone(), incoming);

        if merged.train.len() < self.config.batch_size {
            self.buffer
                .store(&merged)
                .map_err(|err| self.restore_and_reject(&existing, &raw, err))?;
            info!(
                train = merged.train.len(),
                valid = merged.valid.len(),
                batch_size = self.config.batch_size,
                "buffered rows below batch size"
            );
            return Ok(ProducerOutcome::Buffered {
                new_rows: raw.len(),
                train: merged.train.len(),
                valid: merged.valid.len(),
            });
        }

        match self.publisher.publish(&merged) {
            Ok(version) => {
                info!(
                    version = %version_tag(version),
                    train = merged.train.len(),
                    valid = merged.valid.len(),
                    "published buffer"
                );
                // The buffer is only emptied once its rows live in a version.
                if let Err(err) = self.buffer.clear() {
                    error!(
                        version = %version_tag(version),
                        error = %err,
                        "published rows are still in the instream buffer"
                    );
                    return Err(err);
                }
                Ok(ProducerOutcome::Published {
                    version,
                    train: merged.train.len(),
                    valid: merged.valid.len(),
                })
            }
            Err(err) => {
                warn!(error = %err, "publish failed; keeping rows in the buffer");
                self.buffer
                    .store(&merged)
                    .map_err(|store_err| self.restore_and_reject(&existing, &raw, store_err))?;
                Err(err)
            }
        }
    }

    /// Put the previous buffer back after a failed write and reject the drained batch.
    fn restore_and_reject(
        &self,
        existing: &DatasetPair,
        raw: &[RawRecord],
        err: PipelineError,
    ) -> PipelineError {
        if let Err(restore) = self.buffer.store(existing) {
            warn!(error = %restore, "could not rewrite the previous instream buffer");
        }
        self.reject(raw, err)
    }

    /// Persist a drained batch under `rejected/` and hand back `err`.
    fn reject(&self, raw: &[RawRecord], err: PipelineError) -> PipelineError {
        let key: ObjectKey = format!(
            "{REJECTED_PREFIX}run-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
        );
        let batch = RejectedBatch {
            reason: err.to_string(),
            records: raw,
        };
        let written = serde_json::to_vec_pretty(&batch)
            .map_err(PipelineError::from)
            .and_then(|payload| self.datasets.put(&key, &payload));
        match written {
            Ok(()) => warn!(key = %key, rows = raw.len(), error = %err, "rejected drained batch"),
            Err(write_err) => error!(
                rows = raw.len(),
                error = %err,
                write_error = %write_err,
                "drained batch lost"
            ),
        }
        err
    }
}
