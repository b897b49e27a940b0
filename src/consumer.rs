//! Incremental consumer: trains on versions above the watermark, logs the
//! model, then advances the watermark.
//!
//! Run phases:
//! - `Idle -> Loading`: read the watermark `W` and latest version `L`; no-op when `W >= L`.
//! - `Loading -> Training`: read `[W+1, L]`; unreadable versions are skipped,
//!   malformed ones abort the run.
//! - `Training -> Committing`: fit and score the model.
//! - `Committing -> Idle`: log the artifact, then advance the watermark.
//!
//! Any failure returns to `Idle` without touching the watermark.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::constants::features::FEATURE_COUNT;
use crate::data::{DatasetPair, FeatureMatrix};
use crate::errors::PipelineError;
use crate::metrics::{ModelMetrics, accuracy, regression_scores};
use crate::model::{LinearModel, Trainer};
use crate::publisher::{VersionPublisher, version_tag};
use crate::registry::{ArtifactLog, ModelArtifact, RunParameters};
use crate::store::ObjectStore;
use crate::types::{ExperimentName, RunId, VersionNumber};
use crate::watermark::{Watermark, WatermarkStore};

/// Phase of a consumer run, used in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerPhase {
    /// Between runs.
    Idle,
    /// Reading versions above the watermark.
    Loading,
    /// Fitting and scoring.
    Training,
    /// Logging the artifact and advancing the watermark.
    Committing,
}

/// Result of one consumer run.
#[derive(Clone, Debug, PartialEq)]
pub enum ConsumerOutcome {
    /// Nothing above the watermark.
    UpToDate {
        /// Watermark at the start of the run.
        watermark: Watermark,
        /// Latest published version.
        latest: VersionNumber,
    },
    /// A model was trained and the watermark advanced.
    Trained(TrainingReport),
}

/// Summary of a successful training run.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingReport {
    /// Id of the logged artifact.
    pub run_id: RunId,
    /// Watermark before the run.
    pub previous: Watermark,
    /// Watermark after the run (highest loaded version).
    pub committed: Watermark,
    /// Versions folded into the model, ascending.
    pub loaded_versions: Vec<VersionNumber>,
    /// Unreadable versions below the committed endpoint; never revisited.
    pub skipped_versions: Vec<VersionNumber>,
    /// Unreadable versions above the endpoint; retried next run.
    pub deferred_versions: Vec<VersionNumber>,
    /// Train rows fitted on.
    pub train_rows: usize,
    /// Valid rows scored.
    pub valid_rows: usize,
    /// Scores logged with the artifact.
    pub metrics: ModelMetrics,
}

struct LoadedRange {
    data: DatasetPair,
    loaded: Vec<VersionNumber>,
    skipped: Vec<VersionNumber>,
    deferred: Vec<VersionNumber>,
}

/// Consumes published versions for a single experiment.
pub struct IncrementalConsumer {
    experiment: ExperimentName,
    publisher: VersionPublisher,
    watermarks: Arc<dyn WatermarkStore>,
    artifacts: Arc<dyn ArtifactLog>,
    trainer: Arc<dyn Trainer>,
}

impl IncrementalConsumer {
    /// Wire a consumer for `experiment` over `datasets`.
    pub fn new(
        experiment: impl Into<ExperimentName>,
        datasets: Arc<dyn ObjectStore>,
        watermarks: Arc<dyn WatermarkStore>,
        artifacts: Arc<dyn ArtifactLog>,
        trainer: Arc<dyn Trainer>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            publisher: VersionPublisher::new(datasets),
            watermarks,
            artifacts,
            trainer,
        }
    }

    /// Experiment this consumer trains.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Versions not yet consumed, `None` when up to date.
    pub fn pending_range(&self) -> Result<Option<RangeInclusive<VersionNumber>>, PipelineError> {
        let watermark = self.watermarks.read(&self.experiment)?;
        let latest = self.publisher.latest_version()?;
        Ok((watermark.version() < latest).then(|| watermark.version() + 1..=latest))
    }

    /// Execute one run.
    pub fn run(&self) -> Result<ConsumerOutcome, PipelineError> {
        debug!(experiment = %self.experiment, phase = ?ConsumerPhase::Idle, "consumer run starting");
        let watermark = self.watermarks.read(&self.experiment)?;
        let latest = self.publisher.latest_version()?;
        if watermark.version() >= latest {
            info!(
                experiment = %self.experiment,
                %watermark,
                latest = %version_tag(latest),
                "model already trained on latest data"
            );
            return Ok(ConsumerOutcome::UpToDate { watermark, latest });
        }

        let range = watermark.version() + 1..=latest;
        debug!(experiment = %self.experiment, phase = ?ConsumerPhase::Loading, ?range, "loading versions");
        let loaded = self.load_range(range)?;
        let Some(&endpoint) = loaded.loaded.last() else {
            return Err(PipelineError::NoTrainingData {
                start: watermark.version() + 1,
                end: latest,
            });
        };

        debug!(experiment = %self.experiment, phase = ?ConsumerPhase::Training, "training model");
        let train = FeatureMatrix::from_records(&loaded.data.train);
        let valid = FeatureMatrix::from_records(&loaded.data.valid);
        let previous_run = match self.artifacts.latest(&self.experiment) {
            Ok(run) => run,
            Err(err) => {
                warn!(experiment = %self.experiment, error = %err, "previous model unavailable; training from scratch");
                None
            }
        };
        let warm_start = previous_run.as_ref().map(|run| &run.model);
        let model = self.trainer.fit(warm_start, &train)?;
        let metrics = evaluate(&model, &train, &valid);

        debug!(experiment = %self.experiment, phase = ?ConsumerPhase::Committing, "logging model");
        let params = RunParameters {
            model_kind: self.trainer.kind(),
            trained_from_version: watermark.version() + 1,
            trained_to_version: endpoint,
            n_features: FEATURE_COUNT,
            n_train_samples: train.len(),
            n_valid_samples: valid.len(),
            previous_run_id: previous_run.map(|run| run.run_id),
        };
        let artifact = ModelArtifact::new(&*self.experiment, params, metrics, model, Utc::now());
        self.artifacts.log(&artifact)?;

        let committed = Watermark(endpoint);
        self.watermarks
            .advance(&self.experiment, committed)
            .map_err(|err| PipelineError::WatermarkAdvance {
                experiment: self.experiment.clone(),
                reason: err.to_string(),
            })?;

        info!(
            experiment = %self.experiment,
            run_id = %artifact.run_id,
            from = %watermark,
            to = %committed,
            accuracy = metrics.accuracy,
            rmse = metrics.valid.rmse,
            "training run committed"
        );
        Ok(ConsumerOutcome::Trained(TrainingReport {
            run_id: artifact.run_id,
            previous: watermark,
            committed,
            loaded_versions: loaded.loaded,
            skipped_versions: loaded.skipped,
            deferred_versions: loaded.deferred,
            train_rows: train.len(),
            valid_rows: valid.len(),
            metrics,
        }))
    }

    fn load_range(&self, range: RangeInclusive<VersionNumber>) -> Result<LoadedRange, PipelineError> {
        let mut data = DatasetPair::default();
        let mut loaded = Vec::new();
        let mut unreadable = Vec::new();
        for version in range {
            match self.publisher.read_version(version) {
                Ok(pair) => {
                    debug!(
                        version = %version_tag(version),
                        train = pair.train.len(),
                        valid = pair.valid.len(),
                        "loaded version"
                    );
                    data.extend(pair);
                    loaded.push(version);
                }
                Err(err) if is_corruption(&err) => return Err(err),
                Err(err) => {
                    warn!(version = %version_tag(version), error = %err, "could not load version");
                    unreadable.push(version);
                }
            }
        }
        let endpoint = loaded.last().copied().unwrap_or(0);
        let (skipped, deferred): (Vec<_>, Vec<_>) =
            unreadable.into_iter().partition(|v| *v < endpoint);
        Ok(LoadedRange {
            data,
            loaded,
            skipped,
            deferred,
        })
    }
}

fn is_corruption(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::SchemaWidthMismatch { .. }
            | PipelineError::SchemaHeaderMismatch { .. }
            | PipelineError::InvalidCell { .. }
            | PipelineError::Csv(_)
    )
}

/// Score `model` on both partitions.
pub fn evaluate(model: &LinearModel, train: &FeatureMatrix, valid: &FeatureMatrix) -> ModelMetrics {
    let train_scores = regression_scores(train.targets.view(), model.predict(train).view());
    let valid_scores = regression_scores(valid.targets.view(), model.predict(valid).view());
    ModelMetrics {
        train: train_scores,
        valid: valid_scores,
        accuracy: accuracy(&valid_scores, valid.targets.view()),
    }
}
