//! Model artifact log: every trained model with its metrics, parameters and
//! the `trained_till_version` tag it was trained through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::experiments::{
    ARTIFACT_FILE, ARTIFACT_RECORD_VERSION, EXPERIMENTS_PREFIX, RUNS_DIR,
};
use crate::errors::PipelineError;
use crate::metrics::ModelMetrics;
use crate::model::{LinearModel, ModelKind};
use crate::publisher::{parse_version_tag, version_tag};
use crate::store::{ObjectStore, join_key};
use crate::types::{ExperimentName, ObjectKey, RunId, VersionNumber};

/// Parameters recorded alongside a trained model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Trainer that produced the model.
    pub model_kind: ModelKind,
    /// First version in the trained range.
    pub trained_from_version: VersionNumber,
    /// Last version in the trained range.
    pub trained_to_version: VersionNumber,
    /// Feature columns seen by the model.
    pub n_features: usize,
    /// Train rows fitted on.
    pub n_train_samples: usize,
    /// Valid rows scored.
    pub n_valid_samples: usize,
    /// Run used as warm start, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_run_id: Option<RunId>,
}

/// A logged training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Payload format version.
    pub record_version: u8,
    /// Unique run identifier.
    pub run_id: RunId,
    /// Human-readable run name (`train_v{from}_to_v{to}`).
    pub run_name: String,
    /// Experiment the run belongs to.
    pub experiment: ExperimentName,
    /// Wall-clock time the run was logged.
    pub logged_at: DateTime<Utc>,
    /// Highest version folded into this model, as a `v{N}` tag.
    pub trained_till_version: String,
    /// Run parameters.
    pub params: RunParameters,
    /// Evaluation metrics.
    pub metrics: ModelMetrics,
    /// The fitted model.
    pub model: LinearModel,
}

impl ModelArtifact {
    /// Build an artifact for a run over `[params.trained_from_version, params.trained_to_version]`.
    pub fn new(
        experiment: impl Into<ExperimentName>,
        params: RunParameters,
        metrics: ModelMetrics,
        model: LinearModel,
        logged_at: DateTime<Utc>,
    ) -> Self {
        let run_name = run_name(params.trained_from_version, params.trained_to_version);
        // Runs over the same range within one microsecond still get distinct ids.
        let run_id = format!(
            "{run_name}-{}-{:08x}",
            logged_at.format("%Y%m%dT%H%M%S%.6fZ"),
            rand::random::<u32>()
        );
        Self {
            record_version: ARTIFACT_RECORD_VERSION,
            run_id,
            run_name,
            experiment: experiment.into(),
            logged_at,
            trained_till_version: version_tag(params.trained_to_version),
            params,
            metrics,
            model,
        }
    }

    /// Numeric value of the `trained_till_version` tag (`0` when unparsable).
    pub fn trained_till(&self) -> VersionNumber {
        parse_version_tag(&self.trained_till_version).unwrap_or(0)
    }
}

/// Canonical run name for a version range.
pub fn run_name(from: VersionNumber, to: VersionNumber) -> String {
    format!("train_{}_to_{}", version_tag(from), version_tag(to))
}

/// Durable log of trained models.
pub trait ArtifactLog: Send + Sync {
    /// Persist `artifact`. Must not return `Ok` unless the artifact is durable.
    fn log(&self, artifact: &ModelArtifact) -> Result<(), PipelineError>;
    /// Every readable artifact of `experiment`.
    fn runs(&self, experiment: &str) -> Result<Vec<ModelArtifact>, PipelineError>;

    /// Artifact trained through the highest version, newest first on ties.
    fn latest(&self, experiment: &str) -> Result<Option<ModelArtifact>, PipelineError> {
        Ok(self
            .runs(experiment)?
            .into_iter()
            .max_by(|a, b| {
                a.trained_till()
                    .cmp(&b.trained_till())
                    .then_with(|| a.logged_at.cmp(&b.logged_at))
            }))
    }
}

/// Artifact log persisting `experiments/{experiment}/runs/{run_id}/model.json`.
pub struct StoreArtifactLog {
    store: Arc<dyn ObjectStore>,
}

impl StoreArtifactLog {
    /// Bind to `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn runs_prefix(experiment: &str) -> ObjectKey {
        let mut prefix = join_key(&[EXPERIMENTS_PREFIX, experiment, RUNS_DIR]);
        prefix.push('/');
        prefix
    }

    /// Key of a run's artifact.
    pub fn artifact_key(experiment: &str, run_id: &str) -> ObjectKey {
        join_key(&[EXPERIMENTS_PREFIX, experiment, RUNS_DIR, run_id, ARTIFACT_FILE])
    }
}

impl ArtifactLog for StoreArtifactLog {
    fn log(&self, artifact: &ModelArtifact) -> Result<(), PipelineError> {
        let key = Self::artifact_key(&artifact.experiment, &artifact.run_id);
        let payload = serde_json::to_vec_pretty(artifact)?;
        if !self.store.put_if_absent(&key, &payload)? {
            return Err(PipelineError::ArtifactLog(format!(
                "run '{}' already logged",
                artifact.run_id
            )));
        }
        info!(
            experiment = %artifact.experiment,
            run_id = %artifact.run_id,
            trained_till_version = %artifact.trained_till_version,
            "logged model artifact"
        );
        Ok(())
    }

    fn runs(&self, experiment: &str) -> Result<Vec<ModelArtifact>, PipelineError> {
        let mut runs = Vec::new();
        for key in self.store.list(&Self::runs_prefix(experiment))? {
            if !key.ends_with(ARTIFACT_FILE) {
                continue;
            }
            let Some(bytes) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_slice::<ModelArtifact>(&bytes) {
                Ok(artifact) if artifact.record_version == ARTIFACT_RECORD_VERSION => {
                    runs.push(artifact)
                }
                Ok(artifact) => warn!(
                    key = %key,
                    record_version = artifact.record_version,
                    "skipping artifact with unsupported record version"
                ),
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable artifact"),
            }
        }
        Ok(runs)
    }
}
