//! Model kinds the consumer can train, and the trainer seam it calls through.

use std::fmt;
use std::str::FromStr;

use linfa_linalg::eigh::Eigh;
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip, s};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::features::FEATURE_COUNT;
use crate::data::FeatureMatrix;
use crate::errors::PipelineError;
use crate::types::FeatureValue;

const DEFAULT_RIDGE_ALPHA: f64 = 1.0;
const EIGEN_TOLERANCE: f64 = 1e-10;
const CONSTANT_TOLERANCE: f64 = 1e-12;

/// Closed set of model kinds, selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    /// Ordinary least squares with intercept; retrains from scratch on each batch.
    #[default]
    LinearRegression,
    /// L2-regularised least squares; a warm-start model acts as the prior.
    Ridge {
        /// Penalty on standardized coefficients.
        alpha: f64,
    },
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinearRegression => f.write_str("linear_regression"),
            Self::Ridge { alpha } => write!(f, "ridge:{alpha}"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (name, param) = match raw.split_once(':') {
            Some((name, param)) => (name.trim(), Some(param.trim())),
            None => (raw, None),
        };
        match (name.to_ascii_lowercase().as_str(), param) {
            ("linear_regression", None) => Ok(Self::LinearRegression),
            ("ridge", None) => Ok(Self::Ridge {
                alpha: DEFAULT_RIDGE_ALPHA,
            }),
            ("ridge", Some(param)) => match param.parse::<f64>() {
                Ok(alpha) if alpha.is_finite() && alpha >= 0.0 => Ok(Self::Ridge { alpha }),
                _ => Err(PipelineError::Configuration(format!(
                    "invalid ridge alpha '{param}'"
                ))),
            },
            _ => Err(PipelineError::Configuration(format!(
                "unknown model kind '{raw}' (expected linear_regression or ridge[:alpha])"
            ))),
        }
    }
}

impl ModelKind {
    fn alpha(self) -> f64 {
        match self {
            Self::LinearRegression => 0.0,
            Self::Ridge { alpha } => alpha,
        }
    }
}

/// Fitted linear model over the fixed feature columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Kind that produced this model.
    pub kind: ModelKind,
    /// Intercept term.
    pub intercept: f64,
    /// One coefficient per feature column.
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    /// Predict a single feature row.
    pub fn predict_row(&self, features: ArrayView1<'_, FeatureValue>) -> FeatureValue {
        let width = self.coefficients.len().min(features.len());
        self.intercept
            + features
                .slice(s![..width])
                .dot(&ArrayView1::from(&self.coefficients[..width]))
    }

    /// Predict every row of `matrix`.
    pub fn predict(&self, matrix: &FeatureMatrix) -> Array1<FeatureValue> {
        let width = self.coefficients.len().min(matrix.features.ncols());
        matrix
            .features
            .slice(s![.., ..width])
            .dot(&ArrayView1::from(&self.coefficients[..width]))
            + self.intercept
    }
}

/// Training collaborator called by the incremental consumer.
pub trait Trainer: Send + Sync {
    /// Kind recorded in run parameters.
    fn kind(&self) -> ModelKind;
    /// Fit on `data`, optionally continuing from `warm_start`.
    fn fit(
        &self,
        warm_start: Option<&LinearModel>,
        data: &FeatureMatrix,
    ) -> Result<LinearModel, PipelineError>;
}

impl Trainer for ModelKind {
    fn kind(&self) -> ModelKind {
        *self
    }

    fn fit(
        &self,
        warm_start: Option<&LinearModel>,
        data: &FeatureMatrix,
    ) -> Result<LinearModel, PipelineError> {
        fit_linear(*self, warm_start, data)
    }
}

/// Least squares on standardized columns, solved through the normal equations.
///
/// Constant columns get a zero coefficient. A singular gram matrix (collinear
/// columns) yields the minimum-norm least-squares solution.
fn fit_linear(
    kind: ModelKind,
    warm_start: Option<&LinearModel>,
    data: &FeatureMatrix,
) -> Result<LinearModel, PipelineError> {
    let features = &data.features;
    let n = data.len();
    if n == 0 {
        return Err(PipelineError::Training("no rows to fit".into()));
    }
    if features.nrows() != n {
        return Err(PipelineError::Training(format!(
            "{} feature rows for {n} targets",
            features.nrows()
        )));
    }
    if features.ncols() != FEATURE_COUNT {
        return Err(PipelineError::Training(format!(
            "{} feature columns, expected {FEATURE_COUNT}",
            features.ncols()
        )));
    }

    let (Some(means), Some(y_mean)) = (features.mean_axis(Axis(0)), data.targets.mean()) else {
        return Err(PipelineError::Training("no rows to fit".into()));
    };
    let centered = features - &means;
    let scales = centered.map_axis(Axis(0), |column| (column.dot(&column) / n as f64).sqrt());
    // Rounding in the mean can leave a constant column with a scale of ~1e-17.
    let active: Vec<usize> = (0..FEATURE_COUNT)
        .filter(|&j| scales[j] > CONSTANT_TOLERANCE * means[j].abs().max(1.0))
        .collect();

    let prior = warm_start
        .filter(|model| {
            model.coefficients.len() == FEATURE_COUNT
                && std::mem::discriminant(&model.kind) == std::mem::discriminant(&kind)
        })
        .map(|model| model.coefficients.as_slice());
    if warm_start.is_some() && prior.is_none() {
        debug!(%kind, "warm-start model is incompatible; fitting from scratch");
    }

    if active.is_empty() {
        debug!(%kind, rows = n, "every feature column is constant; fitting the mean");
        return Ok(LinearModel {
            kind,
            intercept: y_mean,
            coefficients: vec![0.0; FEATURE_COUNT],
        });
    }

    let alpha = kind.alpha();
    let mut z = centered.select(Axis(1), &active);
    z /= &scales.select(Axis(0), &active);
    let y = data.targets.mapv(|target| target - y_mean);

    let mut gram = z.t().dot(&z);
    gram.diag_mut().mapv_inplace(|d| d + alpha);
    let mut rhs = z.t().dot(&y);
    if let Some(prior) = prior {
        for (slot, &j) in active.iter().enumerate() {
            rhs[slot] += alpha * prior[j] * scales[j];
        }
    }

    let standardized = solve_normal_equations(&gram, &rhs)?;
    let mut coefficients = Array1::<f64>::zeros(FEATURE_COUNT);
    for (slot, &j) in active.iter().enumerate() {
        coefficients[j] = standardized[slot] / scales[j];
    }
    let intercept = y_mean - coefficients.dot(&means);

    debug!(%kind, rows = n, active = active.len(), "fitted linear model");
    Ok(LinearModel {
        kind,
        intercept,
        coefficients: coefficients.to_vec(),
    })
}

/// Solve the symmetric system through its eigendecomposition, dropping
/// directions whose eigenvalue is negligible against the largest one.
fn solve_normal_equations(
    gram: &Array2<f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>, PipelineError> {
    if rhs.is_empty() {
        return Ok(Array1::zeros(0));
    }
    let (eigenvalues, eigenvectors) = gram
        .eigh()
        .map_err(|err| PipelineError::Training(format!("normal equations: {err}")))?;
    let largest = eigenvalues.iter().fold(0.0_f64, |max, value| max.max(value.abs()));
    let cutoff = EIGEN_TOLERANCE * largest;
    let projected = eigenvectors.t().dot(rhs);
    let scaled = Zip::from(&projected)
        .and(&eigenvalues)
        .map_collect(|&p, &lambda| if lambda > cutoff { p / lambda } else { 0.0 });
    Ok(eigenvectors.dot(&scaled))
}
