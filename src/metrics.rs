//! Regression scores logged with every trained model.

use ndarray::{ArrayView1, s};
use serde::{Deserialize, Serialize};

use crate::types::FeatureValue;

/// Error summary of predictions against targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionScores {
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

/// Metrics logged with every trained model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Scores on the training partition.
    pub train: RegressionScores,
    /// Scores on the validation partition.
    pub valid: RegressionScores,
    /// `max(0, 1 - valid MAE / mean(valid target))`.
    pub accuracy: f64,
}

/// Score `predictions` against `targets`. Empty input scores as all zeros.
pub fn regression_scores(
    targets: ArrayView1<'_, FeatureValue>,
    predictions: ArrayView1<'_, FeatureValue>,
) -> RegressionScores {
    let n = targets.len().min(predictions.len());
    if n == 0 {
        return RegressionScores::default();
    }
    let targets = targets.slice_move(s![..n]);
    let residuals = &targets - &predictions.slice_move(s![..n]);
    let squared = residuals.dot(&residuals);
    let absolute = residuals.mapv(f64::abs).sum();
    let mean = targets.sum() / n as f64;
    let total = targets.mapv(|t| (t - mean) * (t - mean)).sum();
    // Constant targets: perfect fit scores 1, anything else 0.
    let r2 = if total == 0.0 {
        if squared == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - squared / total
    };
    RegressionScores {
        rmse: (squared / n as f64).sqrt(),
        mae: absolute / n as f64,
        r2,
    }
}

/// Accuracy proxy: one minus relative MAE, floored at zero.
pub fn accuracy(valid: &RegressionScores, valid_targets: ArrayView1<'_, FeatureValue>) -> f64 {
    match valid_targets.mean() {
        Some(mean) if mean != 0.0 => (1.0 - valid.mae / mean).max(0.0),
        _ => 0.0,
    }
}
