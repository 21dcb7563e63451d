use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Per-property regression quality, in whatever units the inputs were in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub property_labels: Vec<String>,
    pub mse: Vec<f64>,
    pub r2: Vec<f64>,
}

impl RegressionMetrics {
    pub fn compute(
        y_true: ArrayView2<f64>,
        y_pred: ArrayView2<f64>,
        property_labels: &[String],
    ) -> PipelineResult<Self> {
        if y_true.dim() != y_pred.dim() {
            return Err(PipelineError::shape("metrics", y_true.ncols(), y_pred.ncols()));
        }
        if property_labels.len() != y_true.ncols() {
            return Err(PipelineError::shape(
                "metric labels",
                y_true.ncols(),
                property_labels.len(),
            ));
        }
        let mse = y_true
            .axis_iter(Axis(1))
            .zip(y_pred.axis_iter(Axis(1)))
            .map(|(t, p)| mean_squared_error(t, p))
            .collect();
        let r2 = y_true
            .axis_iter(Axis(1))
            .zip(y_pred.axis_iter(Axis(1)))
            .map(|(t, p)| r2_score(t, p))
            .collect();
        Ok(Self {
            property_labels: property_labels.to_vec(),
            mse,
            r2,
        })
    }

    pub fn mean_r2(&self) -> f64 {
        Array1::from(self.r2.clone()).mean().unwrap_or(0.0)
    }
}

pub fn mean_squared_error(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let diff = &y_true - &y_pred;
    diff.dot(&diff) / y_true.len() as f64
}

/// Coefficient of determination. A constant target scores 1 for a perfect
/// prediction and 0 otherwise.
pub fn r2_score(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> f64 {
    let Some(mean) = y_true.mean() else {
        return 0.0;
    };
    let ss_res: f64 = y_true.iter().zip(y_pred.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Negative MSE averaged over every target column; higher is better.
pub fn neg_mean_squared_error(y_true: ArrayView2<f64>, y_pred: ArrayView2<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let diff = &y_true - &y_pred;
    -diff.iter().map(|d| d * d).sum::<f64>() / diff.len() as f64
}
