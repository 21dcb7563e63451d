use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_training_shapes, FittedRegressor, Regressor};
use crate::error::{PipelineError, PipelineResult};
use crate::linalg_backends::{solve_symmetric, LinAlgBackendProvider};

/// L2-regularised multi-output linear regression with an unpenalised intercept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    pub alpha: f64,
}

impl RidgeRegressor {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

/// Closed-form ridge solution: `prediction = x . coefficients + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedRidge {
    /// Shape: (n_features, n_targets)
    coefficients: Array2<f64>,
    /// Shape: (n_targets)
    intercept: Array1<f64>,
    alpha: f64,
}

impl FittedRidge {
    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> &Array1<f64> {
        &self.intercept
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Regressor for RidgeRegressor {
    type Fitted = FittedRidge;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> PipelineResult<FittedRidge> {
        check_training_shapes(x, y)?;
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "ridge alpha must be finite and non-negative, got {}",
                self.alpha
            )));
        }
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or(PipelineError::InsufficientSamples { found: 0, required: 1 })?;
        let y_mean = y
            .mean_axis(Axis(0))
            .ok_or(PipelineError::InsufficientSamples { found: 0, required: 1 })?;
        let x_centered = &x - &x_mean;
        let y_centered = &y - &y_mean;

        let mut gram = x_centered.t().dot(&x_centered);
        gram.diag_mut().mapv_inplace(|v| v + self.alpha);
        let rhs = x_centered.t().dot(&y_centered);
        let coefficients = solve_symmetric(&LinAlgBackendProvider::new(), &gram, &rhs)?;
        let intercept = &y_mean - &x_mean.dot(&coefficients);

        Ok(FittedRidge {
            coefficients,
            intercept,
            alpha: self.alpha,
        })
    }
}

impl FittedRegressor for FittedRidge {
    fn input_width(&self) -> usize {
        self.coefficients.nrows()
    }

    fn output_width(&self) -> usize {
        self.coefficients.ncols()
    }

    fn predict(&self, x: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        if x.ncols() != self.input_width() {
            return Err(PipelineError::shape("ridge predictor", self.input_width(), x.ncols()));
        }
        Ok(x.dot(&self.coefficients) + &self.intercept)
    }
}
