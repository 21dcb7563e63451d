use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{check_training_shapes, FittedRegressor, Regressor};
use crate::error::{PipelineError, PipelineResult};
use crate::linalg_backends::{solve_symmetric, LinAlgBackendProvider};
use crate::scaler::StandardScaler;

/// Width of the RBF kernel `exp(-gamma * |a - b|^2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KernelGamma {
    /// `1 / (n_features * var(X))` over the standardised features.
    #[default]
    Scale,
    /// `1 / n_features`.
    Auto,
    Value(f64),
}

impl KernelGamma {
    fn resolve(&self, x_scaled: ArrayView2<f64>) -> PipelineResult<f64> {
        let n_features = x_scaled.ncols().max(1) as f64;
        let gamma = match *self {
            KernelGamma::Scale => {
                let variance = x_scaled.var(0.0);
                if variance > 0.0 {
                    1.0 / (n_features * variance)
                } else {
                    1.0
                }
            }
            KernelGamma::Auto => 1.0 / n_features,
            KernelGamma::Value(g) => g,
        };
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "RBF gamma must be finite and positive, got {gamma}"
            )));
        }
        Ok(gamma)
    }
}

/// Kernel ridge regression with an RBF kernel.
///
/// Input features are standardised first, mirroring the feature scaler that
/// precedes an SVR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelRidgeRegressor {
    pub alpha: f64,
    pub gamma: KernelGamma,
}

impl KernelRidgeRegressor {
    pub fn new(alpha: f64, gamma: KernelGamma) -> Self {
        Self { alpha, gamma }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedKernelRidge {
    feature_scaler: StandardScaler,
    /// Standardised training inputs. Shape: (n_train, n_features)
    support: Array2<f64>,
    /// Shape: (n_train, n_targets)
    dual_coef: Array2<f64>,
    /// Shape: (n_targets)
    y_mean: Array1<f64>,
    gamma: f64,
    alpha: f64,
}

impl FittedKernelRidge {
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Regressor for KernelRidgeRegressor {
    type Fitted = FittedKernelRidge;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> PipelineResult<FittedKernelRidge> {
        check_training_shapes(x, y)?;
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "kernel ridge alpha must be finite and positive, got {}",
                self.alpha
            )));
        }
        let (support, feature_scaler) = StandardScaler::fit_transform(x)?;
        let gamma = self.gamma.resolve(support.view())?;

        let y_mean = y
            .mean_axis(Axis(0))
            .ok_or(PipelineError::InsufficientSamples { found: 0, required: 1 })?;
        let y_centered = &y - &y_mean;

        let mut kernel = rbf_kernel(support.view(), support.view(), gamma);
        kernel.diag_mut().mapv_inplace(|v| v + self.alpha);
        let dual_coef = solve_symmetric(&LinAlgBackendProvider::new(), &kernel, &y_centered)?;

        Ok(FittedKernelRidge {
            feature_scaler,
            support,
            dual_coef,
            y_mean,
            gamma,
            alpha: self.alpha,
        })
    }
}

impl FittedRegressor for FittedKernelRidge {
    fn input_width(&self) -> usize {
        self.support.ncols()
    }

    fn output_width(&self) -> usize {
        self.dual_coef.ncols()
    }

    fn predict(&self, x: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        if x.ncols() != self.input_width() {
            return Err(PipelineError::shape(
                "kernel ridge predictor",
                self.input_width(),
                x.ncols(),
            ));
        }
        let x_scaled = self.feature_scaler.transform(x)?;
        let kernel = rbf_kernel(x_scaled.view(), self.support.view(), self.gamma);
        Ok(kernel.dot(&self.dual_coef) + &self.y_mean)
    }
}

/// `K[i, j] = exp(-gamma * |a_i - b_j|^2)`, rows computed in parallel.
fn rbf_kernel(a: ArrayView2<f64>, b: ArrayView2<f64>, gamma: f64) -> Array2<f64> {
    let b_norms: Array1<f64> = b.rows().into_iter().map(|r| r.dot(&r)).collect();
    let mut kernel = a.dot(&b.t());
    kernel
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(a.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut k_row, a_row)| {
            let a_norm = a_row.dot(&a_row);
            for (k, b_norm) in k_row.iter_mut().zip(b_norms.iter()) {
                let sq_dist = (a_norm + b_norm - 2.0 * *k).max(0.0);
                *k = (-gamma * sq_dist).exp();
            }
        });
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn kernel_has_unit_diagonal_and_decays_with_distance() {
        let a = array![[0.0, 0.0], [1.0, 0.0], [3.0, 0.0]];
        let k = rbf_kernel(a.view(), a.view(), 0.5);
        for i in 0..3 {
            assert_abs_diff_eq!(k[[i, i]], 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(k[[0, 1]], (-0.5f64).exp(), epsilon = 1e-12);
        assert!(k[[0, 2]] < k[[0, 1]]);
    }

    #[test]
    fn fits_smooth_nonlinear_target() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 / 39.0 * 6.0);
        let y = x.mapv(f64::sin);
        let fitted = KernelRidgeRegressor::new(1e-4, KernelGamma::Value(2.0))
            .fit(x.view(), y.view())
            .unwrap();
        let pred = fitted.predict(x.view()).unwrap();
        for (a, b) in pred.iter().zip(y.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-2);
        }
    }

    #[test]
    fn gamma_rules() {
        let x = array![[1.0, -1.0], [-1.0, 1.0]];
        assert_abs_diff_eq!(KernelGamma::Auto.resolve(x.view()).unwrap(), 0.5);
        assert_abs_diff_eq!(KernelGamma::Scale.resolve(x.view()).unwrap(), 0.5);
        assert!(KernelGamma::Value(0.0).resolve(x.view()).is_err());
    }

    #[test]
    fn prediction_width_is_checked() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0]];
        let y = array![[1.0], [2.0], [3.0]];
        let fitted = KernelRidgeRegressor::new(1.0, KernelGamma::Scale)
            .fit(x.view(), y.view())
            .unwrap();
        assert_eq!(fitted.output_width(), 1);
        assert!(fitted.predict(array![[1.0, 2.0, 3.0]].view()).unwrap_err().is_shape_mismatch());
    }
}
