//! Multi-output partial least squares (PLS2) via NIPALS.
//!
//! The decomposition follows the usual chemometrics recipe: X and Y are centred
//! and scaled per column (sample standard deviation, zero deviations replaced
//! by one), each latent component is extracted with a power-method inner loop,
//! and both blocks are deflated in regression mode.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use log::{debug, warn};

/// Iteration cap of the inner power method.
pub const PLS_MAX_ITER: usize = 500;
/// Convergence tolerance on the squared change of the X weights.
pub const PLS_TOL: f64 = 1e-6;

/// Fitted PLS quantities used by variable-importance scoring.
#[derive(Debug, Clone)]
pub struct PlsDecomposition {
    /// Sample scores T. Shape: (n_samples, n_components)
    pub x_scores: Array2<f64>,
    /// Feature weights W. Shape: (n_features, n_components)
    pub x_weights: Array2<f64>,
    /// Target loadings Q. Shape: (n_targets, n_components)
    pub y_loadings: Array2<f64>,
    /// Number of components actually extracted before the residuals vanished.
    pub n_extracted: usize,
}

impl PlsDecomposition {
    /// Width of the score/weight/loading matrices (the requested component count).
    pub fn n_components(&self) -> usize {
        self.x_weights.ncols()
    }
}

/// Clamps a requested PLS component count to what the data can support:
/// `max(1, min(requested, n_samples - 1, n_features))`.
pub fn clamp_pls_components(requested: usize, n_samples: usize, n_features: usize) -> usize {
    requested
        .min(n_samples.saturating_sub(1))
        .min(n_features)
        .max(1)
}

/// Fits PLS2 of `x` (n_samples x n_features) against `y` (n_samples x n_targets)
/// with exactly `n_components` latent components (callers clamp beforehand).
///
/// Components that cannot be extracted because a residual has become
/// numerically zero are left as zero columns; the function never fails.
pub fn fit_pls(x: ArrayView2<f64>, y: ArrayView2<f64>, n_components: usize) -> PlsDecomposition {
    let n_samples = x.nrows();
    let n_features = x.ncols();
    let n_targets = y.ncols();

    let mut x_k = center_scale(x);
    let mut y_k = center_scale(y);

    let mut x_scores = Array2::<f64>::zeros((n_samples, n_components));
    let mut x_weights = Array2::<f64>::zeros((n_features, n_components));
    let mut y_loadings = Array2::<f64>::zeros((n_targets, n_components));

    let y_eps = f64::EPSILON;
    let mut n_extracted = 0;

    for k in 0..n_components {
        // Zero out target columns that are already fully explained.
        for mut column in y_k.columns_mut() {
            if column.iter().all(|v| v.abs() < 10.0 * y_eps) {
                column.fill(0.0);
            }
        }
        let y_gram_diagonal_is_zero = y_k
            .columns()
            .into_iter()
            .all(|column| column.dot(&column) < y_eps);
        if y_gram_diagonal_is_zero {
            warn!(
                "Y residual is constant at PLS component {}; remaining components left at zero.",
                k
            );
            break;
        }

        let Some((mut w, mut c, n_iter)) = first_singular_vectors(x_k.view(), y_k.view()) else {
            warn!("Y residual is constant at PLS component {}; stopping early.", k);
            break;
        };
        debug!("PLS component {} converged after {} iterations.", k, n_iter);

        flip_sign_by_largest(&mut w, &mut c);

        let t = x_k.dot(&w);
        let tt = t.dot(&t);
        if !(tt >= f64::EPSILON) {
            warn!(
                "X scores vanished at PLS component {}; remaining components left at zero.",
                k
            );
            break;
        }

        let p = x_k.t().dot(&t) / tt;
        x_k -= &outer(t.view(), p.view());
        let q = y_k.t().dot(&t) / tt;
        y_k -= &outer(t.view(), q.view());

        x_scores.column_mut(k).assign(&t);
        x_weights.column_mut(k).assign(&w);
        y_loadings.column_mut(k).assign(&q);
        n_extracted += 1;
    }

    PlsDecomposition {
        x_scores,
        x_weights,
        y_loadings,
        n_extracted,
    }
}

/// Power method for the first left/right singular vectors of `X^T Y`.
/// Returns `None` when every column of `y` is zero.
fn first_singular_vectors(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
) -> Option<(Array1<f64>, Array1<f64>, usize)> {
    let eps = f64::EPSILON;
    let mut y_score = y
        .columns()
        .into_iter()
        .find(|column| column.iter().any(|v| v.abs() > eps))?
        .to_owned();

    let mut x_weights_old: Option<Array1<f64>> = None;
    let mut x_weights = Array1::<f64>::zeros(x.ncols());
    let mut y_weights = Array1::<f64>::zeros(y.ncols());
    let mut n_iter = 0;

    for i in 0..PLS_MAX_ITER {
        n_iter = i + 1;
        x_weights = x.t().dot(&y_score) / y_score.dot(&y_score);
        let norm = x_weights.dot(&x_weights).sqrt() + eps;
        x_weights.mapv_inplace(|v| v / norm);

        let x_score = x.dot(&x_weights);
        y_weights = y.t().dot(&x_score) / x_score.dot(&x_score);
        y_score = y.dot(&y_weights) / (y_weights.dot(&y_weights) + eps);

        let converged = match &x_weights_old {
            Some(old) => {
                let diff = &x_weights - old;
                diff.dot(&diff) < PLS_TOL
            }
            None => false,
        };
        if converged || y.ncols() == 1 {
            break;
        }
        x_weights_old = Some(x_weights.clone());
    }
    Some((x_weights, y_weights, n_iter))
}

/// Makes the largest-magnitude entry of `u` positive, flipping `v` along with it.
fn flip_sign_by_largest(u: &mut Array1<f64>, v: &mut Array1<f64>) {
    let mut best_idx = 0;
    let mut best_abs = f64::NEG_INFINITY;
    for (i, val) in u.iter().enumerate() {
        if val.abs() > best_abs {
            best_abs = val.abs();
            best_idx = i;
        }
    }
    if u.get(best_idx).is_some_and(|val| *val < 0.0) {
        u.mapv_inplace(|x| -x);
        v.mapv_inplace(|x| -x);
    }
}

/// Column-centres and scales by the sample standard deviation (ddof = 1);
/// zero or undefined deviations leave the column unscaled.
fn center_scale(data: ArrayView2<f64>) -> Array2<f64> {
    let mut out = data.to_owned();
    if out.nrows() == 0 {
        return out;
    }
    let ddof = if out.nrows() > 1 { 1.0 } else { 0.0 };
    for mut column in out.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        column.mapv_inplace(|v| v - mean);
        let std = column.std(ddof);
        if std.is_finite() && std != 0.0 {
            column.mapv_inplace(|v| v / std);
        }
    }
    out
}

fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    let column = a.insert_axis(Axis(1));
    let row = b.insert_axis(Axis(0));
    column.dot(&row)
}
