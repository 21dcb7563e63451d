//! Variable Importance in Projection (VIP) wavelength selection.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use log::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pls::{clamp_pls_components, fit_pls, PlsDecomposition};

/// Added to denominators so degenerate components or weight columns score zero
/// instead of dividing by zero.
pub const VIP_EPSILON: f64 = 1e-12;

/// Supervised selector that keeps the `top_k` wavelengths with the highest
/// VIP score of a multi-output PLS fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VipSelector {
    pub top_k: usize,
    pub n_pls_components: usize,
}

/// Result of [`VipSelector::fit_select`].
#[derive(Debug, Clone)]
pub struct VipSelection {
    /// Selected column indices, ascending by original position.
    pub indices: Vec<usize>,
    /// VIP score of every input column (not only the selected ones).
    pub scores: Array1<f64>,
    /// PLS component count after clamping.
    pub n_pls_components_used: usize,
}

impl VipSelector {
    pub fn new(top_k: usize, n_pls_components: usize) -> Self {
        Self {
            top_k,
            n_pls_components,
        }
    }

    /// Fits PLS on `(x_normalized, y_scaled)` and returns the selected index set.
    ///
    /// Over-large `top_k` and component requests are clamped, never rejected.
    ///
    /// # Errors
    /// Returns an error if `top_k` is zero or the two matrices have different
    /// row counts.
    pub fn fit_select(
        &self,
        x_normalized: ArrayView2<f64>,
        y_scaled: ArrayView2<f64>,
    ) -> PipelineResult<VipSelection> {
        if self.top_k == 0 {
            return Err(PipelineError::InvalidConfig(
                "VIP top_k must be at least 1".to_string(),
            ));
        }
        if x_normalized.nrows() != y_scaled.nrows() {
            return Err(PipelineError::RowCountMismatch {
                spectra: x_normalized.nrows(),
                properties: y_scaled.nrows(),
            });
        }
        let (n_samples, n_features) = x_normalized.dim();

        let n_components = clamp_pls_components(self.n_pls_components, n_samples, n_features);
        if n_components != self.n_pls_components {
            warn!(
                "Requested {} PLS components; clamped to {} for {} samples x {} features.",
                self.n_pls_components, n_components, n_samples, n_features
            );
        }

        let pls = fit_pls(x_normalized, y_scaled, n_components);
        debug!(
            "PLS extracted {} of {} components.",
            pls.n_extracted, n_components
        );
        let scores = compute_vip_scores(&pls);

        let k = self.top_k.min(n_features);
        if k < self.top_k {
            warn!(
                "Requested top_k={} exceeds {} available wavelengths; keeping all of them.",
                self.top_k, n_features
            );
        }
        let indices = select_top_k(scores.view(), k);
        info!(
            "VIP selected {} of {} wavelengths using {} PLS components.",
            indices.len(),
            n_features,
            n_components
        );

        Ok(VipSelection {
            indices,
            scores,
            n_pls_components_used: n_components,
        })
    }
}

/// Per-feature VIP scores:
/// `sqrt(p * sum_c(W_norm[j, c]^2 * ssy[c]))` with
/// `ssy[c] = sum(T[:, c]^2) * sum(Q[:, c]^2)` normalised to sum to one.
pub fn compute_vip_scores(pls: &PlsDecomposition) -> Array1<f64> {
    let n_features = pls.x_weights.nrows();

    let t_energy = pls.x_scores.map_axis(Axis(0), |c| c.dot(&c));
    let q_energy = pls.y_loadings.map_axis(Axis(0), |c| c.dot(&c));
    let ssy = &t_energy * &q_energy;
    let ssy = &ssy / (ssy.sum() + VIP_EPSILON);

    let mut w_norm: Array2<f64> = pls.x_weights.clone();
    for mut column in w_norm.axis_iter_mut(Axis(1)) {
        let norm = column.dot(&column).sqrt() + VIP_EPSILON;
        column.mapv_inplace(|w| w / norm);
    }

    let weighted = w_norm.mapv(|w| w * w).dot(&ssy);
    weighted.mapv(|s| (n_features as f64 * s).sqrt())
}

/// Indices of the `k` highest scores, returned ascending.
///
/// Ranking is by descending score; among bit-identical scores the higher
/// column index ranks first.
pub fn select_top_k(scores: ArrayView1<f64>, k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(b.cmp(&a)));
    order.truncate(k);
    order.sort_unstable();
    order
}

/// Gathers `indices` from every row of `data`, in the given order.
///
/// # Errors
/// Returns a shape mismatch if any index is outside the row width.
pub fn gather_columns(data: ArrayView2<f64>, indices: &[usize]) -> PipelineResult<Array2<f64>> {
    if let Some(&max) = indices.iter().max() {
        if max >= data.ncols() {
            return Err(PipelineError::shape("VIP gather", max + 1, data.ncols()));
        }
    }
    Ok(data.select(Axis(1), indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snv::apply_snv;
    use ndarray::array;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn oversized_top_k_returns_every_column() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let x = Array2::random_using((12, 7), Uniform::new(0.0, 1.0), &mut rng);
        let y = Array2::random_using((12, 2), Uniform::new(-1.0, 1.0), &mut rng);
        let selection = VipSelector::new(50, 10)
            .fit_select(apply_snv(x.view()).view(), y.view())
            .unwrap();
        assert_eq!(selection.indices, (0..7).collect::<Vec<_>>());
        assert_eq!(selection.n_pls_components_used, 7);
    }

    #[test]
    fn indices_are_ascending_unique_and_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let x = Array2::random_using((30, 40), Uniform::new(0.0, 1.0), &mut rng);
        let y = Array2::random_using((30, 3), Uniform::new(-1.0, 1.0), &mut rng);
        let selection = VipSelector::new(10, 5).fit_select(x.view(), y.view()).unwrap();
        assert_eq!(selection.indices.len(), 10);
        assert!(selection.indices.windows(2).all(|w| w[0] < w[1]));
        assert!(selection.indices.iter().all(|&i| i < 40));
        assert_eq!(selection.scores.len(), 40);
    }

    #[test]
    fn informative_wavelengths_score_highest() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let x = Array2::random_using((60, 25), Uniform::new(-1.0, 1.0), &mut rng);
        let mut y = Array2::<f64>::zeros((60, 1));
        for i in 0..60 {
            y[[i, 0]] = 4.0 * x[[i, 3]] - 3.0 * x[[i, 17]];
        }
        let selection = VipSelector::new(2, 3).fit_select(x.view(), y.view()).unwrap();
        assert_eq!(selection.indices, vec![3, 17]);
    }

    #[test]
    fn degenerate_pls_yields_finite_zero_scores() {
        let x = array![[1.0, 2.0, 3.0], [2.0, 3.0, 1.0], [3.0, 1.0, 2.0]];
        let y = array![[5.0], [5.0], [5.0]];
        let selection = VipSelector::new(2, 2).fit_select(x.view(), y.view()).unwrap();
        assert!(selection.scores.iter().all(|s| *s == 0.0));
        assert_eq!(selection.indices.len(), 2);
    }

    #[test]
    fn ties_prefer_higher_column_index() {
        let scores = array![1.0, 2.0, 2.0, 0.5, 2.0];
        assert_eq!(select_top_k(scores.view(), 2), vec![2, 4]);
        assert_eq!(select_top_k(scores.view(), 3), vec![1, 2, 4]);
    }

    #[test]
    fn vip_scores_average_to_unit_square() {
        // With a unit-sum ssy and unit-norm weight columns, mean(vip^2) == 1.
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let x = Array2::random_using((25, 15), Uniform::new(0.0, 1.0), &mut rng);
        let y = Array2::random_using((25, 2), Uniform::new(0.0, 1.0), &mut rng);
        let pls = fit_pls(x.view(), y.view(), 3);
        let scores = compute_vip_scores(&pls);
        let mean_sq = scores.mapv(|s| s * s).mean().unwrap();
        approx::assert_abs_diff_eq!(mean_sq, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn gather_keeps_index_order_and_checks_bounds() {
        let data = array![[0.0, 1.0, 2.0, 3.0], [4.0, 5.0, 6.0, 7.0]];
        let gathered = gather_columns(data.view(), &[1, 3]).unwrap();
        assert_eq!(gathered, array![[1.0, 3.0], [5.0, 7.0]]);
        let err = gather_columns(data.view(), &[4]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }
}
