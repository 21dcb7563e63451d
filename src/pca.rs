// Principal component analysis (PCA) of the VIP-selected wavelength subset

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use log::{debug, info, warn};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::linalg_backends::{backend_error, BackendQR, BackendSVD, LinAlgBackendProvider};

/// How the principal axes are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PcaSolver {
    /// Thin SVD of the centred data.
    #[default]
    Full,
    /// Randomized range finder (Halko et al.) followed by an SVD of the small
    /// projected matrix. `n_oversamples == 0` picks an adaptive default.
    Randomized {
        n_oversamples: usize,
        n_power_iterations: usize,
        seed: u64,
    },
}

/// Linear PCA model.
///
/// Data is mean-centred but not scaled (inputs are already SNV-normalised).
/// Projection is `(x - mean) . components^T`, and the same [`PCA::transform`]
/// serves fitting, export verification and replay.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PCA {
    /// Mean vector of the training subset.
    /// Shape: (n_features)
    mean: Option<Array1<f64>>,
    /// Principal axes as rows, sign fixed so each row's largest-magnitude loading is positive.
    /// Shape: (k_components, n_features)
    components: Option<Array2<f64>>,
    /// Variance captured by each component, `s^2 / (n - 1)`.
    /// Shape: (k_components)
    explained_variance: Option<Array1<f64>>,
    /// `explained_variance` divided by the total variance of the centred data.
    /// Shape: (k_components)
    explained_variance_ratio: Option<Array1<f64>>,
}

impl PCA {
    /// Creates an empty, unfitted model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a model from exported parameters.
    ///
    /// * `mean` - shape (d_features)
    /// * `components` - shape (k_components, d_features)
    ///
    /// # Errors
    /// Returns an error if the component width differs from the mean length or
    /// any value is not finite.
    pub fn with_model(mean: Array1<f64>, components: Array2<f64>) -> PipelineResult<Self> {
        if components.ncols() != mean.len() {
            return Err(PipelineError::shape(
                "PCA components",
                mean.len(),
                components.ncols(),
            ));
        }
        if mean.iter().chain(components.iter()).any(|v| !v.is_finite()) {
            return Err(PipelineError::NonFinite("PCA parameters".to_string()));
        }
        Ok(Self {
            mean: Some(mean),
            components: Some(components),
            explained_variance: None,
            explained_variance_ratio: None,
        })
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance.as_ref()
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.explained_variance_ratio.as_ref()
    }

    /// Number of retained components (0 when unfitted).
    pub fn n_components(&self) -> usize {
        self.components.as_ref().map_or(0, |c| c.nrows())
    }

    /// Input width the model expects, if fitted.
    pub fn n_features(&self) -> Option<usize> {
        self.mean.as_ref().map(|m| m.len())
    }

    /// Fits the model on `x` (n_samples x n_features) and returns the scores of `x`.
    ///
    /// The retained component count is `min(n_components_requested, n_samples, n_features)`;
    /// the caller reads the actual count back through [`PCA::n_components`].
    ///
    /// # Errors
    /// Returns an error if fewer than 2 samples or no features are given, if
    /// `n_components_requested` is 0, or if a decomposition fails.
    pub fn fit(
        &mut self,
        x: ArrayView2<f64>,
        n_components_requested: usize,
        solver: &PcaSolver,
    ) -> PipelineResult<Array2<f64>> {
        let (n_samples, n_features) = x.dim();
        if n_samples < 2 {
            return Err(PipelineError::InsufficientSamples {
                found: n_samples,
                required: 2,
            });
        }
        if n_features == 0 {
            return Err(PipelineError::InvalidConfig(
                "PCA input has zero features".to_string(),
            ));
        }
        if n_components_requested == 0 {
            return Err(PipelineError::InvalidConfig(
                "number of PCA components must be greater than 0".to_string(),
            ));
        }

        let k = n_components_requested.min(n_samples).min(n_features);
        if k < n_components_requested {
            warn!(
                "Requested {} PCA components; clamped to {} for {} samples x {} features.",
                n_components_requested, k, n_samples, n_features
            );
        }

        let mean_vector = x
            .mean_axis(Axis(0))
            .ok_or(PipelineError::InsufficientSamples {
                found: 0,
                required: 2,
            })?;
        let centered = &x - &mean_vector;
        let total_variance = centered.iter().map(|v| v * v).sum::<f64>() / (n_samples - 1) as f64;

        let backend = LinAlgBackendProvider::new();
        let (mut components, singular_values) = match solver {
            PcaSolver::Full => full_axes(&backend, centered, k)?,
            PcaSolver::Randomized {
                n_oversamples,
                n_power_iterations,
                seed,
            } => randomized_axes(
                &backend,
                centered,
                k,
                *n_oversamples,
                *n_power_iterations,
                *seed,
            )?,
        };
        flip_component_signs(&mut components);
        // Row-major, same as a model rebuilt from exported rows.
        let components = components.as_standard_layout().into_owned();

        let explained_variance = singular_values.mapv(|s_val| s_val * s_val / (n_samples - 1) as f64);
        let explained_variance_ratio = if total_variance > 0.0 {
            explained_variance.mapv(|v| v / total_variance)
        } else {
            Array1::zeros(explained_variance.len())
        };
        debug!("PCA explained variance ratio: {:?}", explained_variance_ratio);
        info!(
            "PCA fitted: {} components on {} samples x {} features, {:.4} of variance retained.",
            components.nrows(),
            n_samples,
            n_features,
            explained_variance_ratio.sum()
        );

        self.mean = Some(mean_vector);
        self.components = Some(components);
        self.explained_variance = Some(explained_variance);
        self.explained_variance_ratio = Some(explained_variance_ratio);

        self.transform(x)
    }

    /// Projects `x` (m_samples x d_features) onto the principal axes.
    ///
    /// # Errors
    /// Returns [`PipelineError::ShapeMismatch`] if the width of `x` differs from
    /// the fitted mean length; this is never truncated or padded.
    pub fn transform(&self, x: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        let mean_vector = self.mean.as_ref().ok_or(PipelineError::NotFitted("PCA"))?;
        let components = self
            .components
            .as_ref()
            .ok_or(PipelineError::NotFitted("PCA"))?;
        if x.ncols() != mean_vector.len() {
            return Err(PipelineError::shape("PCA projection", mean_vector.len(), x.ncols()));
        }
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, components.nrows())));
        }
        let centered = &x - mean_vector;
        Ok(centered.dot(&components.t()))
    }

    /// Projects a single spectrum subset through the same path as [`PCA::transform`].
    pub fn project_row(&self, row: ArrayView1<f64>) -> PipelineResult<Array1<f64>> {
        let scores = self.transform(row.insert_axis(Axis(0)))?;
        Ok(scores.row(0).to_owned())
    }
}

/// First `k` right singular vectors (as rows) and singular values of `centered`.
fn full_axes(
    backend: &LinAlgBackendProvider,
    centered: Array2<f64>,
    k: usize,
) -> PipelineResult<(Array2<f64>, Array1<f64>)> {
    let svd = backend
        .svd_into(centered, false, true)
        .map_err(|e| backend_error("SVD of centred data failed", e))?;
    let vt = svd
        .vt
        .ok_or_else(|| PipelineError::Linalg("SVD did not return V^T".to_string()))?;
    let k_eff = k.min(vt.nrows()).min(svd.s.len());
    Ok((
        vt.slice(s![..k_eff, ..]).to_owned(),
        svd.s.slice(s![..k_eff]).to_owned(),
    ))
}

// Adaptive oversampling bounds for the randomized sketch (Halko et al.).
const ADAPTIVE_OVERSAMPLES_LOWER: usize = 5;
const ADAPTIVE_OVERSAMPLES_UPPER: usize = 20;
const MINIMUM_OVERSAMPLES: usize = 4;

/// Randomized estimate of the first `k` principal axes (as rows) and singular values.
fn randomized_axes(
    backend: &LinAlgBackendProvider,
    centered: Array2<f64>,
    k: usize,
    n_oversamples: usize,
    n_power_iterations: usize,
    seed: u64,
) -> PipelineResult<(Array2<f64>, Array1<f64>)> {
    let (n_samples, n_features) = centered.dim();
    let max_rank = n_samples.min(n_features);

    let oversamples = if n_oversamples == 0 {
        ((k as f64 * 0.1).ceil() as usize).clamp(ADAPTIVE_OVERSAMPLES_LOWER, ADAPTIVE_OVERSAMPLES_UPPER)
    } else {
        n_oversamples.max(MINIMUM_OVERSAMPLES)
    };
    let sketch_width = (k + oversamples).min(max_rank).max(k.min(max_rank)).max(1);
    debug!(
        "Randomized PCA sketch width {} ({} oversamples, {} power iterations).",
        sketch_width, oversamples, n_power_iterations
    );

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| PipelineError::Linalg(format!("failed to build sampling distribution: {e}")))?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let qr = |m: &Array2<f64>, what: &str| {
        backend
            .qr_q_factor(m)
            .map_err(|e| backend_error(&format!("QR decomposition of {what} failed"), e))
    };

    // Range of A (tall) or of A^T (wide), whichever is smaller to sketch.
    let tall = n_features <= n_samples;
    let (axes, singular_values) = if tall {
        let omega = Array2::from_shape_fn((n_features, sketch_width), |_| rng.sample(normal));
        let mut basis = qr(&centered.dot(&omega), "initial sketch")?;
        for _ in 0..n_power_iterations {
            let w = qr(&centered.t().dot(&basis), "power iteration (A^T Q)")?;
            basis = qr(&centered.dot(&w), "power iteration (A W)")?;
        }
        let projected = basis.t().dot(&centered);
        let svd = backend
            .svd_into(projected, false, true)
            .map_err(|e| backend_error("SVD of projected sketch failed", e))?;
        let vt = svd
            .vt
            .ok_or_else(|| PipelineError::Linalg("SVD did not return V^T".to_string()))?;
        (vt, svd.s)
    } else {
        let omega = Array2::from_shape_fn((n_samples, sketch_width), |_| rng.sample(normal));
        let mut basis = qr(&centered.t().dot(&omega), "initial sketch")?;
        for _ in 0..n_power_iterations {
            let w = qr(&centered.dot(&basis), "power iteration (A Q)")?;
            basis = qr(&centered.t().dot(&w), "power iteration (A^T W)")?;
        }
        let projected = centered.dot(&basis).t().to_owned();
        let svd = backend
            .svd_into(projected, true, false)
            .map_err(|e| backend_error("SVD of projected sketch failed", e))?;
        let u = svd
            .u
            .ok_or_else(|| PipelineError::Linalg("SVD did not return U".to_string()))?;
        (basis.dot(&u).t().to_owned(), svd.s)
    };

    let k_eff = k.min(axes.nrows()).min(singular_values.len());
    let mut components = axes.slice(s![..k_eff, ..]).to_owned();
    for mut row in components.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 1e-9 {
            row.mapv_inplace(|v| v / norm);
        } else {
            row.fill(0.0);
        }
    }
    Ok((components, singular_values.slice(s![..k_eff]).to_owned()))
}

/// Makes the largest-magnitude loading of each component positive.
fn flip_component_signs(components: &mut Array2<f64>) {
    for mut row in components.rows_mut() {
        let pivot = row
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            row.mapv_inplace(|v| -v);
        }
    }
}
