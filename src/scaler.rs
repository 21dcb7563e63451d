use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Per-column standardisation (mean 0, unit population variance).
///
/// Used for the target properties, so the predictor trains on a well
/// conditioned space and results can be mapped back to physical units, and
/// inside the kernel predictor for its input features.
///
/// Columns whose standard deviation is numerically zero keep a scale of `1.0`,
/// so they are centred but never divided by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Learns per-column mean and scale from `data` (shape `(n_samples, n_columns)`).
    ///
    /// # Errors
    /// Returns an error if `data` has no rows.
    pub fn fit(data: ArrayView2<f64>) -> PipelineResult<Self> {
        if data.nrows() == 0 {
            return Err(PipelineError::InsufficientSamples {
                found: 0,
                required: 1,
            });
        }
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::InsufficientSamples {
                found: 0,
                required: 1,
            })?;
        let zero_threshold = 10.0 * f64::EPSILON;
        let scale = data
            .map_axis(Axis(0), |column| column.std(0.0))
            .mapv(|s| if s < zero_threshold { 1.0 } else { s });
        Ok(Self { mean, scale })
    }

    /// Fits on `data` and returns the standardised copy alongside the scaler.
    pub fn fit_transform(data: ArrayView2<f64>) -> PipelineResult<(Array2<f64>, Self)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaled, scaler))
    }

    /// Rebuilds a scaler from exported parameters.
    pub fn from_params(mean: Vec<f64>, scale: Vec<f64>) -> PipelineResult<Self> {
        if mean.len() != scale.len() {
            return Err(PipelineError::shape("standard scaler", mean.len(), scale.len()));
        }
        if scale.iter().any(|s| !s.is_finite() || *s == 0.0) || mean.iter().any(|m| !m.is_finite()) {
            return Err(PipelineError::NonFinite(
                "standard scaler parameters (scale must be finite and non-zero)".to_string(),
            ));
        }
        Ok(Self {
            mean: Array1::from(mean),
            scale: Array1::from(scale),
        })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// `(x - mean) / scale` column-wise.
    pub fn transform(&self, data: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        self.check_width(data.ncols())?;
        Ok((&data - &self.mean) / &self.scale)
    }

    /// `y * scale + mean` column-wise; maps standardised values back to original units.
    pub fn inverse_transform(&self, data: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        self.check_width(data.ncols())?;
        Ok(&data * &self.scale + &self.mean)
    }

    fn check_width(&self, found: usize) -> PipelineResult<()> {
        if found != self.width() {
            return Err(PipelineError::shape("standard scaler", self.width(), found));
        }
        Ok(())
    }
}
