//! Swappable predictors fed by the preprocessing chain.
//!
//! A [`Regressor`] is an unfitted configuration; fitting yields a
//! [`FittedRegressor`]. Targets are always in the standardised property space,
//! so inverting through the property scaler is the caller's job.

pub mod kernel_ridge;
pub mod ridge;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::artifact::write_atomic;
use crate::error::{PipelineError, PipelineResult};
pub use kernel_ridge::{FittedKernelRidge, KernelGamma, KernelRidgeRegressor};
pub use ridge::{FittedRidge, RidgeRegressor};

pub trait Regressor {
    type Fitted: FittedRegressor;

    /// Fits on `x` (n_samples x n_features) against `y` (n_samples x n_targets).
    fn fit(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> PipelineResult<Self::Fitted>;
}

pub trait FittedRegressor {
    fn input_width(&self) -> usize;
    fn output_width(&self) -> usize;
    /// Predicts standardised targets. Fails with a shape mismatch on a wrong input width.
    fn predict(&self, x: ArrayView2<f64>) -> PipelineResult<Array2<f64>>;
}

/// Unfitted predictor choice, one variant per implementation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PredictorSpec {
    Ridge(RidgeRegressor),
    KernelRidge(KernelRidgeRegressor),
}

impl PredictorSpec {
    /// Short name recorded as `model_type` in the artifact.
    pub fn model_type(&self) -> &'static str {
        match self {
            PredictorSpec::Ridge(_) => "ridge",
            PredictorSpec::KernelRidge(_) => "kernel_ridge",
        }
    }
}

impl Regressor for PredictorSpec {
    type Fitted = TrainedPredictor;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> PipelineResult<TrainedPredictor> {
        Ok(match self {
            PredictorSpec::Ridge(r) => TrainedPredictor::Ridge(r.fit(x, y)?),
            PredictorSpec::KernelRidge(r) => TrainedPredictor::KernelRidge(r.fit(x, y)?),
        })
    }
}

/// A fitted predictor of any kind, persisted next to the JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainedPredictor {
    Ridge(FittedRidge),
    KernelRidge(FittedKernelRidge),
    /// One single-output model per property column, in property order.
    PerProperty(Vec<TrainedPredictor>),
}

impl TrainedPredictor {
    /// Stacks independently tuned models column by column.
    pub fn per_property(models: Vec<TrainedPredictor>) -> PipelineResult<Self> {
        let first = models.first().ok_or_else(|| {
            PipelineError::InvalidConfig("per-property predictor needs at least one model".to_string())
        })?;
        let width = first.input_width();
        if let Some(model) = models.iter().find(|m| m.input_width() != width) {
            return Err(PipelineError::shape("per-property model input", width, model.input_width()));
        }
        Ok(TrainedPredictor::PerProperty(models))
    }

    pub fn model_type(&self) -> &'static str {
        match self {
            TrainedPredictor::Ridge(_) => "ridge",
            TrainedPredictor::KernelRidge(_) => "kernel_ridge",
            TrainedPredictor::PerProperty(models) => {
                models.first().map_or("per_property", |m| m.model_type())
            }
        }
    }

    /// Saves the predictor with bincode; the write is atomic.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let path = path.as_ref();
        write_atomic(path, |writer| {
            bincode::serde::encode_into_std_write(self, writer, bincode::config::standard())?;
            Ok(())
        })?;
        info!("Saved {} predictor to {}.", self.model_type(), path.display());
        Ok(())
    }

    /// Loads a predictor written by [`TrainedPredictor::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let predictor: TrainedPredictor =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(predictor)
    }
}

impl FittedRegressor for TrainedPredictor {
    fn input_width(&self) -> usize {
        match self {
            TrainedPredictor::Ridge(m) => m.input_width(),
            TrainedPredictor::KernelRidge(m) => m.input_width(),
            TrainedPredictor::PerProperty(models) => models.first().map_or(0, |m| m.input_width()),
        }
    }

    fn output_width(&self) -> usize {
        match self {
            TrainedPredictor::Ridge(m) => m.output_width(),
            TrainedPredictor::KernelRidge(m) => m.output_width(),
            TrainedPredictor::PerProperty(models) => models.iter().map(|m| m.output_width()).sum(),
        }
    }

    fn predict(&self, x: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        match self {
            TrainedPredictor::Ridge(m) => m.predict(x),
            TrainedPredictor::KernelRidge(m) => m.predict(x),
            TrainedPredictor::PerProperty(models) => {
                let columns = models
                    .iter()
                    .map(|m| m.predict(x))
                    .collect::<PipelineResult<Vec<_>>>()?;
                let views: Vec<_> = columns.iter().map(|c| c.view()).collect();
                concatenate(Axis(1), &views).map_err(|e| {
                    PipelineError::InvalidArtifact(format!("cannot stack per-property predictions: {e}"))
                })
            }
        }
    }
}

pub(crate) fn check_training_shapes(x: ArrayView2<f64>, y: ArrayView2<f64>) -> PipelineResult<()> {
    if x.nrows() != y.nrows() {
        return Err(PipelineError::RowCountMismatch {
            spectra: x.nrows(),
            properties: y.nrows(),
        });
    }
    if x.nrows() == 0 {
        return Err(PipelineError::InsufficientSamples { found: 0, required: 1 });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s};
    use tempfile::tempdir;

    #[test]
    fn saved_predictor_reloads_identically() {
        let x = array![[0.1, 0.2], [0.4, -0.3], [0.9, 0.5], [-0.2, 0.8]];
        let y = array![[1.0, 0.0], [0.5, 1.0], [-1.0, 0.3], [0.2, -0.4]];
        let spec = PredictorSpec::KernelRidge(KernelRidgeRegressor::new(0.1, KernelGamma::Scale));
        let predictor = spec.fit(x.view(), y.view()).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("predictor.bin");
        predictor.save(&path).unwrap();
        let loaded = TrainedPredictor::load(&path).unwrap();
        assert_eq!(loaded, predictor);
        assert_eq!(loaded.model_type(), "kernel_ridge");
        let a = predictor.predict(x.view()).unwrap();
        let b = loaded.predict(x.view()).unwrap();
        for (p, q) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 0.0);
        }
    }

    #[test]
    fn per_property_models_stack_their_columns() {
        let x = array![[0.1, 0.2], [0.4, -0.3], [0.9, 0.5], [-0.2, 0.8], [0.3, 0.1]];
        let y = array![[1.0, 0.0], [0.5, 1.0], [-1.0, 0.3], [0.2, -0.4], [0.0, 0.6]];
        let first = PredictorSpec::Ridge(RidgeRegressor::new(0.1))
            .fit(x.view(), y.slice(s![.., 0..1]))
            .unwrap();
        let second = PredictorSpec::Ridge(RidgeRegressor::new(10.0))
            .fit(x.view(), y.slice(s![.., 1..2]))
            .unwrap();
        let stacked = TrainedPredictor::per_property(vec![first.clone(), second.clone()]).unwrap();
        assert_eq!(stacked.input_width(), 2);
        assert_eq!(stacked.output_width(), 2);
        assert_eq!(stacked.model_type(), "ridge");

        let predicted = stacked.predict(x.view()).unwrap();
        assert_eq!(predicted.column(0), first.predict(x.view()).unwrap().column(0));
        assert_eq!(predicted.column(1), second.predict(x.view()).unwrap().column(0));

        let dir = tempdir().unwrap();
        let path = dir.path().join("predictor.bin");
        stacked.save(&path).unwrap();
        assert_eq!(TrainedPredictor::load(&path).unwrap(), stacked);

        assert!(TrainedPredictor::per_property(Vec::new()).is_err());
        let narrow = PredictorSpec::Ridge(RidgeRegressor::new(1.0))
            .fit(x.slice(s![.., 0..1]), y.slice(s![.., 0..1]))
            .unwrap();
        assert!(TrainedPredictor::per_property(vec![first, narrow]).unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn truncated_file_fails_to_decode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictor.bin");
        std::fs::write(&path, [1u8, 2]).unwrap();
        assert!(matches!(
            TrainedPredictor::load(&path),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn mismatched_row_counts_are_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![[1.0]];
        let spec = PredictorSpec::Ridge(RidgeRegressor::new(1.0));
        assert!(matches!(
            spec.fit(x.view(), y.view()),
            Err(PipelineError::RowCountMismatch { .. })
        ));
    }
}
