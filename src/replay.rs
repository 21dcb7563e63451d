//! Inference-side reconstruction of the preprocessing chain from an artifact.
//!
//! The order is fixed: SNV per row, ordered gather of the selected
//! wavelengths, optional PCA projection, predictor, inverse property scaling.

use std::path::Path;

use float_cmp::approx_eq;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::artifact::ArtifactBundle;
use crate::error::{PipelineError, PipelineResult};
use crate::pca::PCA;
use crate::regressor::FittedRegressor;
use crate::scaler::StandardScaler;
use crate::snv::{apply_snv, snv_row};
use crate::vip::gather_columns;

/// SNV, gather and optional projection for a batch of raw spectra.
///
/// Fitting and replay both call this, so they cannot drift apart.
pub fn run_chain(
    spectra: ArrayView2<f64>,
    selected_indices: &[usize],
    pca: Option<&PCA>,
) -> PipelineResult<Array2<f64>> {
    let normalized = apply_snv(spectra);
    let subset = gather_columns(normalized.view(), selected_indices)?;
    match pca {
        Some(model) => model.transform(subset.view()),
        None => Ok(subset),
    }
}

/// Outcome of [`ReplayEngine::verify_parity`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParityReport {
    pub samples_checked: usize,
    pub max_abs_diff: f64,
    /// `(row, column)` of the first value outside the tolerance.
    pub first_mismatch: Option<(usize, usize)>,
}

impl ParityReport {
    pub fn is_consistent(&self) -> bool {
        self.first_mismatch.is_none()
    }
}

pub struct ReplayEngine {
    artifact: ArtifactBundle,
    pca: Option<PCA>,
    property_scaler: StandardScaler,
}

impl ReplayEngine {
    /// Validates `artifact` and prepares the chain it describes.
    pub fn from_artifact(artifact: ArtifactBundle) -> PipelineResult<Self> {
        artifact.validate()?;
        let pca = artifact.pca()?;
        let property_scaler = artifact.property_scaler()?;
        debug!(
            "Replay chain: {} raw wavelengths -> {} selected -> {} features -> {} outputs.",
            artifact.raw_width(),
            artifact.selected_width(),
            artifact.feature_width(),
            artifact.output_width()
        );
        Ok(Self {
            artifact,
            pca,
            property_scaler,
        })
    }

    pub fn load_dir<P: AsRef<Path>>(dir: P) -> PipelineResult<Self> {
        Self::from_artifact(ArtifactBundle::load_dir(dir)?)
    }

    pub fn artifact(&self) -> &ArtifactBundle {
        &self.artifact
    }

    fn check_raw_width(&self, found: usize) -> PipelineResult<()> {
        let expected = self.artifact.raw_width();
        if found != expected {
            return Err(PipelineError::shape("raw spectrum", expected, found));
        }
        Ok(())
    }

    /// Feature vector of one raw spectrum.
    pub fn features_for_spectrum(&self, spectrum: ArrayView1<f64>) -> PipelineResult<Array1<f64>> {
        self.check_raw_width(spectrum.len())?;
        let normalized = snv_row(spectrum);
        let subset = normalized.select(Axis(0), &self.artifact.model_info.selected_feature_indices);
        match &self.pca {
            Some(model) => model.project_row(subset.view()),
            None => Ok(subset),
        }
    }

    /// Feature matrix of a batch of raw spectra (n_samples x raw width).
    pub fn features_for_batch(&self, spectra: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        self.check_raw_width(spectra.ncols())?;
        run_chain(
            spectra,
            &self.artifact.model_info.selected_feature_indices,
            self.pca.as_ref(),
        )
    }

    /// Maps standardised predictions back to physical units.
    pub fn to_physical_units(&self, scaled: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        self.property_scaler.inverse_transform(scaled)
    }

    /// Rejects a predictor whose widths disagree with the artifact.
    pub fn check_predictor<R: FittedRegressor + ?Sized>(&self, predictor: &R) -> PipelineResult<()> {
        if predictor.input_width() != self.artifact.feature_width() {
            return Err(PipelineError::shape(
                "predictor input",
                self.artifact.feature_width(),
                predictor.input_width(),
            ));
        }
        if predictor.output_width() != self.artifact.output_width() {
            return Err(PipelineError::shape(
                "predictor output",
                self.artifact.output_width(),
                predictor.output_width(),
            ));
        }
        Ok(())
    }

    /// Full inference: raw spectra in, properties in physical units out.
    pub fn predict<R: FittedRegressor + ?Sized>(
        &self,
        predictor: &R,
        spectra: ArrayView2<f64>,
    ) -> PipelineResult<Array2<f64>> {
        self.check_predictor(predictor)?;
        let features = self.features_for_batch(spectra)?;
        let scaled = predictor.predict(features.view())?;
        let physical = self.to_physical_units(scaled.view())?;
        info!("Predicted {} properties for {} spectra.", physical.ncols(), physical.nrows());
        Ok(physical)
    }

    /// Replays `spectra` one row at a time and compares against `expected`
    /// features (typically the fit-time output) within `ulps`.
    pub fn verify_parity(
        &self,
        spectra: ArrayView2<f64>,
        expected: ArrayView2<f64>,
        ulps: i64,
    ) -> PipelineResult<ParityReport> {
        if spectra.nrows() != expected.nrows() {
            return Err(PipelineError::RowCountMismatch {
                spectra: spectra.nrows(),
                properties: expected.nrows(),
            });
        }
        if expected.ncols() != self.artifact.feature_width() {
            return Err(PipelineError::shape(
                "parity reference",
                self.artifact.feature_width(),
                expected.ncols(),
            ));
        }
        let mut max_abs_diff = 0.0_f64;
        let mut first_mismatch = None;
        for (i, (spectrum, reference)) in spectra.rows().into_iter().zip(expected.rows()).enumerate() {
            let replayed = self.features_for_spectrum(spectrum)?;
            for (j, (a, b)) in replayed.iter().zip(reference.iter()).enumerate() {
                max_abs_diff = max_abs_diff.max((a - b).abs());
                if first_mismatch.is_none() && !approx_eq!(f64, *a, *b, epsilon = 1e-12, ulps = ulps) {
                    first_mismatch = Some((i, j));
                }
            }
        }
        Ok(ParityReport {
            samples_checked: spectra.nrows(),
            max_abs_diff,
            first_mismatch,
        })
    }
}
