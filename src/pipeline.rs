//! The fit-time preprocessing chain: SNV, VIP selection and PCA.

use log::info;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::artifact::{export, ArtifactBundle, ModelDescriptor};
use crate::dataset::{check_alignment, PropertyMatrix, SpectralMatrix};
use crate::error::{PipelineError, PipelineResult};
use crate::pca::{PcaSolver, PCA};
use crate::replay::run_chain;
use crate::scaler::StandardScaler;
use crate::snv::{apply_snv, SpectrumStats};
use crate::vip::{gather_columns, VipSelection, VipSelector};

/// Sizes and solver choices of the preprocessing chain.
///
/// Requests larger than the data supports are clamped during fitting; read the
/// actual sizes back from the fitted pipeline or the exported artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub vip_top_k: usize,
    pub pls_components: usize,
    pub enable_pca: bool,
    pub pca_components: usize,
    pub pca_solver: PcaSolver,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vip_top_k: 100,
            pls_components: 10,
            enable_pca: true,
            pca_components: 32,
            pca_solver: PcaSolver::Full,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.vip_top_k == 0 {
            return Err(PipelineError::InvalidConfig("vip_top_k must be at least 1".to_string()));
        }
        if self.pls_components == 0 {
            return Err(PipelineError::InvalidConfig(
                "pls_components must be at least 1".to_string(),
            ));
        }
        if self.enable_pca && self.pca_components == 0 {
            return Err(PipelineError::InvalidConfig(
                "pca_components must be at least 1 when PCA is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SpectralPipeline {
    config: PipelineConfig,
}

/// Everything produced by [`SpectralPipeline::fit`].
#[derive(Debug, Clone)]
pub struct PipelineFit {
    pub pipeline: FittedPipeline,
    /// Reduced features of the training spectra, one row per sample.
    pub features: Array2<f64>,
    /// Standardised targets the predictor trains on.
    pub scaled_targets: Array2<f64>,
}

impl SpectralPipeline {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fits every stage on `spectra` and `properties`.
    ///
    /// # Errors
    /// Returns an error if the matrices are misaligned, fewer than two samples
    /// are given, or a decomposition fails.
    pub fn fit(
        &self,
        spectra: &SpectralMatrix,
        properties: &PropertyMatrix,
    ) -> PipelineResult<PipelineFit> {
        check_alignment(spectra, properties)?;
        if spectra.n_samples() < 2 {
            return Err(PipelineError::InsufficientSamples {
                found: spectra.n_samples(),
                required: 2,
            });
        }
        info!(
            "Fitting preprocessing chain on {} spectra x {} wavelengths, {} properties.",
            spectra.n_samples(),
            spectra.n_wavelengths(),
            properties.n_properties()
        );

        let normalized = apply_snv(spectra.data());
        let spectrum_stats = SpectrumStats::from_normalized(normalized.view());
        let (scaled_targets, property_scaler) = StandardScaler::fit_transform(properties.data())?;

        let selector = VipSelector::new(self.config.vip_top_k, self.config.pls_components);
        let selection = selector.fit_select(normalized.view(), scaled_targets.view())?;
        let subset = gather_columns(normalized.view(), &selection.indices)?;

        let (pca, features) = if self.config.enable_pca {
            let mut pca = PCA::new();
            let features = pca.fit(
                subset.view(),
                self.config.pca_components,
                &self.config.pca_solver,
            )?;
            (Some(pca), features)
        } else {
            (None, subset)
        };
        info!(
            "Preprocessing produced {} features per sample.",
            features.ncols()
        );

        Ok(PipelineFit {
            pipeline: FittedPipeline {
                spectrum_stats,
                property_scaler,
                selection,
                pca,
                wavelength_labels: spectra.wavelength_labels().to_vec(),
                property_labels: properties.property_labels().to_vec(),
            },
            features,
            scaled_targets,
        })
    }
}

/// Fitted parameters of every stage.
#[derive(Debug, Clone)]
pub struct FittedPipeline {
    spectrum_stats: SpectrumStats,
    property_scaler: StandardScaler,
    selection: VipSelection,
    pca: Option<PCA>,
    wavelength_labels: Vec<String>,
    property_labels: Vec<String>,
}

impl FittedPipeline {
    pub fn selected_indices(&self) -> &[usize] {
        &self.selection.indices
    }

    pub fn vip_scores(&self) -> &Array1<f64> {
        &self.selection.scores
    }

    pub fn pls_components_used(&self) -> usize {
        self.selection.n_pls_components_used
    }

    pub fn pca(&self) -> Option<&PCA> {
        self.pca.as_ref()
    }

    pub fn property_scaler(&self) -> &StandardScaler {
        &self.property_scaler
    }

    pub fn spectrum_stats(&self) -> &SpectrumStats {
        &self.spectrum_stats
    }

    pub fn wavelength_labels(&self) -> &[String] {
        &self.wavelength_labels
    }

    pub fn property_labels(&self) -> &[String] {
        &self.property_labels
    }

    /// Width of the produced feature vectors.
    pub fn feature_width(&self) -> usize {
        self.pca
            .as_ref()
            .map_or(self.selection.indices.len(), |p| p.n_components())
    }

    /// Runs raw spectra through the fitted chain.
    pub fn transform(&self, spectra: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        if spectra.ncols() != self.wavelength_labels.len() {
            return Err(PipelineError::shape(
                "raw spectrum",
                self.wavelength_labels.len(),
                spectra.ncols(),
            ));
        }
        run_chain(spectra, &self.selection.indices, self.pca.as_ref())
    }

    /// Builds the parameter artifact for this fit.
    pub fn export(
        &self,
        model_type: Option<String>,
        description: Option<String>,
    ) -> PipelineResult<ArtifactBundle> {
        export(
            &self.spectrum_stats,
            &self.property_scaler,
            self.pca.as_ref(),
            &self.selection.indices,
            ModelDescriptor {
                property_labels: self.property_labels.clone(),
                wavelength_labels: self.wavelength_labels.clone(),
                model_type,
                description,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn dataset(n: usize, p: usize, seed: u64) -> (SpectralMatrix, PropertyMatrix) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let raw = Array2::random_using((n, p), Uniform::new(0.1, 1.0), &mut rng);
        let mut props = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            props[[i, 0]] = 800.0 + 40.0 * raw[[i, 2]];
            props[[i, 1]] = 50.0 - 10.0 * raw[[i, 5]] + 5.0 * raw[[i, 9]];
        }
        (
            SpectralMatrix::new(raw, vec![]).unwrap(),
            PropertyMatrix::new(props, vec!["density".into(), "cetane".into()]).unwrap(),
        )
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.vip_top_k, 100);
        assert_eq!(config.pls_components, 10);
        assert!(config.enable_pca);
        assert_eq!(config.pca_components, 32);
        assert_eq!(config.pca_solver, PcaSolver::Full);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = PipelineConfig {
            vip_top_k: 0,
            ..Default::default()
        };
        assert!(SpectralPipeline::new(config).is_err());
        let config = PipelineConfig {
            enable_pca: false,
            pca_components: 0,
            ..Default::default()
        };
        assert!(SpectralPipeline::new(config).is_ok());
    }

    #[test]
    fn fit_features_match_transform() {
        let (spectra, properties) = dataset(30, 20, 4);
        let pipeline = SpectralPipeline::new(PipelineConfig {
            vip_top_k: 8,
            pls_components: 4,
            enable_pca: true,
            pca_components: 3,
            pca_solver: PcaSolver::Full,
        })
        .unwrap();
        let fit = pipeline.fit(&spectra, &properties).unwrap();
        assert_eq!(fit.features.dim(), (30, 3));
        assert_eq!(fit.pipeline.selected_indices().len(), 8);
        assert_eq!(fit.pipeline.transform(spectra.data()).unwrap(), fit.features);
    }

    #[test]
    fn oversized_requests_are_clamped() {
        let (spectra, properties) = dataset(6, 12, 8);
        let pipeline = SpectralPipeline::new(PipelineConfig::default()).unwrap();
        let fit = pipeline.fit(&spectra, &properties).unwrap();
        assert_eq!(fit.pipeline.selected_indices(), (0..12).collect::<Vec<_>>().as_slice());
        assert_eq!(fit.pipeline.pls_components_used(), 5);
        assert_eq!(fit.pipeline.feature_width(), 6);
        assert_eq!(fit.features.ncols(), 6);
    }

    #[test]
    fn without_pca_features_are_the_selected_subset() {
        let (spectra, properties) = dataset(15, 10, 2);
        let pipeline = SpectralPipeline::new(PipelineConfig {
            vip_top_k: 4,
            enable_pca: false,
            ..Default::default()
        })
        .unwrap();
        let fit = pipeline.fit(&spectra, &properties).unwrap();
        assert!(fit.pipeline.pca().is_none());
        assert_eq!(fit.features.ncols(), 4);
        let bundle = fit.pipeline.export(None, None).unwrap();
        assert_eq!(bundle.model_info.input_size, 4);
        assert!(bundle.preprocessing.pca.is_none());
    }

    #[test]
    fn single_sample_is_rejected() {
        let (spectra, properties) = dataset(1, 5, 1);
        let pipeline = SpectralPipeline::new(PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.fit(&spectra, &properties),
            Err(PipelineError::InsufficientSamples { found: 1, required: 2 })
        ));
    }

    #[test]
    fn transform_rejects_wrong_raw_width() {
        let (spectra, properties) = dataset(10, 8, 3);
        let fit = SpectralPipeline::new(PipelineConfig::default())
            .unwrap()
            .fit(&spectra, &properties)
            .unwrap();
        assert!(fit
            .pipeline
            .transform(Array2::zeros((2, 9)).view())
            .unwrap_err()
            .is_shape_mismatch());
    }
}
