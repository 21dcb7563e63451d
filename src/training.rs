//! End-to-end training run: preprocessing, split, hyperparameter search,
//! validation and persistence of the model files.

use std::fs;
use std::path::Path;

use log::{info, warn};
use ndarray::{s, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::artifact::{read_json, write_json_atomic, ArtifactBundle, INPUT_LAYOUT_FILE, PREDICTOR_FILE};
use crate::dataset::{PropertyMatrix, SpectralMatrix};
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::{align_to_wavelengths, load_spectra, LabCsvLayout};
use crate::metrics::RegressionMetrics;
use crate::pipeline::{PipelineConfig, SpectralPipeline};
use crate::regressor::{FittedRegressor, Regressor, TrainedPredictor};
use crate::replay::ReplayEngine;
use crate::search::{run_search, CrossValidator, ParameterSpace, PredictorKind, SearchOutcome, SearchStrategy};
use crate::split::{train_validation_split, SplitIndices};

/// Whether one predictor is tuned for all properties or one per property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// A single multi-output model scored on every property at once.
    #[default]
    Joint,
    /// An independent search and model for each property column.
    PerProperty,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: SearchStrategy,
    pub space: ParameterSpace,
    pub scope: SearchScope,
}

/// Everything a training run needs besides the data. Loadable from TOML;
/// omitted keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub pipeline: PipelineConfig,
    pub train_ratio: f64,
    pub seed: u64,
    pub cv_folds: usize,
    pub predictor: PredictorKind,
    pub search: SearchConfig,
    pub spectra_layout: LabCsvLayout,
    #[serde(deserialize_with = "crate::ingest::properties_layout_or_default")]
    pub properties_layout: LabCsvLayout,
    pub description: Option<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            train_ratio: 0.8,
            seed: 42,
            cv_folds: 3,
            predictor: PredictorKind::default(),
            search: SearchConfig::default(),
            spectra_layout: LabCsvLayout::spectra_default(),
            properties_layout: LabCsvLayout::properties_default(),
            description: None,
        }
    }
}

impl TrainingConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.pipeline.validate()?;
        if !(self.train_ratio > 0.0 && self.train_ratio <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "train_ratio must lie in (0, 1], got {}",
                self.train_ratio
            )));
        }
        if self.cv_folds < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        Ok(())
    }
}

/// Result of [`train`].
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub artifact: ArtifactBundle,
    pub predictor: TrainedPredictor,
    /// One outcome for a joint search, one per property otherwise.
    pub search: Vec<SearchOutcome>,
    pub split: SplitIndices,
    /// Layout of the spectra file, saved so prediction reads files the same way.
    pub spectra_layout: LabCsvLayout,
    /// Metrics in physical units on the validation split; `None` when every
    /// sample was used for training.
    pub validation: Option<RegressionMetrics>,
    /// Fit-time features of every sample, for parity checks.
    pub features: Array2<f64>,
}

/// Trains the full model.
///
/// The preprocessing chain is fitted on all samples before the train/validation
/// split; the predictor only ever sees the training rows.
pub fn train(
    spectra: &SpectralMatrix,
    properties: &PropertyMatrix,
    config: &TrainingConfig,
) -> PipelineResult<TrainingRun> {
    config.validate()?;
    let fit = SpectralPipeline::new(config.pipeline.clone())?.fit(spectra, properties)?;

    let split = train_validation_split(spectra.n_samples(), config.train_ratio, config.seed)?;
    info!(
        "Split {} samples into {} training and {} validation.",
        spectra.n_samples(),
        split.train.len(),
        split.validation.len()
    );
    let x_train = fit.features.select(Axis(0), &split.train);
    let y_train = fit.scaled_targets.select(Axis(0), &split.train);

    let candidates = config
        .search
        .strategy
        .select(config.search.space.candidates(config.predictor), config.seed);
    let validator = CrossValidator::new(config.cv_folds);
    let (predictor, search) = match config.search.scope {
        SearchScope::Joint => {
            let outcome = run_search(&candidates, &validator, x_train.view(), y_train.view())?;
            let predictor = outcome.best.fit(x_train.view(), y_train.view())?;
            (predictor, vec![outcome])
        }
        SearchScope::PerProperty => {
            let mut models = Vec::with_capacity(y_train.ncols());
            let mut outcomes = Vec::with_capacity(y_train.ncols());
            for (j, label) in properties.property_labels().iter().enumerate() {
                info!("Searching hyperparameters for {}.", label);
                let target = y_train.slice(s![.., j..j + 1]);
                let outcome = run_search(&candidates, &validator, x_train.view(), target)?;
                models.push(outcome.best.fit(x_train.view(), target)?);
                outcomes.push(outcome);
            }
            (TrainedPredictor::per_property(models)?, outcomes)
        }
    };

    let validation = if split.validation.is_empty() {
        None
    } else {
        let x_val = fit.features.select(Axis(0), &split.validation);
        let y_val = properties.data().select(Axis(0), &split.validation);
        let scaled = predictor.predict(x_val.view())?;
        let physical = fit.pipeline.property_scaler().inverse_transform(scaled.view())?;
        let metrics =
            RegressionMetrics::compute(y_val.view(), physical.view(), properties.property_labels())?;
        for ((label, mse), r2) in metrics.property_labels.iter().zip(&metrics.mse).zip(&metrics.r2) {
            info!("  {}: MSE = {:.4}, R2 = {:.4}", label, mse, r2);
        }
        Some(metrics)
    };

    let artifact = fit.pipeline.export(
        Some(predictor.model_type().to_string()),
        config.description.clone(),
    )?;
    Ok(TrainingRun {
        artifact,
        predictor,
        search,
        split,
        spectra_layout: config.spectra_layout,
        validation,
        features: fit.features,
    })
}

impl TrainingRun {
    /// Writes `preprocessing_params.json`, `model_info.json`, `predictor.bin`
    /// and `input_layout.json` into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> PipelineResult<()> {
        let dir = dir.as_ref();
        self.artifact.write_dir(dir)?;
        self.predictor.save(dir.join(PREDICTOR_FILE))?;
        write_json_atomic(&dir.join(INPUT_LAYOUT_FILE), &self.spectra_layout)?;
        Ok(())
    }
}

/// A saved model ready for inference.
pub struct DeployedModel {
    pub engine: ReplayEngine,
    pub predictor: TrainedPredictor,
    pub spectra_layout: LabCsvLayout,
}

impl DeployedModel {
    /// Loads the model files and rejects a predictor/artifact width mismatch.
    ///
    /// A directory without `input_layout.json` reads spectra files with
    /// [`LabCsvLayout::spectra_default`].
    pub fn load<P: AsRef<Path>>(dir: P) -> PipelineResult<Self> {
        let dir = dir.as_ref();
        let engine = ReplayEngine::load_dir(dir)?;
        let predictor = TrainedPredictor::load(dir.join(PREDICTOR_FILE))?;
        engine.check_predictor(&predictor)?;
        let layout_path = dir.join(INPUT_LAYOUT_FILE);
        let spectra_layout = if layout_path.exists() {
            read_json(&layout_path)?
        } else {
            warn!("{} not found; assuming the default spectra layout.", layout_path.display());
            LabCsvLayout::spectra_default()
        };
        Ok(Self {
            engine,
            predictor,
            spectra_layout,
        })
    }

    /// Raw spectra in, properties in physical units out.
    pub fn predict(&self, spectra: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        self.engine.predict(&self.predictor, spectra)
    }

    /// Reads a lab spectra file with the training layout, matches its columns
    /// to the training wavelengths by label and predicts.
    pub fn predict_file<P: AsRef<Path>>(&self, path: P) -> PipelineResult<Array2<f64>> {
        let spectra = load_spectra(path, &self.spectra_layout)?;
        let aligned = align_to_wavelengths(&spectra, &self.engine.artifact().model_info.wavelength_labels)?;
        self.predict(aligned.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: TrainingConfig = toml::from_str(
            r#"
            seed = 7
            predictor = "kernel_ridge"

            [pipeline]
            vip_top_k = 40

            [search]
            strategy = { random = { n_iter = 6 } }
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.pipeline.vip_top_k, 40);
        assert_eq!(config.pipeline.pca_components, 32);
        assert_eq!(config.predictor, PredictorKind::KernelRidge);
        assert_eq!(config.search.strategy, SearchStrategy::Random { n_iter: 6 });
        assert_eq!(config.train_ratio, 0.8);
        assert_eq!(config.spectra_layout, LabCsvLayout::spectra_default());
        assert_eq!(config.properties_layout.label_row, 8);
        assert_eq!(config.search.scope, SearchScope::Joint);
    }

    #[test]
    fn partial_layout_tables_fill_from_their_own_defaults() {
        let config: TrainingConfig = toml::from_str(
            r#"
            [spectra_layout]
            skip_columns = 1

            [properties_layout]
            label_row = 5

            [search]
            scope = "per_property"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.spectra_layout,
            LabCsvLayout {
                skip_columns: 1,
                ..LabCsvLayout::spectra_default()
            }
        );
        assert_eq!(
            config.properties_layout,
            LabCsvLayout {
                label_row: 5,
                ..LabCsvLayout::properties_default()
            }
        );
        assert_eq!(config.search.scope, SearchScope::PerProperty);
    }

    #[test]
    fn solver_and_gamma_lists_parse() {
        let config: TrainingConfig = toml::from_str(
            r#"
            [pipeline.pca_solver]
            kind = "randomized"
            n_oversamples = 8
            n_power_iterations = 3
            seed = 1

            [search.space]
            kernel_ridge_gammas = ["scale", { value = 0.05 }]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.pipeline.pca_solver,
            crate::pca::PcaSolver::Randomized {
                n_oversamples: 8,
                n_power_iterations: 3,
                seed: 1
            }
        );
        assert_eq!(config.search.space.kernel_ridge_gammas.len(), 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = TrainingConfig {
            cv_folds: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = TrainingConfig {
            train_ratio: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
