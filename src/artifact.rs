//! The exported parameter artifact.
//!
//! Two JSON documents are written side by side: `preprocessing_params.json`
//! (SNV audit statistics, property scaler and optional PCA) and
//! `model_info.json` (widths, labels and the VIP index set). They are
//! versioned together and only ever consumed as a validated [`ArtifactBundle`].

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::{info, warn};
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, PipelineResult};
use crate::pca::PCA;
use crate::scaler::StandardScaler;
use crate::snv::SpectrumStats;

/// Version written into both documents; readers reject anything else.
pub const FORMAT_VERSION: u32 = 1;
/// The only row normalisation the replay chain knows.
pub const PREPROCESSING_TYPE_SNV: &str = "SNV";

pub const PREPROCESSING_PARAMS_FILE: &str = "preprocessing_params.json";
pub const MODEL_INFO_FILE: &str = "model_info.json";
pub const PREDICTOR_FILE: &str = "predictor.bin";
/// Spectra CSV layout the model was trained with, reused when predicting from files.
pub const INPUT_LAYOUT_FILE: &str = "input_layout.json";

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaParams {
    /// Length equals the VIP-selected width.
    pub mean: Vec<f64>,
    /// `n_components` rows of VIP-selected width.
    pub components: Vec<Vec<f64>>,
    pub n_components: usize,
}

/// `preprocessing_params.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingParams {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Audit-only; SNV is stateless and replay never reads these.
    pub spectrum_stats: SpectrumStats,
    pub property_scaler: PropertyScalerParams,
    pub preprocessing_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pca: Option<PcaParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `model_info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Width of the vector fed to the predictor (post-PCA, or post-VIP without PCA).
    pub input_size: usize,
    pub output_size: usize,
    pub property_labels: Vec<String>,
    /// Labels of the full raw wavelength axis.
    pub wavelength_labels: Vec<String>,
    /// Ascending indices into the raw wavelength axis.
    pub selected_feature_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Human-facing fields of the artifact that the fitted stages do not know.
#[derive(Debug, Clone, Default)]
pub struct ModelDescriptor {
    pub property_labels: Vec<String>,
    pub wavelength_labels: Vec<String>,
    pub model_type: Option<String>,
    pub description: Option<String>,
}

/// Both documents, loaded or exported together.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub preprocessing: PreprocessingParams,
    pub model_info: ModelInfo,
}

/// Assembles the artifact from fitted stages.
///
/// # Errors
/// Returns an error if a fitted value is not finite or the resulting
/// documents are inconsistent with each other.
pub fn export(
    spectrum_stats: &SpectrumStats,
    property_scaler: &StandardScaler,
    pca: Option<&PCA>,
    selected_feature_indices: &[usize],
    descriptor: ModelDescriptor,
) -> PipelineResult<ArtifactBundle> {
    let pca_params = match pca {
        Some(model) => {
            let mean = model.mean().ok_or(PipelineError::NotFitted("PCA"))?;
            let components = model.components().ok_or(PipelineError::NotFitted("PCA"))?;
            Some(PcaParams {
                mean: mean.to_vec(),
                components: components.rows().into_iter().map(|r| r.to_vec()).collect(),
                n_components: components.nrows(),
            })
        }
        None => None,
    };
    let input_size = pca_params
        .as_ref()
        .map_or(selected_feature_indices.len(), |p| p.n_components);

    let bundle = ArtifactBundle {
        preprocessing: PreprocessingParams {
            format_version: FORMAT_VERSION,
            spectrum_stats: spectrum_stats.clone(),
            property_scaler: PropertyScalerParams {
                mean: property_scaler.mean().to_vec(),
                scale: property_scaler.scale().to_vec(),
            },
            preprocessing_type: PREPROCESSING_TYPE_SNV.to_string(),
            pca: pca_params,
            description: descriptor.description.clone(),
        },
        model_info: ModelInfo {
            format_version: FORMAT_VERSION,
            input_size,
            output_size: property_scaler.width(),
            property_labels: descriptor.property_labels,
            wavelength_labels: descriptor.wavelength_labels,
            selected_feature_indices: selected_feature_indices.to_vec(),
            model_type: descriptor.model_type,
            description: descriptor.description,
        },
    };
    bundle.ensure_finite()?;
    bundle.validate()?;
    Ok(bundle)
}

impl ArtifactBundle {
    /// Number of raw wavelengths a spectrum must have.
    pub fn raw_width(&self) -> usize {
        self.model_info.wavelength_labels.len()
    }

    /// Number of columns gathered by the VIP index set.
    pub fn selected_width(&self) -> usize {
        self.model_info.selected_feature_indices.len()
    }

    /// Width of the vector handed to the predictor.
    pub fn feature_width(&self) -> usize {
        self.model_info.input_size
    }

    pub fn output_width(&self) -> usize {
        self.model_info.output_size
    }

    /// Rebuilds the property scaler.
    pub fn property_scaler(&self) -> PipelineResult<StandardScaler> {
        let params = &self.preprocessing.property_scaler;
        StandardScaler::from_params(params.mean.clone(), params.scale.clone())
    }

    /// Rebuilds the PCA projection, if the artifact carries one.
    pub fn pca(&self) -> PipelineResult<Option<PCA>> {
        let Some(params) = &self.preprocessing.pca else {
            return Ok(None);
        };
        let width = params.mean.len();
        let mut components = Array2::<f64>::zeros((params.components.len(), width));
        for (mut row, values) in components.rows_mut().into_iter().zip(&params.components) {
            if values.len() != width {
                return Err(PipelineError::shape("PCA component row", width, values.len()));
            }
            row.assign(&Array1::from(values.clone()));
        }
        PCA::with_model(Array1::from(params.mean.clone()), components).map(Some)
    }

    /// Cross-checks every width recorded in the two documents.
    ///
    /// A mismatch means the documents were not produced by the same fit, so
    /// the bundle is rejected as a whole.
    pub fn validate(&self) -> PipelineResult<()> {
        let pre = &self.preprocessing;
        let info = &self.model_info;

        if pre.format_version != FORMAT_VERSION || info.format_version != FORMAT_VERSION {
            return Err(PipelineError::InvalidArtifact(format!(
                "unsupported format version (preprocessing {}, model info {}, expected {})",
                pre.format_version, info.format_version, FORMAT_VERSION
            )));
        }
        if pre.preprocessing_type != PREPROCESSING_TYPE_SNV {
            return Err(PipelineError::InvalidArtifact(format!(
                "unknown preprocessing_type {:?}",
                pre.preprocessing_type
            )));
        }

        if info.output_size == 0 || info.input_size == 0 {
            return Err(PipelineError::InvalidArtifact(format!(
                "input_size {} and output_size {} must both be at least 1",
                info.input_size, info.output_size
            )));
        }
        let mut seen = HashSet::with_capacity(info.wavelength_labels.len());
        if let Some(label) = info.wavelength_labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(PipelineError::InvalidArtifact(format!(
                "wavelength label {label:?} appears more than once"
            )));
        }

        let scaler = &pre.property_scaler;
        if scaler.mean.len() != info.output_size || scaler.scale.len() != info.output_size {
            return Err(PipelineError::InvalidArtifact(format!(
                "property scaler has {} means and {} scales but output_size is {}",
                scaler.mean.len(),
                scaler.scale.len(),
                info.output_size
            )));
        }
        if info.property_labels.len() != info.output_size {
            return Err(PipelineError::InvalidArtifact(format!(
                "{} property labels for output_size {}",
                info.property_labels.len(),
                info.output_size
            )));
        }

        let indices = &info.selected_feature_indices;
        if indices.is_empty() {
            return Err(PipelineError::InvalidArtifact(
                "selected_feature_indices is empty".to_string(),
            ));
        }
        if !indices.windows(2).all(|w| w[0] < w[1]) {
            return Err(PipelineError::InvalidArtifact(
                "selected_feature_indices must be strictly ascending".to_string(),
            ));
        }
        let raw_width = info.wavelength_labels.len();
        if let Some(&last) = indices.last() {
            if last >= raw_width {
                return Err(PipelineError::InvalidArtifact(format!(
                    "selected index {last} is outside the {raw_width} recorded wavelengths"
                )));
            }
        }

        match &pre.pca {
            Some(pca) => {
                if pca.mean.len() != indices.len() {
                    return Err(PipelineError::InvalidArtifact(format!(
                        "PCA mean has length {} but {} features are selected",
                        pca.mean.len(),
                        indices.len()
                    )));
                }
                if pca.components.len() != pca.n_components {
                    return Err(PipelineError::InvalidArtifact(format!(
                        "PCA lists {} components but n_components is {}",
                        pca.components.len(),
                        pca.n_components
                    )));
                }
                if let Some(row) = pca.components.iter().find(|r| r.len() != pca.mean.len()) {
                    return Err(PipelineError::InvalidArtifact(format!(
                        "PCA component of width {} does not match mean length {}",
                        row.len(),
                        pca.mean.len()
                    )));
                }
                if info.input_size != pca.n_components {
                    return Err(PipelineError::InvalidArtifact(format!(
                        "input_size {} does not match PCA n_components {}",
                        info.input_size, pca.n_components
                    )));
                }
            }
            None => {
                if info.input_size != indices.len() {
                    return Err(PipelineError::InvalidArtifact(format!(
                        "input_size {} does not match {} selected features",
                        info.input_size,
                        indices.len()
                    )));
                }
            }
        }

        let stats = &pre.spectrum_stats;
        if stats.mean.len() != raw_width || stats.std.len() != raw_width {
            warn!(
                "SNV audit statistics have widths {}/{} but {} wavelengths are recorded; ignoring them.",
                stats.mean.len(),
                stats.std.len(),
                raw_width
            );
        }
        Ok(())
    }

    fn ensure_finite(&self) -> PipelineResult<()> {
        let pre = &self.preprocessing;
        let mut values = pre
            .spectrum_stats
            .mean
            .iter()
            .chain(&pre.spectrum_stats.std)
            .chain(&pre.property_scaler.mean)
            .chain(&pre.property_scaler.scale);
        if values.any(|v| !v.is_finite()) {
            return Err(PipelineError::NonFinite("exported scaler or SNV statistics".to_string()));
        }
        if let Some(pca) = &pre.pca {
            if pca
                .mean
                .iter()
                .chain(pca.components.iter().flatten())
                .any(|v| !v.is_finite())
            {
                return Err(PipelineError::NonFinite("exported PCA parameters".to_string()));
            }
        }
        Ok(())
    }

    /// Writes both documents into `dir`, creating it if needed.
    pub fn write_dir<P: AsRef<Path>>(&self, dir: P) -> PipelineResult<()> {
        let dir = dir.as_ref();
        self.ensure_finite()?;
        self.validate()?;
        fs::create_dir_all(dir)?;
        write_json_atomic(&dir.join(PREPROCESSING_PARAMS_FILE), &self.preprocessing)?;
        write_json_atomic(&dir.join(MODEL_INFO_FILE), &self.model_info)?;
        info!(
            "Wrote artifact to {} ({} selected wavelengths, input_size {}).",
            dir.display(),
            self.selected_width(),
            self.feature_width()
        );
        Ok(())
    }

    /// Loads and validates both documents from `dir`. Nothing is returned
    /// unless every cross-check passes.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> PipelineResult<Self> {
        let dir = dir.as_ref();
        let bundle = Self {
            preprocessing: read_json(&dir.join(PREPROCESSING_PARAMS_FILE))?,
            model_info: read_json(&dir.join(MODEL_INFO_FILE))?,
        };
        bundle.ensure_finite()?;
        bundle.validate()?;
        Ok(bundle)
    }
}

/// Runs `write` against a temp file in the destination directory and renames
/// it over `path`, so readers never observe a partial file. On error the temp
/// file is removed and any existing `path` is left untouched.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> PipelineResult<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> PipelineResult<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Pretty-printed JSON through [`write_atomic`].
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    write_atomic(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, value)?;
        writer.write_all(b"\n")?;
        Ok(())
    })
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
