use thiserror::Error;

/// Errors surfaced by the preprocessing pipeline, the artifact layer and the
/// predictors.
///
/// Degenerate numeric inputs (constant rows, zero-norm weight columns) are
/// never reported here; they are absorbed by epsilon guards inside the
/// individual stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Shape mismatch in {stage}: expected width {expected}, found {found}.")]
    ShapeMismatch {
        stage: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Spectral matrix has {spectra} rows but property matrix has {properties} rows.")]
    RowCountMismatch { spectra: usize, properties: usize },
    #[error("Input contains only {found} samples, but at least {required} are required.")]
    InsufficientSamples { found: usize, required: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Inconsistent parameter artifact: {0}")]
    InvalidArtifact(String),
    #[error("Non-finite value encountered in {0}.")]
    NonFinite(String),
    #[error("{0} is not fitted. Fit or load a model first.")]
    NotFitted(&'static str),
    #[error("Linear algebra backend failure: {0}")]
    Linalg(String),
    #[error("Malformed input file: {0}")]
    Ingest(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to encode predictor: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Failed to decode predictor: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Convenience constructor used by width checks throughout the crate.
    pub(crate) fn shape(stage: &'static str, expected: usize, found: usize) -> Self {
        PipelineError::ShapeMismatch {
            stage,
            expected,
            found,
        }
    }

    /// True for the error class that signals training/inference desynchronisation.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, PipelineError::ShapeMismatch { .. })
    }
}
