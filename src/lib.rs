// Spectral preprocessing (SNV, VIP selection, PCA) with artifact replay

#![doc = include_str!("../README.md")]

pub mod artifact;
pub mod dataset;
pub mod error;
pub mod ingest;
pub mod linalg_backends;
pub mod metrics;
pub mod pca;
pub mod pipeline;
pub mod pls;
pub mod regressor;
pub mod replay;
pub mod scaler;
pub mod search;
pub mod snv;
pub mod split;
pub mod training;
pub mod vip;


pub use artifact::{ArtifactBundle, ModelInfo, PreprocessingParams};
pub use dataset::{PropertyMatrix, SpectralMatrix};
pub use error::{PipelineError, PipelineResult};
pub use pca::{PcaSolver, PCA};
pub use pipeline::{FittedPipeline, PipelineConfig, SpectralPipeline};
pub use replay::ReplayEngine;
pub use training::{train, DeployedModel, TrainingConfig};
