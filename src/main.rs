use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use spectral_pipeline::artifact::ArtifactBundle;
use spectral_pipeline::ingest::load_lab_dataset;
use spectral_pipeline::search::PredictorKind;
use spectral_pipeline::training::{train, DeployedModel, TrainingConfig};
use spectral_pipeline::PipelineResult;

#[derive(Parser)]
#[command(
    name = "spectral-pipeline",
    version,
    about = "Fit and replay the SNV -> VIP -> PCA preprocessing chain for NIR spectra"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PredictorCli {
    Ridge,
    KernelRidge,
}

impl From<PredictorCli> for PredictorKind {
    fn from(value: PredictorCli) -> Self {
        match value {
            PredictorCli::Ridge => PredictorKind::Ridge,
            PredictorCli::KernelRidge => PredictorKind::KernelRidge,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from lab CSV exports
    #[command(
        about = "Train a model (outputs: preprocessing_params.json, model_info.json, predictor.bin, input_layout.json)"
    )]
    Fit {
        /// Spectrum CSV export
        #[arg(long)]
        spectra: PathBuf,

        /// Property CSV export
        #[arg(long)]
        properties: PathBuf,

        /// Output directory for the model files
        #[arg(long)]
        out: PathBuf,

        /// TOML training configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overrides the predictor family from the configuration
        #[arg(long, value_enum)]
        predictor: Option<PredictorCli>,

        /// Overrides the split/search seed from the configuration
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Predict properties for new spectra
    #[command(about = "Apply a trained model to spectra (outputs: predictions CSV)")]
    Predict {
        /// Directory written by `fit`
        #[arg(long)]
        model_dir: PathBuf,

        /// Spectrum CSV in the layout the model was trained with
        #[arg(long)]
        spectra: PathBuf,

        /// Destination CSV; standard output when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate and summarise a saved artifact
    Inspect {
        #[arg(long)]
        model_dir: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fit {
            spectra,
            properties,
            out,
            config,
            predictor,
            seed,
        } => fit_command(&spectra, &properties, &out, config.as_deref(), predictor, seed),
        Commands::Predict {
            model_dir,
            spectra,
            output,
        } => predict_command(&model_dir, &spectra, output.as_deref()),
        Commands::Inspect { model_dir } => inspect_command(&model_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn fit_command(
    spectra_path: &Path,
    properties_path: &Path,
    out: &Path,
    config_path: Option<&Path>,
    predictor: Option<PredictorCli>,
    seed: Option<u64>,
) -> PipelineResult<()> {
    let mut config = match config_path {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };
    if let Some(kind) = predictor {
        config.predictor = kind.into();
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }

    let (spectra, properties) = load_lab_dataset(
        spectra_path,
        properties_path,
        &config.spectra_layout,
        &config.properties_layout,
    )?;
    let run = train(&spectra, &properties, &config)?;
    run.save(out)?;
    info!("Model written to {}.", out.display());
    Ok(())
}

fn predict_command(model_dir: &Path, spectra_path: &Path, output: Option<&Path>) -> PipelineResult<()> {
    let model = DeployedModel::load(model_dir)?;
    let predictions = model.predict_file(spectra_path)?;
    let info = &model.engine.artifact().model_info;

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(BufWriter::new(sink));
    writer.write_record(&info.property_labels)?;
    for row in predictions.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn inspect_command(model_dir: &Path) -> PipelineResult<()> {
    let bundle = ArtifactBundle::load_dir(model_dir)?;
    let info = &bundle.model_info;
    println!("format version:      {}", info.format_version);
    println!("model type:          {}", info.model_type.as_deref().unwrap_or("unknown"));
    println!("raw wavelengths:     {}", bundle.raw_width());
    println!("selected wavelengths: {}", bundle.selected_width());
    match &bundle.preprocessing.pca {
        Some(pca) => println!("pca components:      {}", pca.n_components),
        None => println!("pca components:      none"),
    }
    println!("predictor input:     {}", info.input_size);
    println!("properties:          {}", info.property_labels.join(", "));
    if let Some(description) = &info.description {
        println!("description:         {}", description);
    }
    Ok(())
}
