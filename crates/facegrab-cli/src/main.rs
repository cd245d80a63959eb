use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegrab_core::extractor::{ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use facegrab_core::FaceExtractor;
use facegrab_store::{Config, FaceRegistry, FlatIndex, MetadataStore};
use serde_json::json;
use std::path::PathBuf;

/// Works directly on the data directory; do not run while facegrabd is
/// serving the same directory.
#[derive(Parser)]
#[command(name = "facegrab", about = "Facegrab offline face registry CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face image under a name
    Register {
        /// Name to record for this face
        #[arg(short, long)]
        name: String,
        /// Image file (.jpg, .jpeg, .png or .webp)
        image: PathBuf,
    },
    /// Recognize the face in an image
    Recognize {
        /// Image file to query
        image: PathBuf,
    },
    /// List registered faces
    List,
    /// Show registry status
    Status,
    /// Check that both ONNX models are present and load
    CheckModels,
}

fn open_registry(config: &Config) -> Result<FaceRegistry<FaceExtractor>> {
    let extractor = FaceExtractor::load(&config.model_dir, config.face_selection)
        .context("loading face models")?;
    let registry = FaceRegistry::open(extractor, config).context("opening face stores")?;
    tracing::debug!(data_dir = %config.data_dir.display(), "registry opened");
    Ok(registry)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Register { name, image } => {
            let file_name = image.to_string_lossy();
            if facegrab_store::uploads::accepted_extension(&file_name).is_none() {
                anyhow::bail!("unsupported file type: {}", image.display());
            }
            let reg = open_registry(&config)?.register(&name, &image)?;
            tracing::info!(name = %reg.name, face_id = reg.face_id, slot = reg.slot, "registered from CLI");
            println!("{}", serde_json::to_string_pretty(&reg)?);
        }
        Commands::Recognize { image } => {
            let result = open_registry(&config)?.recognize(&image)?;
            tracing::info!(image = %image.display(), label = result.label(), "recognized from CLI");
            let out = json!({ "match": result.label(), "distance": result.distance() });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::List => {
            let faces = MetadataStore::open(&config.db_path)?.list_faces()?;
            tracing::debug!(count = faces.len(), "listed faces");
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Status => {
            let index = FlatIndex::open(&config.index_path, config.dimension)?;
            let metadata = MetadataStore::open(&config.db_path)?;
            let out = json!({
                "faces": metadata.face_count()?,
                "vectors": index.len(),
                "unmapped_slots": metadata.unmapped_slots(index.len())?,
                "dimension": index.dimension(),
                "threshold": config.distance_threshold,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::CheckModels => {
            tracing::info!(model_dir = %config.model_dir.display(), "checking models");
            println!("Model directory: {}", config.model_dir.display());
            for file in [SCRFD_MODEL_FILE, ARCFACE_MODEL_FILE] {
                let path = config.model_dir.join(file);
                let state = if path.exists() { "found" } else { "MISSING" };
                println!("  {file}: {state}");
            }
            FaceExtractor::load(&config.model_dir, config.face_selection)
                .context("loading face models")?;
            println!("Models loaded successfully");
        }
    }

    Ok(())
}
