use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapmatch_core::{
    single_face, FaceDetection, IdentityStore, MatchStatus, MatchingConfig, PhotoDetections,
    Preprocessor, ResolveError,
};
use snapmatch_engine::{
    learn_batch, load_detections, open_resolver, spawn_learner, EngineConfig, EngineError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snapmatch", about = "Group photos by the people in them")]
struct Cli {
    /// TOML file with matching options (overrides SNAPMATCH_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Identity store file (overrides SNAPMATCH_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn identities from detector output for uploaded photos
    Learn {
        /// Detection JSON files (one photo or a list of photos each)
        #[arg(required = true)]
        detections: Vec<PathBuf>,
    },
    /// Match a single-face scan against known identities
    Recognize {
        /// Detection JSON for the scan
        detections: PathBuf,
    },
    /// List known identities
    Identities,
    /// Show the effective matching configuration
    Config,
    /// Letterbox and normalize an image for the external detector
    Preprocess {
        input: PathBuf,
        output: PathBuf,
    },
}

/// Exit status for a scan that did not match or must be retaken.
const EXIT_NO_MATCH: u8 = 1;
/// Exit status for malformed input.
const EXIT_INPUT: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut engine_config = EngineConfig::from_env();
    if let Some(path) = cli.config.clone() {
        engine_config.config_path = Some(path);
    }
    if let Some(path) = cli.store.clone() {
        engine_config.store_path = path;
    }

    // RUST_LOG wins; otherwise the configured level. Warnings from this first
    // read are not visible yet and repeat when the configuration is loaded again.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(MatchingConfig::load(engine_config.config_path.as_deref()).log_level)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Learn { detections } => learn(&engine_config, &detections).await,
        Commands::Recognize { detections } => recognize(&engine_config, detections),
        Commands::Identities => identities(&engine_config),
        Commands::Config => {
            let config = MatchingConfig::load(engine_config.config_path.as_deref());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Preprocess { input, output } => {
            let config = MatchingConfig::load(engine_config.config_path.as_deref());
            let image = image::open(&input).with_context(|| format!("failed to open {}", input.display()))?;
            let prepared = Preprocessor::new(&config).prepare(&image);
            prepared
                .image
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            let lb = prepared.letterbox;
            println!("scale={} pad_x={} pad_y={}", lb.scale, lb.pad_x, lb.pad_y);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn learn(config: &EngineConfig, files: &[PathBuf]) -> Result<ExitCode> {
    let mut photos = Vec::new();
    for file in files {
        photos.extend(load_detections(file)?);
    }

    let resolver = open_resolver(config)?;
    let handle = spawn_learner(resolver, config.checkpoint_every, config.queue_depth)?;
    let report = learn_batch(&handle, photos).await;
    handle.finish().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

fn recognize(config: &EngineConfig, file: PathBuf) -> Result<ExitCode> {
    let photos = load_detections(&file)?;
    let (image_path, face) = match scan_face(&file, photos) {
        Ok(scan) => scan,
        Err(message) => {
            eprintln!("{message}");
            return Ok(ExitCode::from(EXIT_INPUT));
        }
    };

    let resolver = open_resolver(config)?;
    let image = image::open(&image_path).map_err(|source| EngineError::Image {
        path: image_path.clone(),
        source,
    })?;

    let result = match resolver.recognize(&face.embedding, &image, &face.bbox) {
        Ok(result) => result,
        Err(ResolveError::Input(e)) => {
            eprintln!("{e}");
            return Ok(ExitCode::from(EXIT_INPUT));
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(match result.status {
        MatchStatus::Matched => ExitCode::SUCCESS,
        MatchStatus::NoMatch => {
            eprintln!("no photos found for this face");
            ExitCode::from(EXIT_NO_MATCH)
        }
        MatchStatus::LowQuality => {
            eprintln!("scan quality too low, please rescan");
            ExitCode::from(EXIT_NO_MATCH)
        }
    })
}

/// Pick the single photo and face of a scan, before any image is decoded.
fn scan_face(file: &Path, mut photos: Vec<PhotoDetections>) -> Result<(PathBuf, FaceDetection), String> {
    if photos.len() != 1 {
        return Err(format!(
            "expected detections for exactly one scan in {}, found {}",
            file.display(),
            photos.len()
        ));
    }
    let scan = photos.remove(0);
    let face = single_face(&scan.faces).map_err(|e| e.to_string())?.clone();
    Ok((scan.image, face))
}

fn identities(config: &EngineConfig) -> Result<ExitCode> {
    let store = IdentityStore::open(&config.store_path)?;
    let table = store.lookup_all();
    for identity in table.identities() {
        println!("{}\t{}", identity.id, identity.reference_count());
    }
    tracing::debug!(identities = table.len(), "identities listed");
    Ok(ExitCode::SUCCESS)
}
