use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{ImageSource, MultiFacePolicy, Pipeline, TemplateStore, Timeouts};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facematch", about = "Face enrollment and 1:1 verification")]
struct Cli {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, env = "FACEMATCH_MODEL_DIR", default_value_os_t = facematch_core::default_model_dir())]
    model_dir: PathBuf,

    /// Directory holding enrolled templates
    #[arg(long, env = "FACEMATCH_TEMPLATE_DIR", default_value = "templates")]
    template_dir: PathBuf,

    /// Embedding dimension produced by the recognizer
    #[arg(long, default_value_t = facematch_core::ARCFACE_EMBEDDING_DIM)]
    dim: usize,

    /// Reject photos containing more than one face instead of using the best one
    #[arg(long)]
    reject_multiple_faces: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a template from one or more photos of the same person
    Train {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Score a probe photo against a stored template (lower = closer)
    Predict {
        template: String,
        image: PathBuf,
        /// Print "match" when the distance is at or below this value
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Show a stored template's metadata
    Inspect { template: String },
    /// List stored templates
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = TemplateStore::open(&cli.template_dir)
        .with_context(|| format!("opening template dir {}", cli.template_dir.display()))?;

    match cli.command {
        Commands::Train { ref images } => {
            tracing::debug!(images = images.len(), "enrolling");
            let pipeline = load_pipeline(&cli, store)?;
            let sources = read_images(images).await?;
            let name = pipeline.train(sources).await?;
            println!("{name}");
        }
        Commands::Predict {
            ref template,
            ref image,
            threshold,
        } => {
            let pipeline = load_pipeline(&cli, store)?;
            let probe = read_image(image).await?;
            let distance = pipeline.predict(template, probe).await?;
            println!("{}", verdict(distance, threshold));
        }
        Commands::Inspect { ref template } => {
            let t = store.load(template)?;
            let summary = serde_json::json!({
                "template": template,
                "sample_count": t.sample_count,
                "dimension": t.dim(),
                "model_version": t.model_version,
                "created_at": t.created_at.map(|c| c.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::List => {
            let names = store.list()?;
            if names.is_empty() {
                eprintln!("No templates enrolled in {}", store.dir().display());
            }
            for name in names {
                println!("{name}");
            }
        }
    }

    Ok(())
}

fn load_pipeline(cli: &Cli, store: TemplateStore) -> Result<Pipeline<facematch_core::EngineHandle>> {
    let policy = if cli.reject_multiple_faces {
        MultiFacePolicy::Reject
    } else {
        MultiFacePolicy::First
    };
    let engine = facematch_core::spawn_engine(
        &cli.model_dir.join(facematch_core::DETECTOR_MODEL_FILE),
        &cli.model_dir.join(facematch_core::RECOGNIZER_MODEL_FILE),
        policy,
        4,
    )
    .with_context(|| format!("loading models from {}", cli.model_dir.display()))?;
    Ok(Pipeline::new(engine, store, cli.dim, Timeouts::default()))
}

async fn read_image(path: &Path) -> Result<ImageSource> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(ImageSource::Raw(bytes))
}

async fn read_images(paths: &[PathBuf]) -> Result<Vec<ImageSource>> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        sources.push(read_image(path).await?);
    }
    Ok(sources)
}

/// The distance, followed by a verdict when a threshold was given.
fn verdict(distance: f64, threshold: Option<f64>) -> String {
    match threshold {
        Some(t) if distance <= t => format!("{distance}\tmatch"),
        Some(_) => format!("{distance}\tno match"),
        None => distance.to_string(),
    }
}
