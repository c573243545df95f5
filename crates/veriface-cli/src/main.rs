use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use veriface_core::{Embedder, Matcher, OnnxEmbedder, ScanMatcher, DEFAULT_MATCH_THRESHOLD};
use veriface_store::{rebuild_from_store, FaceIndex, GalleryStore};

#[derive(Parser)]
#[command(name = "veriface", about = "Veriface gallery administration CLI")]
struct Cli {
    /// Gallery images directory (default: $XDG_DATA_HOME/veriface/images).
    #[arg(long)]
    images_dir: Option<PathBuf>,
    /// Embedding cache database (default: $XDG_DATA_HOME/veriface/faces.db).
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Directory containing the ONNX model files.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an image file to the gallery and cache its embeddings
    Add {
        /// Image file to add
        path: PathBuf,
        /// Gallery id to store it under (default: the file name)
        #[arg(long)]
        id: Option<String>,
        /// Replace an existing entry with the same id
        #[arg(long)]
        overwrite: bool,
    },
    /// List gallery entries with their cached face counts
    List,
    /// Remove a gallery entry
    Remove {
        /// Gallery id to remove
        id: String,
    },
    /// Match a probe image against the gallery
    Match {
        /// Probe image file
        path: PathBuf,
        /// Maximum cosine distance for a match
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Compare two gallery entries directly
    Compare {
        a: String,
        b: String,
        /// Maximum cosine distance for a match
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Re-scan the gallery and refresh the embedding cache
    Rebuild,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("veriface");

    let images_dir = cli
        .images_dir
        .or_else(|| std::env::var("VERIFACE_IMAGES_DIR").map(PathBuf::from).ok())
        .unwrap_or_else(|| data_dir.join("images"));
    let db_path = cli
        .db_path
        .or_else(|| std::env::var("VERIFACE_DB_PATH").map(PathBuf::from).ok())
        .unwrap_or_else(|| data_dir.join("faces.db"));
    let model_dir = cli
        .model_dir
        .or_else(|| std::env::var("VERIFACE_MODEL_DIR").map(PathBuf::from).ok())
        .unwrap_or_else(veriface_core::default_model_dir);

    let store = GalleryStore::open(&images_dir, &db_path)?;

    match cli.command {
        Commands::Add {
            path,
            id,
            overwrite,
        } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let id = match id {
                Some(id) => id,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_owned)
                    .context("file has no usable name; pass --id")?,
            };

            let mut embedder = OnnxEmbedder::load(&model_dir)?;
            let outcome = embedder.embed(&bytes)?;

            store.put(&id, &bytes, overwrite)?;
            store.store_embeddings(
                &id,
                &GalleryStore::content_hash(&bytes),
                embedder.scheme(),
                &outcome.embeddings,
            )?;
            println!("added {id} ({} face(s))", outcome.faces_detected());
        }
        Commands::List => {
            let infos = store.list()?;
            if infos.is_empty() {
                println!("gallery is empty");
            }
            for info in infos {
                match info.faces {
                    Some(faces) => println!("{}\t{faces} face(s)", info.id),
                    None => println!("{}\t(not yet embedded)", info.id),
                }
            }
        }
        Commands::Remove { id } => {
            store.remove(&id)?;
            println!("removed {id}");
        }
        Commands::Match { path, threshold } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let threshold = threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD);

            let mut embedder = OnnxEmbedder::load(&model_dir)?;
            let index = FaceIndex::new();
            rebuild_from_store(&store, &index, &mut embedder)?;

            let outcome = embedder.embed(&bytes)?;
            if outcome.embeddings.is_empty() {
                bail!("no face detected in {}", path.display());
            }

            let snapshot = index.current_snapshot();
            for (i, embedding) in outcome.embeddings.iter().enumerate() {
                let result = ScanMatcher.best_match(embedding, snapshot.entries(), threshold);
                match result.owner_id {
                    Some(owner) => println!(
                        "face {i}: {owner} (distance {:.4}, threshold {threshold})",
                        result.distance
                    ),
                    None => println!(
                        "face {i}: no match (closest distance {:.4}, threshold {threshold})",
                        result.distance
                    ),
                }
            }
        }
        Commands::Compare { a, b, threshold } => {
            let threshold = threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD);
            let bytes_a = store.get(&a)?;
            let bytes_b = store.get(&b)?;

            let mut embedder = OnnxEmbedder::load(&model_dir)?;
            let embedding_a = embedder
                .embed(&bytes_a)?
                .embeddings
                .into_iter()
                .next()
                .with_context(|| format!("no face detected in {a}"))?;
            let embedding_b = embedder
                .embed(&bytes_b)?
                .embeddings
                .into_iter()
                .next()
                .with_context(|| format!("no face detected in {b}"))?;

            let distance = embedding_a.cosine_distance(&embedding_b);
            let verdict = if distance <= threshold { "MATCH" } else { "no match" };
            println!("{a} vs {b}: {verdict} (distance {distance:.4}, threshold {threshold})");
        }
        Commands::Rebuild => {
            let mut embedder = OnnxEmbedder::load(&model_dir)?;
            let index = FaceIndex::new();
            let stats = rebuild_from_store(&store, &index, &mut embedder)?;
            println!(
                "rebuilt: {} image(s), {} face(s), {} reused, {} embedded",
                stats.images, stats.faces, stats.reused, stats.embedded
            );
        }
    }

    Ok(())
}
