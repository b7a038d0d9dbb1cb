use aishare_core::store::person_from_file_name;
use aishare_core::{
    Annotator, EnrollOutcome, ImageSource, ModelStore, NearestNeighborMatcher, OnnxEncoder, Scope,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aishare", about = "AIShare face enrollment and recognition CLI")]
struct Cli {
    /// Root directory of the per-person model files
    #[arg(long, env = "AISHARE_MODEL_ROOT", default_value = "face_models", global = true)]
    models_dir: PathBuf,

    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, env = "AISHARE_ONNX_DIR", global = true)]
    onnx_dir: Option<PathBuf>,

    /// TrueType font for labels on annotated images
    #[arg(long, env = "AISHARE_FONT_PATH", global = true)]
    font: Option<PathBuf>,

    /// Maximum embedding distance for a positive match
    #[arg(
        long,
        env = "AISHARE_MATCH_THRESHOLD",
        default_value_t = aishare_core::MATCH_THRESHOLD,
        value_parser = parse_threshold,
        global = true
    )]
    threshold: f32,

    /// ONNX Runtime intra-op threads
    #[arg(long, env = "AISHARE_INTRA_THREADS", default_value_t = 2, global = true)]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScopeArgs {
    /// Store models under this user
    #[arg(long)]
    username: Option<String>,
    /// Narrow the user scope to one instance
    #[arg(long)]
    unique_id: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> Scope {
        Scope::resolve(self.username.as_deref(), self.unique_id.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from photos, replacing any previous model
    Train {
        /// Person name the model is stored under
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Photos of the person
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify faces in photos and write annotated copies
    Predict {
        /// Directory for annotated PNGs
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled models
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove an enrolled model, by person name or model file name
    Remove {
        name: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = ModelStore::new(&cli.models_dir);

    match &cli.command {
        Commands::Train { name, scope, images } => {
            let mut encoder = load_encoder(&cli)?;
            let sources: Vec<ImageSource> = images.iter().cloned().map(ImageSource::from).collect();
            match aishare_core::enroll(&mut encoder, &store, &scope.scope(), name, &sources)? {
                EnrollOutcome::Saved {
                    path,
                    embeddings,
                    skipped,
                } => {
                    println!("Model saved to {}", path.display());
                    println!("  {embeddings} face(s) enrolled, {skipped} image(s) skipped");
                }
                EnrollOutcome::NoUsableFaces { skipped } => {
                    bail!("training failed: none of the {skipped} image(s) contained a usable face");
                }
            }
        }
        Commands::Predict { out, scope, images } => {
            let mut encoder = load_encoder(&cli)?;
            let annotator = Annotator::discover(cli.font.as_deref())?;
            let matcher = NearestNeighborMatcher {
                threshold: cli.threshold,
            };
            let gallery = store.load_all(&scope.scope())?;
            std::fs::create_dir_all(out).with_context(|| format!("cannot create {}", out.display()))?;

            let mut results: BTreeMap<String, Vec<String>> = BTreeMap::new();
            let mut faces_out = Vec::new();
            for (path, file_name) in images.iter().zip(annotated_names(images)) {
                let image = match ImageSource::from(path.clone()).load_rgb() {
                    Ok(image) => image,
                    Err(e) => {
                        tracing::warn!(image = %path.display(), error = %e, "skipping unreadable image");
                        continue;
                    }
                };
                let recognition = aishare_core::recognize(&mut encoder, &matcher, image, &gallery)?;
                if recognition.faces.is_empty() {
                    continue;
                }

                let annotated = annotator.annotate(&recognition.image, &recognition.faces);
                let out_path = out.join(file_name);
                annotated
                    .save(&out_path)
                    .with_context(|| format!("cannot write {}", out_path.display()))?;
                let out_str = out_path.display().to_string();

                for face in &recognition.faces {
                    let entry = results.entry(face.identity.name().to_string()).or_default();
                    if !entry.contains(&out_str) {
                        entry.push(out_str.clone());
                    }
                    faces_out.push(json!({
                        "image": path.display().to_string(),
                        "name": face.identity.name(),
                        "confidence": face.confidence,
                        "location": face.location,
                    }));
                }
            }

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "results": results, "faces": faces_out }))?
            );
        }
        Commands::List { scope } => {
            let models = store.list(&scope.scope())?;
            if models.is_empty() {
                println!("No models enrolled");
            }
            for model in models {
                println!("{model}");
            }
        }
        Commands::Remove { name, scope } => {
            let person = person_from_file_name(name).unwrap_or(name);
            let path = store.delete(&scope.scope(), person)?;
            println!("Removed {}", path.display());
        }
    }

    Ok(())
}

fn load_encoder(cli: &Cli) -> Result<OnnxEncoder> {
    let dir = cli.onnx_dir.clone().unwrap_or_else(aishare_core::default_onnx_dir);
    OnnxEncoder::load(&dir, cli.threads)
        .with_context(|| format!("cannot load ONNX models from {}", dir.display()))
}

fn parse_threshold(value: &str) -> Result<f32, String> {
    let threshold: f32 = value.trim().parse().map_err(|e| format!("{e}"))?;
    if threshold.is_nan() || threshold <= 0.0 {
        return Err(format!("threshold must be positive, got {value}"));
    }
    Ok(threshold)
}

/// Output file names for annotated copies, one per input.
///
/// `photos/party.jpg` -> `party_annotated.png`; later inputs sharing a stem
/// get a counter (`party_2_annotated.png`) so no output is overwritten.
fn annotated_names(paths: &[PathBuf]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    paths
        .iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            let mut name = format!("{stem}_annotated.png");
            let mut n = 1;
            while used.contains(&name) {
                n += 1;
                name = format!("{stem}_{n}_annotated.png");
            }
            used.insert(name.clone());
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train() {
        let cli = Cli::try_parse_from([
            "aishare", "--models-dir", "/tmp/m", "train", "--name", "Alice", "--username", "bob", "a.jpg", "b.jpg",
        ])
        .unwrap();
        assert_eq!(cli.models_dir, PathBuf::from("/tmp/m"));
        let Commands::Train { name, scope, images } = cli.command else {
            panic!("expected train");
        };
        assert_eq!(name, "Alice");
        assert_eq!(scope.scope(), Scope::User("bob".into()));
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn test_train_requires_images() {
        assert!(Cli::try_parse_from(["aishare", "train", "--name", "Alice"]).is_err());
    }

    #[test]
    fn test_annotated_names() {
        let names = annotated_names(&[PathBuf::from("photos/party.jpg"), PathBuf::from("..")]);
        assert_eq!(names, vec!["party_annotated.png", "image_annotated.png"]);
    }

    #[test]
    fn test_annotated_names_shared_stem_stay_distinct() {
        let names = annotated_names(&[
            PathBuf::from("a/x.jpg"),
            PathBuf::from("b/x.png"),
            PathBuf::from("c/x.jpeg"),
        ]);
        assert_eq!(names, vec!["x_annotated.png", "x_2_annotated.png", "x_3_annotated.png"]);

        // An input whose own stem matches a generated name still gets a fresh one.
        let names = annotated_names(&[PathBuf::from("x.jpg"), PathBuf::from("x.png"), PathBuf::from("x_2.jpg")]);
        assert_eq!(names, vec!["x_annotated.png", "x_2_annotated.png", "x_2_2_annotated.png"]);
    }

    #[test]
    fn test_threshold_must_be_positive() {
        let cli = Cli::try_parse_from(["aishare", "--threshold", "0.55", "list"]).unwrap();
        assert_eq!(cli.threshold, 0.55);
        for bad in ["0", "-0.4", "NaN", "high"] {
            assert!(
                Cli::try_parse_from(["aishare", "--threshold", bad, "list"]).is_err(),
                "accepted {bad}"
            );
        }
    }
}
