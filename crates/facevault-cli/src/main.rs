mod render;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facevault_client::{Config, DemoApi, DemoOptions, HttpApi};
use facevault_core::dashboard::{load_recent_searches, load_stats, StatsView};
use facevault_core::{
    DetectedFace, DeveloperSetting, FaceVaultApi, RoutingStatus, SessionController, UploadedImage,
};

const DEFAULT_ARCHIVE_NAME: &str = "facevault_matches.zip";

#[derive(Parser)]
#[command(name = "facevault", about = "FaceVault face search client", version)]
struct Cli {
    /// Use the built-in offline backend instead of a server
    #[arg(long, global = true)]
    demo: bool,

    /// TOML config file (defaults to $FACEVAULT_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Faces the demo backend finds in every image (1-3)
    #[arg(long, global = true, default_value_t = 1)]
    demo_faces: usize,

    /// Routing outcome of demo searches
    #[arg(long, global = true, default_value = "accepted", value_parser = parse_routing)]
    demo_routing: RoutingStatus,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the faces detected in an image
    Detect {
        image: PathBuf,
    },
    /// Search for photos of a face
    Search {
        image: PathBuf,
        /// Face to search for, by id or by 1-based index from `detect`
        #[arg(short, long)]
        face: Option<String>,
        /// Also list rejected results
        #[arg(long)]
        show_rejected: bool,
        /// Show similarity scores next to each result
        #[arg(long)]
        show_similarity: bool,
        /// Show routing similarity and margin
        #[arg(long)]
        show_routing: bool,
        /// Write a zip of the matched photos (directory or file path)
        #[arg(long, value_name = "PATH")]
        download: Option<PathBuf>,
        /// Set the "save this query" privacy flag (session-local, never sent)
        #[arg(long)]
        save_query: bool,
    },
    /// Show the most recent searches
    Recent,
    /// Show system statistics
    Stats,
    /// Show backend health and the resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    log_startup(&cli, &config);

    if cli.demo {
        let api = DemoApi::new(DemoOptions {
            face_count: cli.demo_faces,
            routing: cli.demo_routing,
            ..Default::default()
        });
        run(cli.command, api, &config, true).await
    } else {
        let api = HttpApi::new(config.clone()).context("failed to build HTTP client")?;
        run(cli.command, api, &config, false).await
    }
}

async fn run<A: FaceVaultApi>(
    command: Commands,
    api: A,
    config: &Config,
    demo: bool,
) -> Result<()> {
    match command {
        Commands::Detect { image } => {
            let image = open_image(&image)?;
            let mut session = SessionController::with_settings(api, config.developer)?;
            let faces = session.upload(image).await?;
            render::print_faces(faces);
        }
        Commands::Search {
            image,
            face,
            show_rejected,
            show_similarity,
            show_routing,
            download,
            save_query,
        } => {
            let image = open_image(&image)?;
            let mut session = SessionController::with_settings(api, config.developer)?;
            // flags only enable; anything else keeps its config value
            if show_rejected {
                session.update_developer_setting(DeveloperSetting::ShowRejectedResults(true))?;
            }
            if show_similarity {
                session.update_developer_setting(DeveloperSetting::ShowSimilarityValues(true))?;
            }
            if show_routing {
                session.update_developer_setting(DeveloperSetting::ShowRoutingCandidates(true))?;
            }
            session.set_save_query(save_query);

            let faces = session.upload(image).await?.to_vec();
            let face_id = choose_face(&faces, face.as_deref())?;
            tracing::debug!(face = %face_id, detected = faces.len(), "face chosen");
            session.select_face(&face_id)?;

            let progress = render::spawn_progress(session.subscribe());
            let outcome = session.search().await;
            match &outcome {
                // the watcher ends on its own once it sees the settled phase
                Ok(_) => {
                    let _ = progress.await;
                }
                Err(_) => progress.abort(),
            }
            let response = outcome?;

            render::print_summary(&response, &session.settings());
            render::print_results(&response, &session.settings(), config);

            if let Some(path) = download {
                let archive = session.download_results().await?;
                let path = archive_path(&path);
                std::fs::write(&path, &archive)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), bytes = archive.len(), "archive written");
                println!("\nSaved {} bytes to {}", archive.len(), path.display());
            }
        }
        Commands::Recent => {
            let rows = load_recent_searches(&api).await;
            render::print_recent(&rows, chrono::Utc::now());
        }
        Commands::Stats => {
            let stats = load_stats(&api).await;
            render::print_stats(&StatsView::from_stats(stats.as_ref()));
        }
        Commands::Status => {
            if demo {
                println!("backend:  demo (offline)");
            } else {
                println!("backend:  {}", config.api_base());
            }
            println!("timeout:  {}s", config.request_timeout_secs);
            println!(
                "developer: similarity={} routing={} rejected={} threshold={:.2}",
                config.developer.show_similarity_values,
                config.developer.show_routing_candidates,
                config.developer.show_rejected_results,
                config.developer.similarity_threshold
            );
            match api.health().await {
                Ok(()) => println!("health:   ok"),
                Err(e) => {
                    println!("health:   {e}");
                    bail!("backend is not healthy");
                }
            }
        }
    }

    Ok(())
}

fn log_startup(cli: &Cli, config: &Config) {
    tracing::debug!(
        api_root = %config.api_root,
        timeout_secs = config.request_timeout_secs,
        threshold = config.developer.similarity_threshold,
        "configuration loaded"
    );
    if cli.demo {
        tracing::info!(faces = cli.demo_faces, routing = ?cli.demo_routing, "using demo backend");
    } else {
        tracing::info!(api = %config.api_base(), "using HTTP backend");
    }
}

fn open_image(path: &Path) -> Result<UploadedImage> {
    UploadedImage::open(path)
        .with_context(|| format!("cannot use {} as a search image", path.display()))
}

/// Resolve `--face` to a face id, or pick the only face.
fn choose_face(faces: &[DetectedFace], wanted: Option<&str>) -> Result<String> {
    if faces.is_empty() {
        bail!("no faces found in the image");
    }

    let Some(wanted) = wanted else {
        if let [only] = faces {
            return Ok(only.id.clone());
        }
        render::print_faces(faces);
        bail!("{} faces found; pick one with --face <ID|INDEX>", faces.len());
    };

    if let Some(face) = faces.iter().find(|f| f.id == wanted) {
        return Ok(face.id.clone());
    }
    if let Ok(index) = wanted.parse::<usize>() {
        if let Some(face) = index.checked_sub(1).and_then(|i| faces.get(i)) {
            return Ok(face.id.clone());
        }
    }
    render::print_faces(faces);
    bail!("no face matches {wanted:?}");
}

fn archive_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(DEFAULT_ARCHIVE_NAME)
    } else {
        path.to_path_buf()
    }
}

fn parse_routing(value: &str) -> Result<RoutingStatus, String> {
    match value {
        "accepted" => Ok(RoutingStatus::Accepted),
        "ambiguous" => Ok(RoutingStatus::Ambiguous),
        "low_confidence" | "gray_zone" => Ok(RoutingStatus::LowConfidence),
        "no_match" | "new_identity" => Ok(RoutingStatus::NoMatch),
        other => Err(format!(
            "unknown routing status {other:?} (accepted, ambiguous, low_confidence, no_match)"
        )),
    }
}
