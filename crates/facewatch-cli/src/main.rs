use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_app::{
    CaptureMode, Config, Confirmation, EnrollmentController, EventBus, FaceOverlay, OverlaySink,
    RecognitionView, RosterView,
};
use facewatch_core::detector::SCRFD_MODEL_FILE;
use facewatch_core::recognizer::ARCFACE_MODEL_FILE;
use facewatch_core::{FaceApi, OnnxFaceApi};
use facewatch_hw::{Frame, SharedCamera, V4lCamera};
use facewatch_store::{SqliteStore, UserStore, IMAGES_PER_USER};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facewatch", about = "Face enrollment and live recognition")]
struct Cli {
    /// TOML config file; FACEWATCH_* environment variables still apply
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a user from three images, or from the camera if no files are given
    Enroll {
        name: String,
        /// Exactly three image files
        #[arg(short, long, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// List enrolled users
    List {
        /// Show each stored image slot
        #[arg(long)]
        images: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Delete an enrolled user
    Delete {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Label faces from the camera until interrupted
    Watch,
    /// Show configuration and storage status
    Status,
}

struct Services {
    config: Config,
    api: Arc<OnnxFaceApi>,
    users: Arc<UserStore>,
    camera: SharedCamera,
    events: EventBus,
}

impl Services {
    async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)
            .await
            .with_context(|| format!("opening {}", config.db_path.display()))?;
        let camera = SharedCamera::new(Arc::new(V4lCamera::new(config.camera_device.clone())));
        Ok(Self {
            api: Arc::new(OnnxFaceApi::new()),
            users: Arc::new(UserStore::new(Arc::new(store))),
            camera,
            events: EventBus::new(),
            config,
        })
    }

    fn enrollment(&self) -> EnrollmentController {
        EnrollmentController::new(
            self.api.clone(),
            self.users.clone(),
            self.camera.clone(),
            self.config.camera_request(),
            self.events.clone(),
        )
    }
}

/// Prints each scanned frame's labels. Frames without faces print nothing.
struct TerminalSink;

impl OverlaySink for TerminalSink {
    fn render(&self, frame: &Frame, overlays: &[FaceOverlay]) {
        if overlays.is_empty() {
            return;
        }
        let labels: Vec<String> = overlays.iter().map(ToString::to_string).collect();
        println!("[{:>6}] {}", frame.sequence, labels.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let services = Services::open(config).await?;

    match cli.command {
        Commands::Enroll { name, files } => enroll(&services, name, files).await,
        Commands::List { images, json } => list(&services, images, json).await,
        Commands::Delete { name, yes } => delete(&services, &name, yes).await,
        Commands::Watch => watch(&services).await,
        Commands::Status => status(&services).await,
    }
}

async fn enroll(services: &Services, name: String, files: Vec<PathBuf>) -> Result<()> {
    services.api.load_models(&services.config.model_dir).await?;

    let controller = services.enrollment();
    let mode = if files.is_empty() {
        CaptureMode::Camera
    } else {
        CaptureMode::Files
    };
    let mut session = controller.begin(mode).await;
    if let Some(err) = session.error() {
        bail!("{err}");
    }
    session.set_name(name);

    match mode {
        CaptureMode::Files => session.select_files(&files).await?,
        CaptureMode::Camera => {
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            while session.captured_count() < IMAGES_PER_USER {
                println!(
                    "Press Enter to capture ({}/{IMAGES_PER_USER})",
                    session.captured_count()
                );
                if stdin.next_line().await?.is_none() {
                    session.close();
                    bail!("enrollment cancelled");
                }
                if let Err(e) = session.capture().await {
                    println!("{e}");
                }
            }
        }
    }

    let saved = session.submit().await?;
    println!("Enrolled {saved}");
    Ok(())
}

async fn list(services: &Services, images: bool, json: bool) -> Result<()> {
    let mut roster = RosterView::new(services.users.clone(), services.events.clone());
    let records = roster.load().await?;

    if json {
        let value: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "slots": r.images.iter().map(|i| i.slot).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No users enrolled");
        return Ok(());
    }
    for record in records {
        println!("{} ({} images)", record.name, record.images.len());
        if images {
            for image in &record.images {
                println!(
                    "  {}: {} bytes {}",
                    image.slot,
                    image.image.bytes().len(),
                    image.image.mime()
                );
            }
        }
    }
    Ok(())
}

async fn delete(services: &Services, name: &str, yes: bool) -> Result<()> {
    let confirmation = if yes {
        Confirmation::Confirmed
    } else {
        confirm(&mut BufReader::new(tokio::io::stdin()).lines(), name).await?
    };

    let mut roster = RosterView::new(services.users.clone(), services.events.clone());
    match roster.delete(name, confirmation).await? {
        true => println!("Deleted {name}"),
        false if confirmation == Confirmation::Declined => println!("Cancelled"),
        false => println!("No user named {name}"),
    }
    Ok(())
}

async fn confirm(stdin: &mut Lines<BufReader<Stdin>>, name: &str) -> Result<Confirmation> {
    println!("Delete {name}? [y/N]");
    let answer = stdin.next_line().await?.unwrap_or_default();
    Ok(if answer.trim().eq_ignore_ascii_case("y") {
        Confirmation::Confirmed
    } else {
        Confirmation::Declined
    })
}

async fn watch(services: &Services) -> Result<()> {
    let mut view = RecognitionView::new(
        services.api.clone(),
        services.users.clone(),
        services.camera.clone(),
        Arc::new(TerminalSink),
        &services.config,
    );
    view.mount().await?;
    if view.matcher().is_some_and(|m| m.is_empty()) {
        println!("No users enrolled; every face is unknown");
    }

    tokio::signal::ctrl_c().await?;
    view.unmount().await;
    Ok(())
}

async fn status(services: &Services) -> Result<()> {
    let config = &services.config;
    let users = services.users.list_users().await?;
    let camera_present = std::path::Path::new(&config.camera_device).exists();
    let models_present = [SCRFD_MODEL_FILE, ARCFACE_MODEL_FILE]
        .iter()
        .all(|file| config.model_dir.join(file).exists());

    println!("camera:    {} ({})", config.camera_device, present(camera_present));
    println!("models:    {} ({})", config.model_dir.display(), present(models_present));
    println!("database:  {}", config.db_path.display());
    println!("threshold: {}", config.match_threshold);
    println!("users:     {}", users.len());
    Ok(())
}

fn present(found: bool) -> &'static str {
    if found {
        "found"
    } else {
        "missing"
    }
}
