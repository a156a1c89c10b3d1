use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};

use matflow::config::resolve_database_path;
use matflow::service::{recorded_state, JobState, DEFAULT_RECENT_LIMIT};
use matflow::{load_config, Config, Database, JobInput, JobService, MetadataStore};

#[derive(Parser)]
#[command(name = "matflow")]
#[command(version)]
#[command(about = "Convert study materials into page images with an AI summary", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "MATFLOW_CONFIG",
        default_value = "matflow.json"
    )]
    config: PathBuf,

    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a PDF or DOCX and wait for the job to finish
    Convert {
        file: PathBuf,

        #[arg(long)]
        material_id: String,

        #[arg(long)]
        user_id: String,

        /// JPEG quality, 1-100
        #[arg(short, long)]
        quality: Option<u8>,

        /// Extra material metadata as a JSON object
        #[arg(long, value_name = "JSON")]
        info: Option<String>,

        #[arg(long)]
        content_type: Option<String>,
    },

    /// Show the state of a job
    Status { job_id: String },

    /// List the most recent task records
    Recent {
        #[arg(short, long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    if let Err(e) = matflow::logging::init_logging(filter, cli.json_logs) {
        eprintln!("{}", e);
    }

    info!("Loading configuration from: {}", cli.config.display());
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Convert {
            file,
            material_id,
            user_id,
            quality,
            info,
            content_type,
        } => cmd_convert(&config, file, material_id, user_id, quality, info, content_type),
        Commands::Status { job_id } => cmd_status(&config, &job_id),
        Commands::Recent { limit } => cmd_recent(&config, limit),
    }
}

fn cmd_convert(
    config: &Config,
    file: PathBuf,
    material_id: String,
    user_id: String,
    quality: Option<u8>,
    info: Option<String>,
    content_type: Option<String>,
) -> Result<()> {
    let document_bytes =
        std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let extra_metadata = match info {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("--info must be valid JSON")?;
            if !value.is_object() {
                bail!("--info must be a JSON object");
            }
            value
        }
        None => serde_json::Value::Null,
    };

    let service = JobService::from_config(config).context("Failed to start job service")?;

    let job_id = service.submit(JobInput {
        document_bytes,
        filename,
        content_type,
        material_id,
        user_id,
        quality,
        extra_metadata,
    })?;
    info!("Submitted job {}", job_id);

    let state = service.wait_for(&job_id)?;
    service.shutdown();

    println!("{}", serde_json::to_string_pretty(&state)?);

    match state {
        JobState::Pending { .. } => bail!("Worker pool stopped before job {} finished", job_id),
        JobState::Failure { .. } => std::process::exit(1),
        JobState::Success { .. } => Ok(()),
    }
}

fn cmd_status(config: &Config, job_id: &str) -> Result<()> {
    let db = Database::open(&resolve_database_path(config))?;

    match recorded_state(&db, job_id)? {
        Some(state) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        None => {
            warn!("No task records for job {}", job_id);
            bail!("Unknown job '{}'", job_id)
        }
    }
}

fn cmd_recent(config: &Config, limit: usize) -> Result<()> {
    let db = Database::open(&resolve_database_path(config))?;
    let tasks = db.recent_tasks(limit)?;
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}
