use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use segtrain::{ExperimentDir, ExperimentSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "experiment", about = "Create experiment directories and append epoch metrics")]
struct Cli {
    /// Override `experiments_root` from the settings file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create `<root>/<name>` with checkpoints/, logs/ and results/.
    Init {
        name: String,
        /// Run config (.json or .toml) copied to config.json.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Append one epoch line to `<root>/<name>/logs/train.log`.
    Log {
        name: String,
        #[arg(long)]
        epoch: usize,
        #[arg(long)]
        train_loss: f64,
        #[arg(long)]
        val_loss: f64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segtrain=info,experiment=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut settings = ExperimentSettings::load();
    if let Some(root) = cli.root {
        settings.experiments_root = root;
    }

    match cli.command {
        Command::Init { name, config } => {
            let dir = ExperimentDir::create(settings.experiments_root.join(&name))?;
            if let Some(config) = config {
                let value = read_run_config(&config)?;
                let written = dir.save_config(&value)?;
                tracing::info!("Config written to {}", written.display());
            }
            println!("{}", dir.root().display());
        }
        Command::Log {
            name,
            epoch,
            train_loss,
            val_loss,
        } => {
            let dir = settings.experiment(&name);
            dir.log_metrics(epoch, train_loss, val_loss)
                .with_context(|| format!("logging epoch {epoch} for {name}"))?;
        }
    }
    Ok(())
}

fn read_run_config(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading run config {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("parsing {} as JSON", path.display())),
        Some("toml") => {
            toml::from_str(&raw).with_context(|| format!("parsing {} as TOML", path.display()))
        }
        _ => bail!(
            "unsupported run config {}: expected .json or .toml",
            path.display()
        ),
    }
}
