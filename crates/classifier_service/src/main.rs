//! Image classifier service
//!
//! HTTP API and CLI for serving, retraining and inspecting an image classifier.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use classifier_service::commands;
use config::Config;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Image classifier service
#[derive(Parser)]
#[command(name = "classifier")]
#[command(about = "Serve, retrain and query an image classifier")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dataset directory (overrides `CLASSIFIER_DATASET_DIR`)
    #[arg(long, global = true)]
    dataset_dir: Option<PathBuf>,

    /// Model directory (overrides `CLASSIFIER_MODEL_DIR`)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,

    /// Copy a folder of images into a dataset class
    Ingest {
        /// Class the images belong to
        #[arg(short, long)]
        class_name: String,

        /// Folder containing the images
        #[arg(short, long)]
        folder: PathBuf,
    },

    /// Train a model on the dataset and promote it
    Train,

    /// Classify a single image with the promoted model
    Predict {
        /// Path to the image file
        #[arg(short, long)]
        image: PathBuf,
    },

    /// Show the promoted model and dataset summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.dataset_dir {
        config.dataset_dir = dir;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    debug!(?config, "Loaded configuration");

    match cli.command {
        Commands::Serve => commands::serve::run(config).await?,
        Commands::Ingest { class_name, folder } => {
            commands::ingest::run(&config, &class_name, &folder)?;
        }
        Commands::Train => commands::train::run(&config).await?,
        Commands::Predict { image } => commands::predict::run(&config, &image)?,
        Commands::Status => commands::status::run(&config)?,
    }

    Ok(())
}
