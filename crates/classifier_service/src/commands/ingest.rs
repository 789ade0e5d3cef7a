//! Ingest command - copies a folder of images into the dataset.

use std::path::Path;

use anyhow::Result;
use config::Config;
use image_dataset::DatasetDirectory;
use tracing::info;

/// Runs the ingest command.
///
/// # Errors
///
/// Returns an error if the class name is invalid or the folder cannot be read.
pub fn run(config: &Config, class_name: &str, folder: &Path) -> Result<()> {
    info!(
        class_name,
        folder = %folder.display(),
        "Ingesting images"
    );

    let dataset = DatasetDirectory::new(&config.dataset_dir);
    let copied = dataset.ingest_folder(class_name, folder)?;
    let summary = dataset.summarize()?;

    info!(
        copied,
        total = summary.total,
        ready = summary.is_ready(config.ready_threshold),
        "Ingest complete"
    );
    Ok(())
}
