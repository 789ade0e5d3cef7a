//! Status command - prints the served model and dataset summary.

use anyhow::Result;
use config::Config;
use image_dataset::DatasetDirectory;
use serde_json::json;

use super::open_store_read_only;

/// Runs the status command.
///
/// # Errors
///
/// Returns an error if the store or dataset cannot be read.
pub fn run(config: &Config) -> Result<()> {
    let store = open_store_read_only(config);
    let stored = store.load();
    let summary = DatasetDirectory::new(&config.dataset_dir).summarize()?;

    let report = json!({
        "model_name": config.model_name,
        "generation": stored.as_ref().map(|s| s.generation),
        "model_info": stored.map(|s| s.metadata),
        "dataset": {
            "class_distribution": summary.counts,
            "total_images": summary.total,
            "ready_to_train": summary.is_ready(config.ready_threshold),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
