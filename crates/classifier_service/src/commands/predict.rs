//! Predict command - classifies one image with the promoted model.

use std::path::Path;

use anyhow::{Context, Result};
use config::Config;
use tracing::info;

use super::{engine, open_store_read_only};
use crate::inference::InferenceService;

/// Runs the predict command.
///
/// # Errors
///
/// Returns an error if the image cannot be read or no model is available.
pub fn run(config: &Config, image_path: &Path) -> Result<()> {
    let bytes = std::fs::read(image_path)
        .with_context(|| format!("Failed to read {}", image_path.display()))?;

    let inference = InferenceService::new(open_store_read_only(config), engine());
    let prediction = inference.predict(&bytes)?;

    info!(
        image = %image_path.display(),
        label = %prediction.label,
        confidence = prediction.probabilities.get(prediction.index).copied().unwrap_or_default(),
        "Prediction"
    );
    println!("{}", prediction.label);
    Ok(())
}
