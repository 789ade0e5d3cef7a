//! CLI command implementations.

mod device;
pub mod ingest;
pub mod predict;
pub mod serve;
pub mod status;
pub mod train;

use std::sync::Arc;

use anyhow::Result;
use artifact_store::ArtifactStore;
use burn::backend::{Autodiff, NdArray};
use config::Config;
use ml_model::{BurnEngine, ModelEngine};
use tracing::info;

pub use device::init_device;

/// Backend every command trains and predicts with.
pub type Backend = Autodiff<NdArray>;

/// Builds the model engine on the default device.
#[must_use]
pub fn engine() -> Arc<dyn ModelEngine> {
    Arc::new(BurnEngine::<Backend>::new(init_device()))
}

/// Opens the artifact store for promoting.
///
/// Crash recovery runs as part of opening, unless another process is
/// promoting at the same moment.
///
/// # Errors
///
/// Returns an error if the model directory cannot be created or scanned.
pub fn open_store(config: &Config) -> Result<Arc<ArtifactStore>> {
    let store = ArtifactStore::open(&config.model_dir, config.keep_generations)?;
    info!(
        model_dir = %config.model_dir.display(),
        generation = ?store.current_generation(),
        "Opened model store"
    );
    Ok(Arc::new(store))
}

/// Opens the artifact store for loading only, leaving any in-flight
/// promotion by a running server alone.
#[must_use]
pub fn open_store_read_only(config: &Config) -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::open_read_only(&config.model_dir))
}
