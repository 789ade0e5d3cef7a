//! Train command - runs one retraining job in the foreground.

use anyhow::{Result, bail};
use classifier_structs::{JobOutcome, RetrainJob};
use config::Config;
use image_dataset::DatasetDirectory;
use tracing::info;
use uuid::Uuid;

use super::{engine, open_store};
use crate::retrain::RetrainRunner;

/// Runs the train command.
///
/// # Errors
///
/// Returns an error if the job fails.
pub async fn run(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let runner = RetrainRunner::new(
        DatasetDirectory::new(&config.dataset_dir),
        store,
        engine(),
        &config.training,
    );

    info!(
        epochs = config.training.epochs,
        batch_size = config.training.batch_size,
        learning_rate = config.training.learning_rate,
        "Starting training"
    );

    let job = tokio::task::spawn_blocking(move || {
        let mut job = RetrainJob::new(Uuid::new_v4());
        runner.run_job(&mut job);
        job
    })
    .await?;

    match job.outcome {
        Some(JobOutcome::Completed { metadata }) => {
            info!(
                classes = ?metadata.classes,
                accuracy = metadata.accuracy,
                validation_accuracy = ?metadata.validation_accuracy,
                samples = metadata.sample_count,
                "Training complete, model promoted"
            );
            Ok(())
        }
        Some(JobOutcome::Failed { kind, error }) => bail!("Training failed ({kind:?}): {error}"),
        None => bail!("Training stopped in state {}", job.state),
    }
}
