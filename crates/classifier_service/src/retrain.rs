//! The retraining job: dataset in, promoted model out.

use std::sync::Arc;

use artifact_store::ArtifactStore;
use chrono::Utc;
use classifier_structs::{ClassifierResult, JobState, ModelMetadata, RetrainJob};
use config::TrainingSettings;
use image_dataset::DatasetDirectory;
use ml_model::{ModelEngine, TrainingConfig};
use tracing::{error, info, warn};

/// Progress reported while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobProgress {
    /// The job moved to a new state.
    Entered(JobState, String),
    /// The job is still in the same state; only the message changed.
    Message(String),
}

/// Runs retraining jobs against one dataset, store and engine.
pub struct RetrainRunner {
    dataset: DatasetDirectory,
    store: Arc<ArtifactStore>,
    engine: Arc<dyn ModelEngine>,
    training: TrainingConfig,
    validation_split: f32,
}

impl RetrainRunner {
    #[must_use]
    pub fn new(
        dataset: DatasetDirectory,
        store: Arc<ArtifactStore>,
        engine: Arc<dyn ModelEngine>,
        settings: &TrainingSettings,
    ) -> Self {
        Self {
            dataset,
            store,
            engine,
            training: training_config(settings),
            validation_split: settings.validation_split as f32,
        }
    }

    /// Trains on the current dataset and promotes the result.
    ///
    /// Reports `Initializing`, `Training` and `Saving` through `progress` as
    /// it enters them. Nothing is promoted unless every step succeeds.
    ///
    /// # Errors
    ///
    /// `DatasetMissing` / `DatasetEmpty` from discovery, `TrainingFailure`
    /// from the engine, or a store error from promotion.
    pub fn run(&self, progress: &mut dyn FnMut(JobProgress)) -> ClassifierResult<ModelMetadata> {
        progress(JobProgress::Entered(
            JobState::Initializing,
            "Initializing training...".to_string(),
        ));
        let split = self.dataset.training_split(self.validation_split)?;

        let num_classes = split.num_classes();
        progress(JobProgress::Entered(
            JobState::Training,
            format!("Training on {num_classes} classes..."),
        ));
        let fit = self.engine.fit(&split, &self.training, &mut |report| {
            progress(JobProgress::Message(format!(
                "Training on {num_classes} classes... epoch {}/{}, accuracy {:.3}",
                report.epoch, report.epochs, report.train_accuracy
            )));
        })?;

        progress(JobProgress::Entered(
            JobState::Saving,
            "Saving model...".to_string(),
        ));
        let metadata = ModelMetadata {
            classes: split.classes,
            accuracy: fit.accuracy.clamp(0.0, 1.0),
            trained_at: Utc::now(),
            sample_count: fit.train_samples,
            validation_accuracy: fit.validation_accuracy.map(|v| v.clamp(0.0, 1.0)),
        };
        let generation = self.store.promote(&fit.artifact, &metadata)?;
        info!(generation, classes = ?metadata.classes, "Retrained model promoted");

        Ok(metadata)
    }

    /// Runs a job to a terminal state, recording every step on `job`.
    pub fn run_job(&self, job: &mut RetrainJob) {
        let result = self.run(&mut |update| apply_progress(job, update));
        finish(job, result);
    }
}

/// Maps service settings onto the engine's training config.
#[must_use]
pub fn training_config(settings: &TrainingSettings) -> TrainingConfig {
    TrainingConfig::new()
        .with_epochs(settings.epochs)
        .with_batch_size(settings.batch_size)
        .with_learning_rate(settings.learning_rate)
        .with_image_size(settings.image_size as usize)
        .with_rotation_range(settings.rotation_range)
        .with_horizontal_flip(settings.horizontal_flip)
        .with_seed(settings.seed)
}

/// Applies one progress update to a job record.
pub fn apply_progress(job: &mut RetrainJob, update: JobProgress) {
    match update {
        JobProgress::Entered(state, message) => {
            if let Err(error) = job.advance(state, Some(message)) {
                warn!(job_id = %job.id, %error, "Ignoring out-of-order job update");
            }
        }
        JobProgress::Message(message) => job.set_message(message),
    }
}

/// Moves a job to `Completed` or `Failed`.
pub fn finish(job: &mut RetrainJob, result: ClassifierResult<ModelMetadata>) {
    let recorded = match result {
        Ok(metadata) => {
            info!(
                job_id = %job.id,
                accuracy = metadata.accuracy,
                sample_count = metadata.sample_count,
                "Retraining job completed"
            );
            job.complete(metadata)
        }
        Err(failure) => {
            error!(job_id = %job.id, kind = %failure.kind(), error = %failure, "Retraining job failed");
            job.fail(&failure)
        }
    };
    if let Err(error) = recorded {
        warn!(job_id = %job.id, %error, "Could not record job result");
    }
}

#[cfg(test)]
mod tests {
    use classifier_structs::{FailureKind, JobOutcome};
    use uuid::Uuid;

    use super::*;
    use crate::testing::{StubEngine, fixture};

    #[test]
    fn test_empty_dataset_fails_during_initializing() {
        let fixture = fixture(StubEngine::new(vec![0.5, 0.5]));
        let mut job = RetrainJob::new(Uuid::new_v4());

        fixture.runner.run_job(&mut job);

        assert_eq!(
            job.history,
            vec![JobState::Queued, JobState::Initializing, JobState::Failed]
        );
        assert!(matches!(
            job.outcome,
            Some(JobOutcome::Failed {
                kind: FailureKind::DatasetEmpty,
                ..
            })
        ));
        assert!(fixture.store.load().is_none());
    }

    #[test]
    fn test_class_without_images_is_dataset_empty() {
        let fixture = fixture(StubEngine::new(vec![0.5, 0.5]));
        std::fs::create_dir_all(fixture.dataset.root().join("Cat")).expect("mkdir");
        std::fs::write(fixture.dataset.root().join("Cat").join("notes.txt"), b"x").expect("write");
        let mut job = RetrainJob::new(Uuid::new_v4());

        fixture.runner.run_job(&mut job);

        assert!(!job.history.contains(&JobState::Training));
        assert!(matches!(
            job.outcome,
            Some(JobOutcome::Failed {
                kind: FailureKind::DatasetEmpty,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_dataset_is_dataset_missing() {
        let fixture = fixture(StubEngine::new(vec![0.5, 0.5]));
        std::fs::remove_dir_all(fixture.dataset.root()).expect("remove root");
        let mut job = RetrainJob::new(Uuid::new_v4());

        fixture.runner.run_job(&mut job);

        assert!(matches!(
            job.outcome,
            Some(JobOutcome::Failed {
                kind: FailureKind::DatasetMissing,
                ..
            })
        ));
    }

    #[test]
    fn test_successful_run_promotes_sorted_classes() {
        let fixture = fixture(StubEngine::new(vec![0.2, 0.8]));
        fixture.add_images("Dog", 6);
        fixture.add_images("Cat", 5);
        let mut job = RetrainJob::new(Uuid::new_v4());

        fixture.runner.run_job(&mut job);

        assert_eq!(
            job.history,
            vec![
                JobState::Queued,
                JobState::Initializing,
                JobState::Training,
                JobState::Saving,
                JobState::Completed,
            ]
        );
        let Some(JobOutcome::Completed { metadata }) = &job.outcome else {
            panic!("job did not complete: {:?}", job.outcome);
        };
        assert_eq!(metadata.classes, vec!["Cat".to_string(), "Dog".to_string()]);
        assert_eq!(metadata.sample_count, 9);

        let stored = fixture.store.load().expect("promoted model");
        assert_eq!(&stored.metadata, metadata);
    }

    #[test]
    fn test_engine_failure_promotes_nothing() {
        let fixture = fixture(StubEngine::failing());
        fixture.add_images("Cat", 3);
        let mut job = RetrainJob::new(Uuid::new_v4());

        fixture.runner.run_job(&mut job);

        assert_eq!(job.state, JobState::Failed);
        assert!(job.history.contains(&JobState::Training));
        assert!(!job.history.contains(&JobState::Saving));
        assert!(matches!(
            job.outcome,
            Some(JobOutcome::Failed {
                kind: FailureKind::TrainingFailure,
                ..
            })
        ));
        assert!(fixture.store.load().is_none());
    }

    #[test]
    fn test_training_config_follows_settings() {
        let settings = TrainingSettings {
            epochs: 7,
            image_size: 64,
            ..TrainingSettings::default()
        };
        let config = training_config(&settings);
        assert_eq!(config.epochs, 7);
        assert_eq!(config.image_size, 64);
        assert_eq!(config.batch_size, settings.batch_size);
    }
}
