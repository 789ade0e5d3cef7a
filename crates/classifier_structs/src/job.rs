//! Retraining job lifecycle.
//!
//! A job moves strictly forward through
//! `Queued → Initializing → Training → Saving → Completed`, or jumps to
//! `Failed` from any non-terminal state. Terminal states never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{ClassifierError, FailureKind, ModelMetadata};

/// Lifecycle state of a retraining job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Initializing,
    Training,
    Saving,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Initializing => "Initializing",
            Self::Training => "Training",
            Self::Saving => "Saving",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Queued, Self::Initializing)
            | (Self::Initializing, Self::Training)
            | (Self::Training, Self::Saving)
            | (Self::Saving, Self::Completed) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Final result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum JobOutcome {
    Completed {
        #[serde(flatten)]
        metadata: ModelMetadata,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

/// A retraining job and everything observed about it so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainJob {
    pub id: Uuid,
    pub state: JobState,
    /// Human-readable progress message.
    pub message: Option<String>,
    /// Every state the job has been in, oldest first.
    pub history: Vec<JobState>,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set the first time a client reads the job in a terminal state.
    #[serde(skip)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RetrainJob {
    /// Creates a job in the `Queued` state.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Queued,
            message: Some("Waiting for a worker...".to_string()),
            history: vec![JobState::Queued],
            outcome: None,
            created_at: now,
            updated_at: now,
            observed_at: None,
        }
    }

    /// Moves to a non-terminal successor state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the move is not strictly forward or
    /// targets a terminal state (use [`Self::complete`] / [`Self::fail`]).
    pub fn advance(
        &mut self,
        next: JobState,
        message: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if next.is_terminal() {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.transition(next, message)
    }

    /// Replaces the progress message without changing state.
    ///
    /// Ignored once the job is terminal, so the final message sticks.
    pub fn set_message(&mut self, message: impl Into<String>) {
        if !self.state.is_terminal() {
            self.message = Some(message.into());
            self.updated_at = Utc::now();
        }
    }

    /// Marks the job completed with the promoted model's metadata.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the job is `Saving`.
    pub fn complete(&mut self, metadata: ModelMetadata) -> Result<(), InvalidTransition> {
        self.transition(JobState::Completed, Some("Training complete.".to_string()))?;
        self.outcome = Some(JobOutcome::Completed { metadata });
        Ok(())
    }

    /// Marks the job failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the job already finished.
    pub fn fail(&mut self, error: &ClassifierError) -> Result<(), InvalidTransition> {
        let description = error.to_string();
        self.transition(JobState::Failed, Some(description.clone()))?;
        self.outcome = Some(JobOutcome::Failed {
            kind: error.kind(),
            error: description,
        });
        Ok(())
    }

    fn transition(
        &mut self,
        next: JobState,
        message: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.message = message;
        self.history.push(next);
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata {
            classes: vec!["Cat".to_string(), "Dog".to_string()],
            accuracy: 0.8,
            trained_at: Utc::now(),
            sample_count: 9,
            validation_accuracy: Some(0.5),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = RetrainJob::new(Uuid::new_v4());
        job.advance(JobState::Initializing, None).expect("queued -> initializing");
        job.advance(JobState::Training, None).expect("initializing -> training");
        job.advance(JobState::Saving, None).expect("training -> saving");
        job.complete(sample_metadata()).expect("saving -> completed");

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
        assert!(matches!(job.outcome, Some(JobOutcome::Completed { .. })));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        let mut job = RetrainJob::new(Uuid::new_v4());
        assert!(job.advance(JobState::Training, None).is_err());
        job.advance(JobState::Initializing, None).expect("forward");
        assert!(job.advance(JobState::Queued, None).is_err());
        assert!(job.complete(sample_metadata()).is_err());
        assert_eq!(job.state, JobState::Initializing);
    }

    #[test]
    fn test_fail_from_any_running_state_is_terminal() {
        let mut job = RetrainJob::new(Uuid::new_v4());
        job.advance(JobState::Initializing, None).expect("forward");
        job.fail(&ClassifierError::DatasetEmpty(PathBuf::from("data")))
            .expect("initializing -> failed");

        assert_eq!(job.state, JobState::Failed);
        assert!(matches!(
            job.outcome,
            Some(JobOutcome::Failed {
                kind: FailureKind::DatasetEmpty,
                ..
            })
        ));
        assert!(job.fail(&ClassifierError::ModelUnavailable).is_err());
        assert!(job.advance(JobState::Training, None).is_err());
    }

    #[test]
    fn test_message_is_frozen_after_finish() {
        let mut job = RetrainJob::new(Uuid::new_v4());
        job.advance(JobState::Initializing, None).expect("forward");
        job.set_message("Epoch 1/3");
        assert_eq!(job.message.as_deref(), Some("Epoch 1/3"));
        assert_eq!(job.history.len(), 2);

        job.fail(&ClassifierError::ModelUnavailable).expect("fail");
        job.set_message("late update");
        assert_eq!(job.message.as_deref(), Some("Model not loaded"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let failed = JobOutcome::Failed {
            kind: FailureKind::DatasetMissing,
            error: "Dataset directory not found.".to_string(),
        };
        let json = serde_json::to_value(&failed).expect("serialize");
        assert_eq!(json["status"], "Failed");
        assert_eq!(json["kind"], "DatasetMissing");

        let completed = JobOutcome::Completed {
            metadata: sample_metadata(),
        };
        let json = serde_json::to_value(&completed).expect("serialize");
        assert_eq!(json["status"], "Completed");
        assert_eq!(json["classes"], serde_json::json!(["Cat", "Dog"]));
    }
}
