use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure category carried by failed jobs and API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    DatasetMissing,
    DatasetEmpty,
    ModelUnavailable,
    InvalidClassName,
    InvalidFileType,
    InvalidImage,
    TrainingFailure,
    StorageCorruption,
    Io,
}

impl FailureKind {
    /// Returns the name used in serialized job results.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DatasetMissing => "DatasetMissing",
            Self::DatasetEmpty => "DatasetEmpty",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::InvalidClassName => "InvalidClassName",
            Self::InvalidFileType => "InvalidFileType",
            Self::InvalidImage => "InvalidImage",
            Self::TrainingFailure => "TrainingFailure",
            Self::StorageCorruption => "StorageCorruption",
            Self::Io => "Io",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the classifier components.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Dataset directory not found: {}", .0.display())]
    DatasetMissing(PathBuf),

    #[error("No images found in data directory: {}", .0.display())]
    DatasetEmpty(PathBuf),

    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Invalid class name: {0:?}")]
    InvalidClassName(String),

    #[error("File must be an image, got content type {0:?}")]
    InvalidFileType(String),

    #[error("Could not decode image: {0}")]
    InvalidImage(String),

    #[error("Training failed: {0}")]
    TrainingFailure(String),

    #[error("Stored model is corrupt: {0}")]
    StorageCorruption(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ClassifierError {
    /// Wraps an IO error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the failure category of this error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::DatasetMissing(_) => FailureKind::DatasetMissing,
            Self::DatasetEmpty(_) => FailureKind::DatasetEmpty,
            Self::ModelUnavailable => FailureKind::ModelUnavailable,
            Self::InvalidClassName(_) => FailureKind::InvalidClassName,
            Self::InvalidFileType(_) => FailureKind::InvalidFileType,
            Self::InvalidImage(_) => FailureKind::InvalidImage,
            Self::TrainingFailure(_) => FailureKind::TrainingFailure,
            Self::StorageCorruption(_) => FailureKind::StorageCorruption,
            Self::Io { .. } => FailureKind::Io,
        }
    }
}

impl From<anyhow::Error> for ClassifierError {
    fn from(error: anyhow::Error) -> Self {
        Self::TrainingFailure(format!("{error:#}"))
    }
}

/// Result alias for classifier operations.
pub type ClassifierResult<T> = Result<T, ClassifierError>;
