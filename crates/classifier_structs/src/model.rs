use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque trained-model payload.
///
/// The serving side never looks inside; only the ML engine that produced it
/// knows how to turn it back into a classifier.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelArtifact(Vec<u8>);

impl ModelArtifact {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("len", &self.0.len())
            .finish()
    }
}

impl From<Vec<u8>> for ModelArtifact {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Structured facts about a trained model.
///
/// `classes` is stored in the exact index order of the model's output layer,
/// which is always the sorted order of the discovered class names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Class names, sorted; index `i` is output `i` of the model.
    pub classes: Vec<String>,
    /// Training accuracy at the end of the final epoch, in `[0, 1]`.
    pub accuracy: f32,
    /// When training finished.
    pub trained_at: DateTime<Utc>,
    /// Number of samples in the training split.
    pub sample_count: usize,
    /// Accuracy on the held-out split, when one existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_accuracy: Option<f32>,
}

impl ModelMetadata {
    /// Returns the class name for a model output index.
    #[must_use]
    pub fn label_for(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// Checks the invariants a servable metadata record must hold.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("metadata lists no classes".to_string());
        }
        if !self.classes.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(format!(
                "classes are not in sorted canonical order: {:?}",
                self.classes
            ));
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(format!("accuracy {} is outside [0, 1]", self.accuracy));
        }
        if let Some(valid) = self.validation_accuracy
            && !(0.0..=1.0).contains(&valid)
        {
            return Err(format!("validation accuracy {valid} is outside [0, 1]"));
        }
        Ok(())
    }
}
