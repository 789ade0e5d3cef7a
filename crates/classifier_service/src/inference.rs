//! Prediction against the currently promoted model.

use std::sync::{Arc, PoisonError, RwLock};

use artifact_store::ArtifactStore;
use classifier_structs::{ClassifierError, ClassifierResult, ModelMetadata};
use ml_model::{Classifier, ModelEngine, argmax, prepare_image};
use tracing::{debug, info};

/// A decoded model together with the metadata it was promoted with.
pub struct LoadedModel {
    pub generation: u64,
    pub metadata: ModelMetadata,
    pub classifier: Box<dyn Classifier>,
}

/// Result of one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    pub probabilities: Vec<f32>,
}

/// Serves predictions, reloading the classifier when a new generation is
/// promoted.
pub struct InferenceService {
    store: Arc<ArtifactStore>,
    engine: Arc<dyn ModelEngine>,
    cache: RwLock<Option<Arc<LoadedModel>>>,
}

impl InferenceService {
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>, engine: Arc<dyn ModelEngine>) -> Self {
        Self {
            store,
            engine,
            cache: RwLock::new(None),
        }
    }

    /// Metadata of the current model, or `None` if no valid model is stored.
    #[must_use]
    pub fn status(&self) -> Option<ModelMetadata> {
        self.store.load().map(|stored| stored.metadata)
    }

    /// Returns the current model, loading it if the generation changed.
    ///
    /// # Errors
    ///
    /// `ModelUnavailable` if nothing is promoted, `StorageCorruption` if the
    /// stored pair is broken or does not decode into a matching classifier.
    pub fn current(&self) -> ClassifierResult<Arc<LoadedModel>> {
        let generation = self
            .store
            .current_generation()
            .ok_or(ClassifierError::ModelUnavailable)?;

        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|model| model.generation == generation)
        {
            return Ok(Arc::clone(cached));
        }

        let stored = self.store.try_load()?;
        let classifier = self.engine.load(&stored.artifact).map_err(|e| {
            ClassifierError::StorageCorruption(format!("artifact does not decode: {e:#}"))
        })?;
        if classifier.num_classes() != stored.metadata.classes.len() {
            return Err(ClassifierError::StorageCorruption(format!(
                "model has {} outputs but metadata lists {} classes",
                classifier.num_classes(),
                stored.metadata.classes.len()
            )));
        }

        let loaded = Arc::new(LoadedModel {
            generation: stored.generation,
            metadata: stored.metadata,
            classifier,
        });
        info!(generation = loaded.generation, classes = ?loaded.metadata.classes, "Loaded model");

        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Classifies an encoded image.
    ///
    /// The label is `metadata.classes[argmax]`; on ties the lowest index wins.
    ///
    /// # Errors
    ///
    /// `ModelUnavailable` / `StorageCorruption` as for [`Self::current`],
    /// `InvalidImage` if the bytes do not decode, `TrainingFailure` if the
    /// forward pass fails.
    pub fn predict(&self, image_bytes: &[u8]) -> ClassifierResult<Prediction> {
        let model = self.current()?;

        let image = prepare_image(image_bytes, model.classifier.input_size())
            .map_err(|e| ClassifierError::InvalidImage(format!("{e:#}")))?;
        let probabilities = model.classifier.probabilities(&image)?;

        let index = argmax(&probabilities).ok_or_else(|| {
            ClassifierError::TrainingFailure("model produced no usable probabilities".to_string())
        })?;
        let label = model
            .metadata
            .label_for(index)
            .ok_or_else(|| {
                ClassifierError::StorageCorruption(format!("no class for output index {index}"))
            })?
            .to_string();

        debug!(generation = model.generation, label = %label, index, "Predicted class");
        Ok(Prediction {
            label,
            index,
            probabilities,
        })
    }
}
