//! Training and inference capabilities consumed by the service.

use std::sync::{Mutex, PoisonError};

use anyhow::{Result, anyhow, ensure};
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use classifier_structs::ModelArtifact;
use image_dataset::TrainingSplit;
use tracing::{debug, info};

use crate::artifact::{decode_artifact, encode_artifact};
use crate::dataset::{ImageBatcher, ImageDataset};
use crate::model::ImageClassifier;
use crate::preprocess::PreparedImage;
use crate::training::{EpochReport, train};
use crate::{ClassifierConfig, TrainingConfig};

type WeightsRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Result of a successful training run.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub artifact: ModelArtifact,
    /// Training accuracy of the final epoch.
    pub accuracy: f32,
    pub validation_accuracy: Option<f32>,
    /// Number of images in the training split.
    pub train_samples: usize,
}

/// Something that can train a classifier and load trained ones back.
pub trait ModelEngine: Send + Sync {
    /// Trains a new model on `data`.
    ///
    /// Output index `i` of the produced model is `data.classes[i]`.
    ///
    /// # Errors
    ///
    /// Returns an error if images cannot be loaded or training fails.
    fn fit(
        &self,
        data: &TrainingSplit,
        config: &TrainingConfig,
        on_epoch: &mut dyn FnMut(&EpochReport),
    ) -> Result<FitOutput>;

    /// Rebuilds a classifier from an artifact produced by [`Self::fit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be decoded.
    fn load(&self, artifact: &ModelArtifact) -> Result<Box<dyn Classifier>>;
}

/// A loaded model ready for inference.
pub trait Classifier: Send + Sync {
    fn num_classes(&self) -> usize;

    /// Side length images must be prepared at.
    fn input_size(&self) -> usize;

    /// Returns one probability per class.
    ///
    /// # Errors
    ///
    /// Returns an error if the image has the wrong size or the forward pass
    /// fails.
    fn probabilities(&self, image: &PreparedImage) -> Result<Vec<f32>>;
}

/// Index of the largest value; the first one wins on ties. NaNs are ignored.
#[must_use]
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// [`ModelEngine`] backed by the Burn image classifier.
#[derive(Debug, Clone)]
pub struct BurnEngine<B: AutodiffBackend> {
    device: B::Device,
}

impl<B: AutodiffBackend> BurnEngine<B> {
    #[must_use]
    pub const fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: AutodiffBackend> ModelEngine for BurnEngine<B> {
    fn fit(
        &self,
        data: &TrainingSplit,
        config: &TrainingConfig,
        on_epoch: &mut dyn FnMut(&EpochReport),
    ) -> Result<FitOutput> {
        ensure!(!data.train.is_empty(), "No training images");

        B::seed(config.seed);

        let train_set = ImageDataset::new(data.train.clone(), config.image_size);
        let validation_set = ImageDataset::new(data.validation.clone(), config.image_size);
        debug!(
            train = data.train.len(),
            validation = data.validation.len(),
            image_size = config.image_size,
            "Training images are decoded per batch"
        );

        let classifier_config = config.classifier(data.num_classes());
        let mut model: ImageClassifier<B> = classifier_config.init(&self.device);

        let output = train(
            &mut model,
            &train_set,
            Some(&validation_set),
            config,
            &self.device,
            on_epoch,
        )?;

        let weights = Recorder::<B::InnerBackend>::record(
            &WeightsRecorder::default(),
            model.valid().into_record(),
            (),
        )
        .map_err(|e| anyhow!("Failed to serialize model weights: {e:?}"))?;
        let artifact = encode_artifact(&classifier_config, &weights)?;

        info!(
            classes = data.num_classes(),
            accuracy = output.final_train_accuracy,
            artifact_bytes = artifact.len(),
            "Model trained"
        );

        Ok(FitOutput {
            artifact: ModelArtifact::new(artifact),
            accuracy: output.final_train_accuracy,
            validation_accuracy: output.final_validation_accuracy,
            train_samples: data.train.len(),
        })
    }

    fn load(&self, artifact: &ModelArtifact) -> Result<Box<dyn Classifier>> {
        let classifier = BurnClassifier::<B::InnerBackend>::from_artifact(artifact, &self.device)?;
        Ok(Box::new(classifier))
    }
}

/// Burn model wrapped for shared inference.
pub struct BurnClassifier<B: Backend> {
    model: Mutex<ImageClassifier<B>>,
    config: ClassifierConfig,
    device: B::Device,
}

impl<B: Backend> BurnClassifier<B> {
    /// Decodes an artifact into a ready model.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope or the weight record is invalid.
    pub fn from_artifact(artifact: &ModelArtifact, device: &B::Device) -> Result<Self> {
        let (config, weights) = decode_artifact(artifact.as_bytes())?;
        let record: <ImageClassifier<B> as Module<B>>::Record =
            Recorder::<B>::load(&WeightsRecorder::default(), weights.to_vec(), device)
                .map_err(|e| anyhow!("Failed to load model weights: {e:?}"))?;
        let model = config.init::<B>(device).load_record(record);

        Ok(Self {
            model: Mutex::new(model),
            config,
            device: device.clone(),
        })
    }
}

impl<B: Backend> Classifier for BurnClassifier<B> {
    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn input_size(&self) -> usize {
        self.config.image_size
    }

    fn probabilities(&self, image: &PreparedImage) -> Result<Vec<f32>> {
        ensure!(
            image.size() == self.config.image_size,
            "Image is {0}x{0}, model expects {1}x{1}",
            image.size(),
            self.config.image_size
        );

        let input = ImageBatcher::<B>::new(self.device.clone()).single(image);
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        model
            .probabilities(input)
            .into_data()
            .to_vec()
            .map_err(|e| anyhow!("Failed to read probabilities: {e:?}"))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};
    use image_dataset::DatasetDirectory;

    use super::*;
    use crate::preprocess::prepare_image;
    use crate::preprocess::tests::solid_png;

    type TestEngine = BurnEngine<Autodiff<NdArray>>;

    #[test]
    fn test_argmax_first_occurrence_wins() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), Some(0));
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_fit_then_load_and_predict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = DatasetDirectory::new(dir.path());
        for i in 0..4 {
            dataset
                .append("Cat", &solid_png(10, 10, [200, 30, 30]), &format!("c{i}.png"), "image/png")
                .expect("append");
            dataset
                .append("Dog", &solid_png(10, 10, [30, 30, 200]), &format!("d{i}.png"), "image/png")
                .expect("append");
        }
        let split = dataset.training_split(0.25).expect("split");

        let engine = TestEngine::new(Default::default());
        let config = TrainingConfig::new()
            .with_epochs(1)
            .with_batch_size(4)
            .with_image_size(8);

        let mut epochs = 0;
        let output = engine
            .fit(&split, &config, &mut |_| epochs += 1)
            .expect("fit");
        assert_eq!(epochs, 1);
        assert_eq!(output.train_samples, 6);
        assert!((0.0..=1.0).contains(&output.accuracy));

        let classifier = engine.load(&output.artifact).expect("load");
        assert_eq!(classifier.num_classes(), 2);
        assert_eq!(classifier.input_size(), 8);

        let image = prepare_image(&solid_png(12, 12, [200, 30, 30]), classifier.input_size())
            .expect("prepare");
        let probs = classifier.probabilities(&image).expect("predict");
        assert_eq!(probs.len(), 2);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);

        let wrong_size = prepare_image(&solid_png(4, 4, [0, 0, 0]), 4).expect("prepare");
        assert!(classifier.probabilities(&wrong_size).is_err());
    }

    #[test]
    fn test_fit_skips_a_corrupt_upload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = DatasetDirectory::new(dir.path());
        for i in 0..3 {
            dataset
                .append("Cat", &solid_png(10, 10, [200, 30, 30]), &format!("c{i}.png"), "image/png")
                .expect("append");
            dataset
                .append("Dog", &solid_png(10, 10, [30, 30, 200]), &format!("d{i}.png"), "image/png")
                .expect("append");
        }
        dataset
            .append("Dog", b"not an image", "zz-corrupt.png", "image/png")
            .expect("append");
        let split = dataset.training_split(0.0).expect("split");
        assert_eq!(split.train.len(), 7);

        let engine = TestEngine::new(Default::default());
        let config = TrainingConfig::new()
            .with_epochs(1)
            .with_batch_size(8)
            .with_image_size(8);

        let mut epochs = 0;
        let output = engine
            .fit(&split, &config, &mut |_| epochs += 1)
            .expect("one corrupt file must not abort training");
        assert_eq!(epochs, 1);
        assert!((0.0..=1.0).contains(&output.accuracy));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let engine = TestEngine::new(Default::default());
        assert!(engine.load(&ModelArtifact::new(b"garbage".to_vec())).is_err());
    }
}
