//! Training loop for the image classifier.

use anyhow::{Result, anyhow};
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use crate::TrainingConfig;
use crate::augment::Augmenter;
use crate::dataset::{ImageBatcher, ImageDataset};
use crate::engine::argmax;
use crate::model::ImageClassifier;
use crate::rng::shuffle_indices;

/// Metrics for one finished epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based epoch number.
    pub epoch: usize,
    pub epochs: usize,
    pub train_loss: f32,
    /// Share of correctly classified training samples during the epoch.
    pub train_accuracy: f32,
    /// Accuracy on the validation set, when one exists.
    pub validation_accuracy: Option<f32>,
}

/// Output from training.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub final_train_loss: f32,
    /// Training accuracy of the final epoch.
    pub final_train_accuracy: f32,
    pub final_validation_accuracy: Option<f32>,
    pub epochs_completed: usize,
}

/// Trains `model` on `train_set`.
///
/// Each epoch shuffles the training set, augments every batch, and takes one
/// Adam step per batch on the cross-entropy loss. `on_epoch` is called after
/// each epoch. Images that fail to decode are skipped; accuracy is measured
/// over the images that were seen.
///
/// # Errors
///
/// Returns an error if the training set is empty, no image of an epoch could
/// be decoded, or tensor data cannot be read back.
pub fn train<B: AutodiffBackend>(
    model: &mut ImageClassifier<B>,
    train_set: &ImageDataset,
    validation_set: Option<&ImageDataset>,
    config: &TrainingConfig,
    device: &B::Device,
    on_epoch: &mut dyn FnMut(&EpochReport),
) -> Result<TrainingOutput> {
    if train_set.is_empty() {
        return Err(anyhow!("No training data provided"));
    }
    if config.epochs == 0 {
        return Err(anyhow!("Training needs at least one epoch"));
    }

    let batch_size = config.batch_size.max(1);
    let batcher = ImageBatcher::<B>::new(device.clone());
    let mut augmenter = Augmenter::new(config.rotation_range, config.horizontal_flip, config.seed);
    let mut optimizer = AdamConfig::new().init();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut report = None;

    for epoch in 0..config.epochs {
        let mut epoch_loss = 0.0;
        let mut batch_count = 0u32;
        let mut correct = 0;
        let mut seen = 0;

        let num_samples = train_set.len();
        let mut indices: Vec<usize> = (0..num_samples).collect();
        shuffle_indices(&mut indices, config.seed.wrapping_add(epoch as u64));

        for batch_indices in indices.chunks(batch_size) {
            let items: Vec<_> = batch_indices
                .iter()
                .filter_map(|&i| train_set.get(i))
                .map(|mut item| {
                    augmenter.apply(&mut item.image);
                    item
                })
                .collect();

            if items.is_empty() {
                continue;
            }

            seen += items.len();
            let batch = batcher.batch(items);
            let logits = model.forward(batch.images);
            let [_, num_classes] = logits.dims();
            let loss = loss_fn.forward(logits.clone(), batch.targets);

            let scores: Vec<f32> = logits
                .into_data()
                .to_vec()
                .map_err(|e| anyhow!("Failed to read logits: {e:?}"))?;
            correct += count_correct(&scores, num_classes, &batch.labels);

            let loss_value = loss
                .clone()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow!("Failed to read loss: {e:?}"))?
                .first()
                .copied()
                .unwrap_or(0.0);
            epoch_loss += f64::from(loss_value);
            batch_count += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, model);
            *model = optimizer.step(config.learning_rate, model.clone(), grads);
        }

        if seen == 0 {
            return Err(anyhow!("None of the {num_samples} training images could be decoded"));
        }
        let train_loss = (epoch_loss / f64::from(batch_count)) as f32;
        let train_accuracy = correct as f32 / seen as f32;

        let validation_accuracy = match validation_set {
            Some(valid) if !valid.is_empty() => Some(evaluate(&model.valid(), valid, device)?),
            _ => None,
        };

        let epoch_report = EpochReport {
            epoch: epoch + 1,
            epochs: config.epochs,
            train_loss,
            train_accuracy,
            validation_accuracy,
        };
        log_progress(&epoch_report);
        on_epoch(&epoch_report);
        report = Some(epoch_report);
    }

    let last = report.ok_or_else(|| anyhow!("Training produced no epochs"))?;
    Ok(TrainingOutput {
        final_train_loss: last.train_loss,
        final_train_accuracy: last.train_accuracy,
        final_validation_accuracy: last.validation_accuracy,
        epochs_completed: config.epochs,
    })
}

/// Computes classification accuracy on a dataset without gradients.
///
/// Images that fail to decode are left out; an empty or fully unreadable
/// dataset scores 0.
///
/// # Errors
///
/// Returns an error if tensor data cannot be read back.
pub fn evaluate<B: Backend>(
    model: &ImageClassifier<B>,
    dataset: &ImageDataset,
    device: &B::Device,
) -> Result<f32> {
    const BATCH_SIZE: usize = 64;

    let num_samples = dataset.len();
    if num_samples == 0 {
        return Ok(0.0);
    }

    let batcher = ImageBatcher::<B>::new(device.clone());
    let mut correct = 0;
    let mut seen = 0;

    for batch_start in (0..num_samples).step_by(BATCH_SIZE) {
        let batch_end = (batch_start + BATCH_SIZE).min(num_samples);
        let items: Vec<_> = (batch_start..batch_end)
            .filter_map(|i| dataset.get(i))
            .collect();
        if items.is_empty() {
            continue;
        }

        seen += items.len();
        let batch = batcher.batch(items);
        let logits = model.forward(batch.images);
        let [_, num_classes] = logits.dims();
        let scores: Vec<f32> = logits
            .into_data()
            .to_vec()
            .map_err(|e| anyhow!("Failed to read logits: {e:?}"))?;
        correct += count_correct(&scores, num_classes, &batch.labels);
    }

    if seen == 0 {
        return Ok(0.0);
    }
    Ok(correct as f32 / seen as f32)
}

/// Counts rows of `scores` whose argmax equals the label.
fn count_correct(scores: &[f32], num_classes: usize, labels: &[usize]) -> usize {
    if num_classes == 0 {
        return 0;
    }
    scores
        .chunks_exact(num_classes)
        .zip(labels)
        .filter(|(row, label)| argmax(row) == Some(**label))
        .count()
}

fn log_progress(report: &EpochReport) {
    match report.validation_accuracy {
        Some(valid) => info!(
            epoch = report.epoch,
            epochs = report.epochs,
            train_loss = report.train_loss,
            train_accuracy = report.train_accuracy,
            validation_accuracy = valid,
            "Epoch finished"
        ),
        None => info!(
            epoch = report.epoch,
            epochs = report.epochs,
            train_loss = report.train_loss,
            train_accuracy = report.train_accuracy,
            "Epoch finished"
        ),
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use image_dataset::LabeledImage;

    use super::*;
    use crate::dataset::ImageLoader;
    use crate::preprocess::{CHANNELS, PreparedImage};

    type TestBackend = Autodiff<NdArray>;

    const SIZE: usize = 8;

    /// Renders `red` paths as solid red and everything else as solid blue.
    struct SolidColorLoader;

    impl ImageLoader for SolidColorLoader {
        fn load_image(&self, path: &Path, image_size: usize) -> Result<PreparedImage> {
            let color = if path.starts_with("red") {
                [1.0, 0.0, 0.0]
            } else {
                [0.0, 0.0, 1.0]
            };
            let plane = image_size * image_size;
            let mut data = Vec::with_capacity(CHANNELS * plane);
            for channel in color {
                data.extend(std::iter::repeat_n(channel, plane));
            }
            PreparedImage::from_chw(image_size, data)
        }
    }

    fn red_and_blue(per_class: usize) -> ImageDataset {
        let mut samples = Vec::new();
        for i in 0..per_class {
            samples.push(LabeledImage {
                path: PathBuf::from("red").join(i.to_string()),
                label: 0,
            });
            samples.push(LabeledImage {
                path: PathBuf::from("blue").join(i.to_string()),
                label: 1,
            });
        }
        ImageDataset::with_loader(samples, SIZE, Arc::new(SolidColorLoader))
    }

    fn config() -> TrainingConfig {
        TrainingConfig::new()
            .with_epochs(2)
            .with_batch_size(4)
            .with_image_size(SIZE)
            .with_learning_rate(1e-2)
    }

    #[test]
    fn test_training() {
        let device = Default::default();
        let config = config();
        let mut model: ImageClassifier<TestBackend> = config.classifier(2).init(&device);

        let mut reports = Vec::new();
        let output = train(
            &mut model,
            &red_and_blue(6),
            Some(&red_and_blue(1)),
            &config,
            &device,
            &mut |report| reports.push(report.clone()),
        )
        .expect("Training should succeed");

        assert_eq!(output.epochs_completed, 2);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].epoch, 2);
        assert!((0.0..=1.0).contains(&output.final_train_accuracy));
        assert!(output.final_train_loss.is_finite());
        let valid = output.final_validation_accuracy.expect("validation accuracy");
        assert!((0.0..=1.0).contains(&valid));
    }

    #[test]
    fn test_training_without_validation() {
        let device = Default::default();
        let config = config().with_epochs(1);
        let mut model: ImageClassifier<TestBackend> = config.classifier(2).init(&device);

        let output = train(&mut model, &red_and_blue(2), None, &config, &device, &mut |_| {})
            .expect("Training should succeed");

        assert!(output.final_validation_accuracy.is_none());
    }

    #[test]
    fn test_empty_training_set_is_an_error() {
        let device = Default::default();
        let config = config();
        let mut model: ImageClassifier<TestBackend> = config.classifier(2).init(&device);

        let result = train(
            &mut model,
            &ImageDataset::new(Vec::new(), SIZE),
            None,
            &config,
            &device,
            &mut |_| {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unreadable_training_set_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = Default::default();
        let config = config().with_epochs(1);
        let mut model: ImageClassifier<TestBackend> = config.classifier(2).init(&device);

        let missing = (0..2)
            .map(|label| LabeledImage {
                path: dir.path().join(format!("missing-{label}.png")),
                label,
            })
            .collect();
        let result = train(
            &mut model,
            &ImageDataset::new(missing, SIZE),
            None,
            &config,
            &device,
            &mut |_| {},
        );

        let error = result.expect_err("nothing to train on");
        assert!(error.to_string().contains("could be decoded"));
    }

    #[test]
    fn test_count_correct_uses_first_max() {
        let scores = [0.5, 0.5, 0.1, 0.9, 0.3, 0.3];
        assert_eq!(count_correct(&scores, 2, &[0, 1, 0]), 3);
        assert_eq!(count_correct(&scores, 2, &[1, 0, 1]), 0);
    }
}
