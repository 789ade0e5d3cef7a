//! Image classifier built on the Burn deep learning framework.
//!
//! This crate defines the network, turns image files into tensors, trains
//! the network on a [`image_dataset::TrainingSplit`] and packs the result
//! into an opaque [`classifier_structs::ModelArtifact`]. The serving side only
//! sees the [`ModelEngine`] and [`Classifier`] traits.

mod artifact;
mod augment;
mod dataset;
mod engine;
mod model;
mod preprocess;
mod rng;
mod training;

use burn::prelude::*;

pub use artifact::{decode_artifact, encode_artifact};
pub use augment::Augmenter;
pub use dataset::{
    FileImageLoader, ImageBatch, ImageBatcher, ImageDataset, ImageItem, ImageLoader,
};
pub use engine::{BurnClassifier, BurnEngine, Classifier, FitOutput, ModelEngine, argmax};
pub use model::ImageClassifier;
pub use preprocess::{CHANNELS, PreparedImage, prepare_image};
pub use training::{EpochReport, TrainingOutput, train};

/// Architecture of the image classifier.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Number of output classes.
    pub num_classes: usize,
    /// Side length of the square input image.
    #[config(default = 224)]
    pub image_size: usize,
    /// Channels of the first convolution block.
    #[config(default = 8)]
    pub conv1_channels: usize,
    /// Channels of the second convolution block.
    #[config(default = 16)]
    pub conv2_channels: usize,
    /// Units of the dense layer before the output.
    #[config(default = 64)]
    pub hidden_size: usize,
}

/// Configuration for training the classifier.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Number of passes over the training split.
    #[config(default = 3)]
    pub epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    /// Learning rate for the Adam optimizer.
    #[config(default = 1e-4)]
    pub learning_rate: f64,
    /// Images are resized to `image_size × image_size`.
    #[config(default = 224)]
    pub image_size: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
    /// Maximum random rotation in degrees, either direction.
    #[config(default = 20.0)]
    pub rotation_range: f32,
    #[config(default = true)]
    pub horizontal_flip: bool,
    /// Seed for shuffling, augmentation and weight init.
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Returns the architecture for a model trained with this config.
    #[must_use]
    pub fn classifier(&self, num_classes: usize) -> ClassifierConfig {
        ClassifierConfig::new(num_classes)
            .with_image_size(self.image_size)
            .with_hidden_size(self.hidden_size)
    }
}
