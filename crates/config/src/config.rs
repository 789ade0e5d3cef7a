//! Runtime configuration for the classifier service.
//!
//! Values come from `CLASSIFIER_*` environment variables, optionally seeded
//! from a `.env` file. Every value has a default so a bare checkout can serve
//! and train against `./data/raw` and `./models`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Name reported by `GET /status` when none is configured.
pub const DEFAULT_MODEL_NAME: &str = "ResNet50_Animal_Classifier";

/// Fewest generations the artifact store may keep (current + previous).
pub const MIN_KEEP_GENERATIONS: usize = 2;

/// Hyperparameters handed to the training collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSettings {
    /// Number of passes over the training split.
    pub epochs: usize,
    /// Images per optimizer step.
    pub batch_size: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// Square input size in pixels.
    pub image_size: u32,
    /// Fraction of every class held out for validation.
    pub validation_split: f64,
    /// Maximum random rotation in degrees, applied in both directions.
    pub rotation_range: f32,
    /// Randomly mirror training images.
    pub horizontal_flip: bool,
    /// Seed for shuffling and augmentation.
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 32,
            learning_rate: 1e-4,
            image_size: 224,
            validation_split: 0.2,
            rotation_range: 20.0,
            horizontal_flip: true,
            seed: 42,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub bind_addr: SocketAddr,
    /// Root of the labeled-by-folder image corpus.
    pub dataset_dir: PathBuf,
    /// Directory owned by the artifact store.
    pub model_dir: PathBuf,
    /// Model name reported by the status endpoint.
    pub model_name: String,
    /// Minimum number of images before the dataset is reported ready.
    pub ready_threshold: usize,
    /// Request body limit for uploads and predictions.
    pub max_upload_bytes: usize,
    /// Model generations kept on disk, including the current one.
    pub keep_generations: usize,
    /// How long an observed finished job stays queryable.
    pub job_retention: Duration,
    /// Training hyperparameters.
    pub training: TrainingSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            dataset_dir: PathBuf::from("data/raw"),
            model_dir: PathBuf::from("models"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            ready_threshold: 10,
            max_upload_bytes: 50 * 1024 * 1024,
            keep_generations: 3,
            job_retention: Duration::from_secs(600),
            training: TrainingSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// A `.env` file in the working directory is read first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup, falling back to
    /// defaults for absent keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a present value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let training_defaults = defaults.training.clone();

        let keep_generations: usize =
            parse_or(&lookup, "CLASSIFIER_KEEP_GENERATIONS", defaults.keep_generations)?;

        let training = TrainingSettings {
            epochs: parse_or(&lookup, "CLASSIFIER_EPOCHS", training_defaults.epochs)?,
            batch_size: parse_or(&lookup, "CLASSIFIER_BATCH_SIZE", training_defaults.batch_size)?,
            learning_rate: parse_or(
                &lookup,
                "CLASSIFIER_LEARNING_RATE",
                training_defaults.learning_rate,
            )?,
            image_size: parse_or(&lookup, "CLASSIFIER_IMAGE_SIZE", training_defaults.image_size)?,
            validation_split: parse_or(
                &lookup,
                "CLASSIFIER_VALIDATION_SPLIT",
                training_defaults.validation_split,
            )?,
            rotation_range: parse_or(
                &lookup,
                "CLASSIFIER_ROTATION_RANGE",
                training_defaults.rotation_range,
            )?,
            horizontal_flip: parse_or(
                &lookup,
                "CLASSIFIER_HORIZONTAL_FLIP",
                training_defaults.horizontal_flip,
            )?,
            seed: parse_or(&lookup, "CLASSIFIER_SEED", training_defaults.seed)?,
        };

        if training.batch_size == 0 {
            anyhow::bail!("CLASSIFIER_BATCH_SIZE must be greater than zero");
        }
        if training.image_size == 0 {
            anyhow::bail!("CLASSIFIER_IMAGE_SIZE must be greater than zero");
        }
        if !(0.0..1.0).contains(&training.validation_split) {
            anyhow::bail!("CLASSIFIER_VALIDATION_SPLIT must be in [0, 1)");
        }

        Ok(Self {
            bind_addr: parse_or(&lookup, "CLASSIFIER_BIND_ADDR", defaults.bind_addr)?,
            dataset_dir: lookup("CLASSIFIER_DATASET_DIR").map_or(defaults.dataset_dir, PathBuf::from),
            model_dir: lookup("CLASSIFIER_MODEL_DIR").map_or(defaults.model_dir, PathBuf::from),
            model_name: lookup("CLASSIFIER_MODEL_NAME").unwrap_or(defaults.model_name),
            ready_threshold: parse_or(
                &lookup,
                "CLASSIFIER_READY_THRESHOLD",
                defaults.ready_threshold,
            )?,
            max_upload_bytes: parse_or(
                &lookup,
                "CLASSIFIER_MAX_UPLOAD_BYTES",
                defaults.max_upload_bytes,
            )?,
            keep_generations: keep_generations.max(MIN_KEEP_GENERATIONS),
            job_retention: Duration::from_secs(parse_or(
                &lookup,
                "CLASSIFIER_JOB_RETENTION_SECS",
                defaults.job_retention.as_secs(),
            )?),
            training,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
