//! Test doubles shared by the service tests.

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Result, bail};
use artifact_store::ArtifactStore;
use classifier_structs::ModelArtifact;
use config::Config;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use image_dataset::{DatasetDirectory, TrainingSplit};
use ml_model::{Classifier, EpochReport, FitOutput, ModelEngine, PreparedImage, TrainingConfig};
use tempfile::TempDir;

use crate::inference::InferenceService;
use crate::retrain::RetrainRunner;

pub const STUB_INPUT_SIZE: usize = 8;

/// Engine whose models always output the same probabilities.
pub struct StubEngine {
    probabilities: Vec<f32>,
    fail: bool,
}

impl StubEngine {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self {
            probabilities,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            probabilities: Vec::new(),
            fail: true,
        }
    }
}

impl ModelEngine for StubEngine {
    fn fit(
        &self,
        data: &TrainingSplit,
        _config: &TrainingConfig,
        on_epoch: &mut dyn FnMut(&EpochReport),
    ) -> Result<FitOutput> {
        if self.fail {
            bail!("stub engine refused to train");
        }
        on_epoch(&EpochReport {
            epoch: 1,
            epochs: 1,
            train_loss: 0.1,
            train_accuracy: 1.0,
            validation_accuracy: None,
        });
        Ok(FitOutput {
            artifact: ModelArtifact::new(serde_json::to_vec(&self.probabilities)?),
            accuracy: 1.0,
            validation_accuracy: None,
            train_samples: data.train.len(),
        })
    }

    fn load(&self, artifact: &ModelArtifact) -> Result<Box<dyn Classifier>> {
        let probabilities: Vec<f32> = serde_json::from_slice(artifact.as_bytes())?;
        Ok(Box::new(StubClassifier { probabilities }))
    }
}

struct StubClassifier {
    probabilities: Vec<f32>,
}

impl Classifier for StubClassifier {
    fn num_classes(&self) -> usize {
        self.probabilities.len()
    }

    fn input_size(&self) -> usize {
        STUB_INPUT_SIZE
    }

    fn probabilities(&self, _image: &PreparedImage) -> Result<Vec<f32>> {
        Ok(self.probabilities.clone())
    }
}

/// A dataset, store and runner rooted in one temp directory.
pub struct Fixture {
    _dir: TempDir,
    pub config: Config,
    pub dataset: DatasetDirectory,
    pub store: Arc<ArtifactStore>,
    pub engine: Arc<dyn ModelEngine>,
    pub runner: Arc<RetrainRunner>,
}

impl Fixture {
    /// Writes `count` small PNGs into `class_name`.
    pub fn add_images(&self, class_name: &str, count: usize) {
        for i in 0..count {
            self.dataset
                .append(class_name, &png_bytes([i as u8, 0, 0]), &format!("{i}.png"), "image/png")
                .expect("append image");
        }
    }

    pub fn inference(&self) -> InferenceService {
        InferenceService::new(Arc::clone(&self.store), Arc::clone(&self.engine))
    }
}

pub fn fixture(engine: StubEngine) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        dataset_dir: dir.path().join("data"),
        model_dir: dir.path().join("models"),
        ..Config::default()
    };
    std::fs::create_dir_all(&config.dataset_dir).expect("dataset dir");

    let dataset = DatasetDirectory::new(&config.dataset_dir);
    let store = Arc::new(ArtifactStore::open(&config.model_dir, config.keep_generations).expect("store"));
    let engine: Arc<dyn ModelEngine> = Arc::new(engine);
    let runner = Arc::new(RetrainRunner::new(
        dataset.clone(),
        Arc::clone(&store),
        Arc::clone(&engine),
        &config.training,
    ));

    Fixture {
        _dir: dir,
        config,
        dataset,
        store,
        engine,
        runner,
    }
}

/// Encodes a 4x4 solid-color PNG.
pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}
