//! Class discovery and the train/validation split used for retraining.

use std::path::PathBuf;

use classifier_structs::{ClassifierError, ClassifierResult};
use tracing::{debug, info};

use crate::directory::{DatasetDirectory, visible_files};
use crate::sanitize::has_image_extension;

/// One image path and its class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub path: PathBuf,
    /// Index into [`TrainingSplit::classes`].
    pub label: usize,
}

/// Images discovered for one training run.
#[derive(Debug, Clone, Default)]
pub struct TrainingSplit {
    /// Class names in lexicographic order; index `i` is label `i`.
    pub classes: Vec<String>,
    pub train: Vec<LabeledImage>,
    pub validation: Vec<LabeledImage>,
}

impl TrainingSplit {
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

impl DatasetDirectory {
    /// Discovers classes and splits each class's images.
    ///
    /// Per class, the image files are sorted and the first
    /// `floor(validation_split * n)` go to validation, the rest to training.
    /// Class directories without images are left out.
    ///
    /// # Errors
    ///
    /// `DatasetMissing` if the root does not exist, `DatasetEmpty` if no
    /// training image is found, `Io` on listing failures.
    pub fn training_split(&self, validation_split: f32) -> ClassifierResult<TrainingSplit> {
        if !self.root().is_dir() {
            return Err(ClassifierError::DatasetMissing(self.root().to_path_buf()));
        }

        let mut split = TrainingSplit::default();
        for (class_name, dir) in self.class_dirs()? {
            let images: Vec<PathBuf> = visible_files(&dir)
                .map_err(|e| ClassifierError::io(format!("listing class {class_name:?}"), e))?
                .into_iter()
                .filter(|path| has_image_extension(path))
                .collect();

            if images.is_empty() {
                debug!(class_name = %class_name, "Skipping class without images");
                continue;
            }

            let label = split.classes.len();
            let held_out = validation_count(images.len(), validation_split);
            for (i, path) in images.into_iter().enumerate() {
                let sample = LabeledImage { path, label };
                if i < held_out {
                    split.validation.push(sample);
                } else {
                    split.train.push(sample);
                }
            }
            split.classes.push(class_name);
        }

        if split.train.is_empty() {
            return Err(ClassifierError::DatasetEmpty(self.root().to_path_buf()));
        }

        info!(
            classes = ?split.classes,
            train = split.train.len(),
            validation = split.validation.len(),
            "Discovered training data"
        );
        Ok(split)
    }
}

fn validation_count(n: usize, validation_split: f32) -> usize {
    let held_out = (f64::from(validation_split.clamp(0.0, 1.0)) * n as f64).floor() as usize;
    // Every class keeps at least one training sample.
    held_out.min(n.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn dataset_with(counts: &[(&str, usize)]) -> (tempfile::TempDir, DatasetDirectory) {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = DatasetDirectory::new(dir.path());
        for (class_name, count) in counts {
            for i in 0..*count {
                dataset
                    .append(class_name, b"fake", &format!("img{i:02}.png"), "image/png")
                    .expect("append");
            }
        }
        (dir, dataset)
    }

    #[test]
    fn test_missing_root_is_dataset_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = DatasetDirectory::new(dir.path().join("nope"));
        assert!(matches!(
            dataset.training_split(0.2),
            Err(ClassifierError::DatasetMissing(_))
        ));
    }

    #[test]
    fn test_root_without_images_is_dataset_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Cat")).expect("mkdir");
        fs::write(dir.path().join("Cat").join("notes.txt"), b"x").expect("write");
        let dataset = DatasetDirectory::new(dir.path());
        assert!(matches!(
            dataset.training_split(0.2),
            Err(ClassifierError::DatasetEmpty(_))
        ));
    }

    #[test]
    fn test_split_is_per_class_and_sorted() {
        let (_dir, dataset) = dataset_with(&[("Dog", 6), ("Cat", 5)]);
        let split = dataset.training_split(0.2).expect("split");

        assert_eq!(split.classes, vec!["Cat".to_string(), "Dog".to_string()]);
        assert_eq!(split.train.len(), 9);
        assert_eq!(split.validation.len(), 2);

        // The first sorted file of each class is held out.
        assert!(split.validation[0].path.ends_with("Cat/img00.png"));
        assert_eq!(split.validation[0].label, 0);
        assert!(split.validation[1].path.ends_with("Dog/img00.png"));
        assert_eq!(split.validation[1].label, 1);
    }

    #[test]
    fn test_zero_split_trains_on_everything() {
        let (_dir, dataset) = dataset_with(&[("Cat", 3)]);
        let split = dataset.training_split(0.0).expect("split");
        assert_eq!(split.train.len(), 3);
        assert!(split.validation.is_empty());
    }

    #[test]
    fn test_single_image_class_still_trains() {
        assert_eq!(validation_count(1, 0.9), 0);
        assert_eq!(validation_count(5, 0.2), 1);
        assert_eq!(validation_count(6, 0.2), 1);
        assert_eq!(validation_count(10, 0.2), 2);
    }
}
