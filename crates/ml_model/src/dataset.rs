//! Lazily decoded dataset and batching for Burn training.
//!
//! The dataset keeps only file paths and labels. Images are read, decoded
//! and resized when a batch asks for them, so memory use does not grow with
//! the size of the corpus.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image_dataset::LabeledImage;
use tracing::warn;

use crate::preprocess::{CHANNELS, PreparedImage, prepare_image};

/// A single decoded training image.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: PreparedImage,
    /// Class index.
    pub label: usize,
}

/// Loads prepared images on demand.
///
/// Implement this to feed training from somewhere other than local files.
pub trait ImageLoader: Send + Sync {
    /// Reads the image at `path` and prepares it at `image_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be read or decoded.
    fn load_image(&self, path: &Path, image_size: usize) -> Result<PreparedImage>;
}

/// Reads and decodes image files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load_image(&self, path: &Path, image_size: usize) -> Result<PreparedImage> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        prepare_image(&bytes, image_size)
            .with_context(|| format!("Failed to decode {}", path.display()))
    }
}

/// Labeled image paths, decoded one item at a time.
pub struct ImageDataset {
    samples: Vec<LabeledImage>,
    image_size: usize,
    loader: Arc<dyn ImageLoader>,
}

impl ImageDataset {
    /// Creates a dataset that decodes files from disk.
    #[must_use]
    pub fn new(samples: Vec<LabeledImage>, image_size: usize) -> Self {
        Self::with_loader(samples, image_size, Arc::new(FileImageLoader))
    }

    #[must_use]
    pub fn with_loader(
        samples: Vec<LabeledImage>,
        image_size: usize,
        loader: Arc<dyn ImageLoader>,
    ) -> Self {
        Self {
            samples,
            image_size,
            loader,
        }
    }

    #[must_use]
    pub const fn image_size(&self) -> usize {
        self.image_size
    }
}

impl Dataset<ImageItem> for ImageDataset {
    /// Decodes the item at `index`.
    ///
    /// Unreadable images are logged and skipped by returning `None`.
    fn get(&self, index: usize) -> Option<ImageItem> {
        let sample = self.samples.get(index)?;
        match self.loader.load_image(&sample.path, self.image_size) {
            Ok(image) => Some(ImageItem {
                image,
                label: sample.label,
            }),
            Err(error) => {
                warn!(path = %sample.path.display(), error = %format!("{error:#}"), "Skipping unreadable image");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A batch of images and their labels.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Images of shape `[batch_size, 3, size, size]`.
    pub images: Tensor<B, 4>,
    /// Class indices of shape `[batch_size]`.
    pub targets: Tensor<B, 1, Int>,
    /// The same class indices on the host, for accuracy bookkeeping.
    pub labels: Vec<usize>,
}

/// Batcher for creating training batches.
#[derive(Debug, Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    #[must_use]
    pub const fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Stacks items into one batch. All items must share one image size.
    pub fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = items.first().map_or(0, |item| item.image.size());

        let mut pixels = Vec::with_capacity(batch_size * CHANNELS * size * size);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend_from_slice(item.image.data());
            labels.push(item.label);
        }

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([batch_size, CHANNELS, size, size]);

        let targets_data: Vec<i64> = labels.iter().map(|&label| label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets_data, [batch_size]),
            &self.device,
        );

        ImageBatch {
            images,
            targets,
            labels,
        }
    }

    /// Stacks a single image into a batch of one.
    pub fn single(&self, image: &PreparedImage) -> Tensor<B, 4> {
        let size = image.size();
        Tensor::<B, 1>::from_floats(image.data(), &self.device).reshape([1, CHANNELS, size, size])
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use burn::backend::NdArray;

    use super::*;
    use crate::preprocess::tests::solid_png;

    type TestBackend = NdArray;

    fn item(size: usize, value: f32, label: usize) -> ImageItem {
        ImageItem {
            image: PreparedImage::from_chw(size, vec![value; CHANNELS * size * size])
                .expect("valid image"),
            label,
        }
    }

    #[test]
    fn test_batcher() {
        let device = Default::default();
        let batcher = ImageBatcher::<TestBackend>::new(device);

        let batch = batcher.batch(vec![item(4, 0.0, 0), item(4, 1.0, 1)]);

        assert_eq!(batch.images.dims(), [2, CHANNELS, 4, 4]);
        assert_eq!(batch.targets.dims(), [2]);
        assert_eq!(batch.labels, vec![0, 1]);
    }

    #[test]
    fn test_single_adds_batch_dimension() {
        let batcher = ImageBatcher::<TestBackend>::new(Default::default());
        let image = item(5, 0.5, 0).image;
        assert_eq!(batcher.single(&image).dims(), [1, CHANNELS, 5, 5]);
    }

    /// Counts how often an image is actually decoded.
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ImageLoader for CountingLoader {
        fn load_image(&self, _path: &Path, image_size: usize) -> Result<PreparedImage> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            PreparedImage::from_chw(image_size, vec![0.5; CHANNELS * image_size * image_size])
        }
    }

    fn labeled(path: impl Into<PathBuf>, label: usize) -> LabeledImage {
        LabeledImage {
            path: path.into(),
            label,
        }
    }

    #[test]
    fn test_images_are_decoded_only_when_requested() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let samples = (0..100).map(|i| labeled(format!("{i}.png"), i % 2)).collect();
        let dataset = ImageDataset::with_loader(samples, 4, Arc::clone(&loader) as Arc<dyn ImageLoader>);

        assert_eq!(dataset.len(), 100);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

        let item = dataset.get(7).expect("item");
        assert_eq!(item.label, 1);
        assert_eq!(item.image.size(), 4);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        assert!(dataset.get(100).is_none());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_decodes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("red.png");
        fs::write(&path, solid_png(6, 6, [255, 0, 0])).expect("write");

        let dataset = ImageDataset::new(vec![labeled(path, 1)], 4);

        let loaded = dataset.get(0).expect("item");
        assert_eq!(loaded.label, 1);
        assert_eq!(loaded.image.size(), 4);
    }

    #[test]
    fn test_broken_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"nope").expect("write");
        let good = dir.path().join("good.png");
        fs::write(&good, solid_png(4, 4, [0, 255, 0])).expect("write");

        let dataset = ImageDataset::new(vec![labeled(broken, 0), labeled(good, 1)], 4);

        assert_eq!(dataset.len(), 2);
        assert!(dataset.get(0).is_none());
        assert_eq!(dataset.get(1).expect("good image").label, 1);
    }

    #[test]
    fn test_file_loader_names_broken_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.png");
        fs::write(&path, b"nope").expect("write");

        let error = FileImageLoader.load_image(&path, 4).expect_err("should fail");
        assert!(format!("{error:#}").contains("broken.png"));
    }
}
