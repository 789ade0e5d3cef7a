//! Labeled-by-folder image corpus.
//!
//! Every subdirectory of the dataset root is a class; every image file inside
//! it is one labeled sample.

mod directory;
mod discovery;
mod sanitize;

pub use directory::DatasetDirectory;
pub use discovery::{LabeledImage, TrainingSplit};
pub use sanitize::{
    IMAGE_EXTENSIONS, content_type_for, has_image_extension, sanitize_class_name,
    sanitize_file_name,
};
