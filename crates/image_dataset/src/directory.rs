//! Appending to and summarizing the dataset root.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use classifier_structs::{ClassifierError, ClassifierResult, DatasetSummary};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sanitize::{content_type_for, sanitize_class_name, sanitize_file_name};

/// A dataset root with one subdirectory per class.
#[derive(Debug, Clone)]
pub struct DatasetDirectory {
    root: PathBuf,
}

impl DatasetDirectory {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitizes `raw_class` and creates its directory if absent.
    ///
    /// Returns the sanitized name and the class directory.
    ///
    /// # Errors
    ///
    /// `InvalidClassName` if nothing survives sanitizing, `Io` if the
    /// directory cannot be created.
    pub fn ensure_class(&self, raw_class: &str) -> ClassifierResult<(String, PathBuf)> {
        let class_name = sanitize_class_name(raw_class)?;
        let dir = self.root.join(&class_name);
        fs::create_dir_all(&dir)
            .map_err(|e| ClassifierError::io(format!("creating class directory {class_name:?}"), e))?;
        Ok((class_name, dir))
    }

    /// Writes one image into the class directory and returns its path.
    ///
    /// The bytes land in a hidden temporary file first and are renamed into
    /// place, so a concurrent training run never sees a half-written image.
    /// An existing file with the same name is replaced.
    ///
    /// # Errors
    ///
    /// `InvalidClassName`, `InvalidFileType` if `content_type` is not
    /// `image/*`, or `Io` if the write fails.
    pub fn append(
        &self,
        raw_class: &str,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> ClassifierResult<PathBuf> {
        if !content_type.starts_with("image/") {
            return Err(ClassifierError::InvalidFileType(content_type.to_string()));
        }
        let (class_name, dir) = self.ensure_class(raw_class)?;

        let name = sanitize_file_name(filename, content_type);
        let target = dir.join(&name);
        let partial = dir.join(format!(".{name}.{}.part", Uuid::new_v4().simple()));

        let written = fs::write(&partial, bytes).and_then(|()| fs::rename(&partial, &target));
        if let Err(error) = written {
            let _ = fs::remove_file(&partial);
            return Err(ClassifierError::io(format!("saving {name:?}"), error));
        }

        debug!(class_name = %class_name, file = %name, bytes = bytes.len(), "Saved training image");
        Ok(target)
    }

    /// Counts files per class directory.
    ///
    /// A missing root is an empty dataset. Hidden entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Io` if an existing directory cannot be listed.
    pub fn summarize(&self) -> ClassifierResult<DatasetSummary> {
        let mut counts = BTreeMap::new();
        for (class_name, dir) in self.class_dirs()? {
            let count = visible_files(&dir)
                .map_err(|e| ClassifierError::io(format!("listing class {class_name:?}"), e))?
                .len();
            counts.insert(class_name, count);
        }
        Ok(DatasetSummary::from_counts(counts))
    }

    /// Copies every image file of `folder` into `raw_class`.
    ///
    /// Returns how many files were copied. Non-image files are skipped.
    ///
    /// # Errors
    ///
    /// `InvalidClassName`, or `Io` if `folder` cannot be read.
    pub fn ingest_folder(&self, raw_class: &str, folder: &Path) -> ClassifierResult<usize> {
        let (class_name, _) = self.ensure_class(raw_class)?;
        let files = visible_files(folder)
            .map_err(|e| ClassifierError::io(format!("reading {}", folder.display()), e))?;

        let mut copied = 0;
        for path in files {
            let Some(content_type) = content_type_for(&path) else {
                debug!(path = %path.display(), "Skipping non-image file");
                continue;
            };
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let bytes = fs::read(&path)
                .map_err(|e| ClassifierError::io(format!("reading {}", path.display()), e))?;
            match self.append(&class_name, &bytes, &filename, content_type) {
                Ok(_) => copied += 1,
                Err(error) => warn!(path = %path.display(), %error, "Failed to ingest image"),
            }
        }

        info!(class_name = %class_name, copied, folder = %folder.display(), "Ingested folder");
        Ok(copied)
    }

    /// Lists visible class directories, sorted by name.
    pub(crate) fn class_dirs(&self) -> ClassifierResult<Vec<(String, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(ClassifierError::io("listing dataset root", error)),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ClassifierError::io("listing dataset root", e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            dirs.push((name, entry.path()));
        }
        dirs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(dirs)
    }
}

/// Lists visible regular files directly inside `dir`, sorted by path.
pub(crate) fn visible_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_str().is_none_or(|n| n.starts_with('.'));
        if !hidden && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
