//! The artifact store: load, promote and crash recovery.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use classifier_structs::{ClassifierError, ClassifierResult, ModelArtifact, ModelMetadata};
use tracing::{debug, info, warn};

use crate::layout::{
    self, ARTIFACT_FILE, METADATA_FILE, current_path, current_tmp_path, generation_dir,
    generations_dir, staging_dir,
};
use crate::lock;
use crate::record::SidecarRecord;

/// Distinguishes temporary names of writers within one process.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A name no other writer, in this process or another, is using.
fn writer_tag() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        WRITE_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// An artifact with its metadata, read as one consistent pair.
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub generation: u64,
    pub artifact: ModelArtifact,
    pub metadata: ModelMetadata,
}

/// What [`ArtifactStore::recover`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Half-written staging entries and temporary pointers that were deleted.
    pub removed_staging: usize,
    /// Generation `CURRENT` was repointed to, if it had to move.
    pub repointed_to: Option<u64>,
    /// Another process held the writer lock, so nothing was inspected.
    pub skipped: bool,
}

/// Owner of the on-disk current model.
pub struct ArtifactStore {
    root: PathBuf,
    keep_generations: usize,
    /// Set by [`ArtifactStore::open_read_only`].
    read_only: bool,
    /// Serializes promoters inside this process; the `LOCK` file does the
    /// same across processes.
    promote_lock: Mutex<()>,
}

impl ArtifactStore {
    /// Opens (creating if needed) a writable store rooted at `root` and
    /// runs crash recovery, unless another process is promoting right now.
    ///
    /// `keep_generations` is clamped to at least 2 so the previously served
    /// pair survives one more promotion.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or recovery
    /// cannot rewrite the pointer.
    pub fn open(root: impl Into<PathBuf>, keep_generations: usize) -> ClassifierResult<Self> {
        let root = root.into();
        fs::create_dir_all(generations_dir(&root))
            .map_err(|e| ClassifierError::io("creating generations directory", e))?;
        fs::create_dir_all(staging_dir(&root))
            .map_err(|e| ClassifierError::io("creating staging directory", e))?;

        let store = Self::new(root, keep_generations, false);

        let report = store.recover()?;
        if report.skipped {
            debug!(root = %store.root.display(), "Another process holds the store lock, recovery skipped");
        } else if report != RecoveryReport::default() {
            info!(
                removed_staging = report.removed_staging,
                repointed_to = ?report.repointed_to,
                "Artifact store recovered from an interrupted promotion"
            );
        }

        Ok(store)
    }

    /// Opens a store for loading only.
    ///
    /// Nothing on disk is created, locked or cleaned up, so this is safe to
    /// run next to a process that is promoting. [`Self::promote`] and
    /// [`Self::recover`] fail on a read-only store.
    #[must_use]
    pub fn open_read_only(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into(), 2, true)
    }

    fn new(root: PathBuf, keep_generations: usize, read_only: bool) -> Self {
        Self {
            root,
            keep_generations: keep_generations.max(2),
            read_only,
            promote_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the generation `CURRENT` names, without reading the pair.
    #[must_use]
    pub fn current_generation(&self) -> Option<u64> {
        read_pointer(&self.root).ok().flatten()
    }

    /// Loads the current pair, treating every failure as "no model".
    ///
    /// Corruption is logged; callers only see `None`.
    #[must_use]
    pub fn load(&self) -> Option<StoredModel> {
        match self.try_load() {
            Ok(model) => Some(model),
            Err(ClassifierError::ModelUnavailable) => {
                debug!(root = %self.root.display(), "No model has been promoted yet");
                None
            }
            Err(error) => {
                warn!(root = %self.root.display(), %error, "Current model is unavailable");
                None
            }
        }
    }

    /// Loads the current pair.
    ///
    /// # Errors
    ///
    /// `ModelUnavailable` if nothing has been promoted, `StorageCorruption`
    /// if the pointer or the pair cannot be read or do not match.
    pub fn try_load(&self) -> ClassifierResult<StoredModel> {
        // A concurrent promotion may prune the generation between reading the
        // pointer and opening its files; the pointer has moved on by then.
        let mut last_error = ClassifierError::ModelUnavailable;
        for _ in 0..2 {
            let generation = read_pointer(&self.root)
                .map_err(|e| ClassifierError::StorageCorruption(format!("unreadable pointer: {e}")))?
                .ok_or(ClassifierError::ModelUnavailable)?;

            match read_generation(&self.root, generation) {
                Ok(model) => return Ok(model),
                Err(ReadError::Missing(detail)) => {
                    last_error = ClassifierError::StorageCorruption(detail);
                }
                Err(ReadError::Invalid(detail)) => {
                    return Err(ClassifierError::StorageCorruption(detail));
                }
            }
        }
        Err(last_error)
    }

    /// Atomically replaces the current pair and returns its generation.
    ///
    /// Both files are written and synced in a staging directory, the
    /// directory is renamed into place, and only then is `CURRENT` swapped.
    /// A crash at any point leaves `CURRENT` naming a complete pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is invalid or any write fails. The
    /// served pair is unchanged on error.
    pub fn promote(
        &self,
        artifact: &ModelArtifact,
        metadata: &ModelMetadata,
    ) -> ClassifierResult<u64> {
        self.ensure_writable("promoting a model")?;
        metadata
            .validate()
            .map_err(ClassifierError::StorageCorruption)?;

        let _guard = self
            .promote_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let generation = lock::exclusive(&self.root, || {
            let generation = self.stage_generation(artifact, metadata)?;
            self.publish(generation)?;
            self.prune(generation);
            Ok::<_, ClassifierError>(generation)
        })
        .map_err(|e| ClassifierError::io("locking model store", e))??;

        info!(
            generation,
            classes = ?metadata.classes,
            accuracy = metadata.accuracy,
            sample_count = metadata.sample_count,
            "Promoted new model"
        );
        Ok(generation)
    }

    /// Lists complete-looking generation directories, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the generations directory cannot be read.
    pub fn generations(&self) -> ClassifierResult<Vec<u64>> {
        let mut generations = Vec::new();
        let entries = fs::read_dir(generations_dir(&self.root))
            .map_err(|e| ClassifierError::io("listing generations", e))?;
        for entry in entries.flatten() {
            if let Some(generation) = entry
                .file_name()
                .to_str()
                .and_then(layout::parse_generation_name)
            {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    /// Cleans up after an interrupted promotion.
    ///
    /// Staging leftovers and temporary pointers are deleted. If `CURRENT` is
    /// missing, unreadable, points at a broken pair, or lags behind a newer
    /// complete generation, it is repointed at the newest generation that
    /// loads cleanly.
    ///
    /// Runs only while holding the writer lock. If another process holds it,
    /// its staging entries are live and the returned report has `skipped`
    /// set.
    ///
    /// # Errors
    ///
    /// Returns an error on a read-only store, or if directories cannot be
    /// listed or the pointer cannot be rewritten.
    pub fn recover(&self) -> ClassifierResult<RecoveryReport> {
        self.ensure_writable("recovering the store")?;
        let _guard = self
            .promote_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let recovered = lock::try_exclusive(&self.root, || self.recover_locked())
            .map_err(|e| ClassifierError::io("locking model store", e))?;
        match recovered {
            Some(report) => report,
            None => Ok(RecoveryReport {
                skipped: true,
                ..RecoveryReport::default()
            }),
        }
    }

    fn recover_locked(&self) -> ClassifierResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let staging = fs::read_dir(staging_dir(&self.root))
            .map_err(|e| ClassifierError::io("listing staging directory", e))?;
        for entry in staging.flatten() {
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => report.removed_staging += 1,
                Err(error) => warn!(path = %path.display(), %error, "Could not remove staging entry"),
            }
        }
        let root_entries = fs::read_dir(&self.root)
            .map_err(|e| ClassifierError::io("listing store root", e))?;
        for entry in root_entries.flatten() {
            if entry.file_name().to_str().is_some_and(layout::is_current_tmp_name) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => report.removed_staging += 1,
                    Err(error) => {
                        warn!(path = %entry.path().display(), %error, "Could not remove temporary pointer");
                    }
                }
            }
        }

        let pointer = read_pointer(&self.root).ok().flatten();
        let pointer_valid = pointer.is_some_and(|g| read_generation(&self.root, g).is_ok());

        let newest_valid = self
            .generations()?
            .into_iter()
            .rev()
            .find(|&g| match read_generation(&self.root, g) {
                Ok(_) => true,
                Err(error) => {
                    warn!(generation = g, detail = %error.detail(), "Skipping broken generation");
                    false
                }
            });

        let target = match (pointer, newest_valid) {
            (Some(current), Some(newest)) if pointer_valid && newest <= current => None,
            (_, Some(newest)) => Some(newest),
            (_, None) => None,
        };

        if let Some(generation) = target {
            self.publish(generation)?;
            report.repointed_to = Some(generation);
        } else if pointer.is_some() && !pointer_valid {
            warn!(
                pointer = ?pointer,
                "Current pointer names a broken pair and no valid generation exists"
            );
        }

        Ok(report)
    }

    /// Writes the pair into a fresh generation directory without making it
    /// current.
    fn stage_generation(
        &self,
        artifact: &ModelArtifact,
        metadata: &ModelMetadata,
    ) -> ClassifierResult<u64> {
        let generation = self.next_generation()?;
        let record = SidecarRecord::new(generation, artifact.as_bytes(), metadata.clone());
        let sidecar = serde_json::to_vec_pretty(&record)
            .map_err(|e| ClassifierError::StorageCorruption(format!("encoding sidecar: {e}")))?;

        let staged = staging_dir(&self.root).join(format!(
            "{}.{}",
            layout::generation_name(generation),
            writer_tag()
        ));
        fs::create_dir_all(&staged).map_err(|e| ClassifierError::io("creating staging entry", e))?;

        let written = write_synced(&staged.join(ARTIFACT_FILE), artifact.as_bytes())
            .and_then(|()| write_synced(&staged.join(METADATA_FILE), &sidecar))
            .and_then(|()| sync_dir(&staged))
            .and_then(|()| fs::rename(&staged, generation_dir(&self.root, generation)))
            .and_then(|()| sync_dir(&generations_dir(&self.root)));

        if let Err(error) = written {
            let _ = fs::remove_dir_all(&staged);
            return Err(ClassifierError::io("writing model generation", error));
        }

        debug!(generation, "Staged model generation");
        Ok(generation)
    }

    /// Atomically points `CURRENT` at `generation`.
    fn publish(&self, generation: u64) -> ClassifierResult<()> {
        let tmp = current_tmp_path(&self.root, &writer_tag());
        let published = write_synced(&tmp, layout::generation_name(generation).as_bytes())
            .and_then(|()| fs::rename(&tmp, current_path(&self.root)))
            .and_then(|()| sync_dir(&self.root));
        if published.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        published.map_err(|e| ClassifierError::io("updating current model pointer", e))
    }

    fn ensure_writable(&self, action: &str) -> ClassifierResult<()> {
        if self.read_only {
            return Err(ClassifierError::io(
                action,
                io::Error::new(io::ErrorKind::PermissionDenied, "store was opened read-only"),
            ));
        }
        Ok(())
    }

    fn next_generation(&self) -> ClassifierResult<u64> {
        let newest_dir = self.generations()?.last().copied().unwrap_or(0);
        let pointer = read_pointer(&self.root).ok().flatten().unwrap_or(0);
        Ok(newest_dir.max(pointer) + 1)
    }

    /// Deletes old generations, keeping the newest `keep_generations`.
    fn prune(&self, current: u64) {
        let Ok(generations) = self.generations() else {
            return;
        };
        let excess = generations.len().saturating_sub(self.keep_generations);
        for &generation in generations.iter().take(excess) {
            if generation >= current {
                continue;
            }
            let dir = generation_dir(&self.root, generation);
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(generation, "Pruned old model generation"),
                Err(error) => warn!(generation, %error, "Could not prune old model generation"),
            }
        }
    }
}

enum ReadError {
    /// A file vanished, typically pruned under a slow reader.
    Missing(String),
    /// Files exist but are unreadable or inconsistent.
    Invalid(String),
}

impl ReadError {
    fn detail(&self) -> &str {
        match self {
            Self::Missing(detail) | Self::Invalid(detail) => detail,
        }
    }
}

fn read_pointer(root: &Path) -> io::Result<Option<u64>> {
    match fs::read_to_string(current_path(root)) {
        Ok(raw) => layout::parse_generation_name(raw.trim())
            .map(Some)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad pointer {raw:?}"))),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

fn read_generation(root: &Path, generation: u64) -> Result<StoredModel, ReadError> {
    let dir = generation_dir(root, generation);
    let read = |name: &str| {
        fs::read(dir.join(name)).map_err(|error| {
            let detail = format!("generation {generation}: reading {name}: {error}");
            if error.kind() == io::ErrorKind::NotFound {
                ReadError::Missing(detail)
            } else {
                ReadError::Invalid(detail)
            }
        })
    };

    let sidecar_bytes = read(METADATA_FILE)?;
    let artifact = read(ARTIFACT_FILE)?;

    let record: SidecarRecord = serde_json::from_slice(&sidecar_bytes).map_err(|e| {
        ReadError::Invalid(format!("generation {generation}: parsing {METADATA_FILE}: {e}"))
    })?;
    record
        .verify(generation, &artifact)
        .map_err(|detail| ReadError::Invalid(format!("generation {generation}: {detail}")))?;

    Ok(StoredModel {
        generation,
        artifact: ModelArtifact::new(artifact),
        metadata: record.metadata,
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
