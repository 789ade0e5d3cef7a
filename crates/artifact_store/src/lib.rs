//! Filesystem store for the currently served model.
//!
//! Each promoted model is an immutable generation directory holding the
//! artifact and its JSON sidecar. A single `CURRENT` pointer file names the
//! served generation and is replaced with an atomic rename, so readers see
//! either the old pair or the new pair, never a mix. A `LOCK` file keeps
//! promotion and crash recovery to one process at a time.

mod layout;
mod lock;
mod record;
mod store;

pub use layout::{ARTIFACT_FILE, CURRENT_FILE, METADATA_FILE};
pub use store::{ArtifactStore, RecoveryReport, StoredModel};
