//! Sidecar record written next to every artifact.

use classifier_structs::ModelMetadata;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Contents of `model.info.json`.
///
/// The public metadata is flattened so the file reads like the metadata
/// itself, with the integrity fields alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarRecord {
    pub generation: u64,
    pub artifact_len: u64,
    pub artifact_sha256: String,
    #[serde(flatten)]
    pub metadata: ModelMetadata,
}

impl SidecarRecord {
    #[must_use]
    pub fn new(generation: u64, artifact: &[u8], metadata: ModelMetadata) -> Self {
        Self {
            generation,
            artifact_len: artifact.len() as u64,
            artifact_sha256: digest_hex(artifact),
            metadata,
        }
    }

    /// Checks that this record describes `artifact` from `generation`.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn verify(&self, generation: u64, artifact: &[u8]) -> Result<(), String> {
        if self.generation != generation {
            return Err(format!(
                "sidecar names generation {} but lives in generation {generation}",
                self.generation
            ));
        }
        if self.artifact_len != artifact.len() as u64 {
            return Err(format!(
                "artifact is {} bytes, sidecar expects {}",
                artifact.len(),
                self.artifact_len
            ));
        }
        let actual = digest_hex(artifact);
        if actual != self.artifact_sha256 {
            return Err(format!(
                "artifact digest {actual} does not match sidecar digest {}",
                self.artifact_sha256
            ));
        }
        self.metadata.validate()
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
