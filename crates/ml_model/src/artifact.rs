//! Binary envelope around serialized model weights.
//!
//! ```text
//! "ICLF" | version: u8 | config_len: u32 LE | config JSON | weights
//! ```

use anyhow::{Context, Result, bail, ensure};

use crate::ClassifierConfig;

const MAGIC: &[u8; 4] = b"ICLF";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4;

/// Packs an architecture and its weight record into one artifact payload.
///
/// # Errors
///
/// Returns an error if the config cannot be serialized.
pub fn encode_artifact(config: &ClassifierConfig, weights: &[u8]) -> Result<Vec<u8>> {
    let config_json = serde_json::to_vec(config).context("Failed to serialize model config")?;
    let config_len = u32::try_from(config_json.len()).context("Model config is too large")?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + config_json.len() + weights.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(VERSION);
    bytes.extend_from_slice(&config_len.to_le_bytes());
    bytes.extend_from_slice(&config_json);
    bytes.extend_from_slice(weights);
    Ok(bytes)
}

/// Splits an artifact payload into its architecture and weight record.
///
/// # Errors
///
/// Returns an error if the envelope is truncated, has the wrong magic or
/// version, or carries an unreadable config.
pub fn decode_artifact(bytes: &[u8]) -> Result<(ClassifierConfig, &[u8])> {
    ensure!(bytes.len() >= HEADER_LEN, "Artifact is truncated");
    let (magic, rest) = bytes.split_at(MAGIC.len());
    ensure!(magic == MAGIC, "Artifact is not an image classifier");

    let (version, rest) = rest.split_at(1);
    if version[0] != VERSION {
        bail!("Unsupported artifact version {}", version[0]);
    }

    let (len_bytes, rest) = rest.split_at(4);
    let mut len = [0u8; 4];
    len.copy_from_slice(len_bytes);
    let config_len = u32::from_le_bytes(len) as usize;
    ensure!(rest.len() >= config_len, "Artifact config is truncated");

    let (config_json, weights) = rest.split_at(config_len);
    let config: ClassifierConfig =
        serde_json::from_slice(config_json).context("Failed to parse model config")?;
    Ok((config, weights))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_keeps_config_and_weights() {
        let config = ClassifierConfig::new(2).with_image_size(16);
        let bytes = encode_artifact(&config, b"weights").expect("encode");
        assert!(bytes.starts_with(b"ICLF"));

        let (decoded, weights) = decode_artifact(&bytes).expect("decode");
        assert_eq!(decoded, config);
        assert_eq!(weights, b"weights");
    }

    #[test]
    fn test_rejects_foreign_and_truncated_payloads() {
        assert!(decode_artifact(b"").is_err());
        assert!(decode_artifact(b"PK\x03\x04 zip file").is_err());

        let bytes = encode_artifact(&ClassifierConfig::new(2), b"w").expect("encode");
        assert!(decode_artifact(&bytes[..HEADER_LEN + 3]).is_err());

        let mut wrong_version = bytes;
        wrong_version[4] = 99;
        assert!(decode_artifact(&wrong_version).is_err());
    }
}
