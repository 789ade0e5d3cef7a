//! Path helpers for the on-disk store layout.
//!
//! ```text
//! <root>/CURRENT                         served generation number
//! <root>/CURRENT.<writer>.tmp            pointer being replaced
//! <root>/LOCK                            held by the promoting process
//! <root>/generations/<generation>/model.bin
//! <root>/generations/<generation>/model.info.json
//! <root>/staging/<generation>.<nonce>/   pairs being written
//! ```

use std::path::{Path, PathBuf};

/// Pointer file naming the served generation.
pub const CURRENT_FILE: &str = "CURRENT";

/// Binary artifact file inside a generation directory.
pub const ARTIFACT_FILE: &str = "model.bin";

/// JSON sidecar file inside a generation directory.
pub const METADATA_FILE: &str = "model.info.json";

const GENERATIONS_DIR: &str = "generations";
const STAGING_DIR: &str = "staging";
const LOCK_FILE: &str = "LOCK";
const CURRENT_TMP_PREFIX: &str = "CURRENT.";
const TMP_SUFFIX: &str = ".tmp";

/// Width of zero-padded generation directory names, so they sort lexically.
const GENERATION_WIDTH: usize = 20;

#[must_use]
pub fn current_path(root: &Path) -> PathBuf {
    root.join(CURRENT_FILE)
}

/// Temporary pointer file private to one writer.
#[must_use]
pub fn current_tmp_path(root: &Path, writer: &str) -> PathBuf {
    root.join(format!("{CURRENT_TMP_PREFIX}{writer}{TMP_SUFFIX}"))
}

/// Returns true for names produced by [`current_tmp_path`].
#[must_use]
pub fn is_current_tmp_name(name: &str) -> bool {
    name.len() > CURRENT_TMP_PREFIX.len() + TMP_SUFFIX.len()
        && name.starts_with(CURRENT_TMP_PREFIX)
        && name.ends_with(TMP_SUFFIX)
}

#[must_use]
pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

#[must_use]
pub fn generations_dir(root: &Path) -> PathBuf {
    root.join(GENERATIONS_DIR)
}

#[must_use]
pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(STAGING_DIR)
}

#[must_use]
pub fn generation_name(generation: u64) -> String {
    format!("{generation:0width$}", width = GENERATION_WIDTH)
}

#[must_use]
pub fn generation_dir(root: &Path, generation: u64) -> PathBuf {
    generations_dir(root).join(generation_name(generation))
}

/// Parses a generation directory name back to its number.
#[must_use]
pub fn parse_generation_name(name: &str) -> Option<u64> {
    if name.len() != GENERATION_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_names_sort_numerically() {
        let mut names = vec![generation_name(10), generation_name(9), generation_name(100)];
        names.sort();
        assert_eq!(
            names,
            vec![generation_name(9), generation_name(10), generation_name(100)]
        );
    }

    #[test]
    fn test_parse_generation_name() {
        assert_eq!(parse_generation_name(&generation_name(42)), Some(42));
        assert_eq!(parse_generation_name("42"), None);
        assert_eq!(parse_generation_name("0000000000000000004x"), None);
    }

    #[test]
    fn test_current_tmp_names_are_recognized() {
        let tmp = current_tmp_path(Path::new("/models"), "42-7");
        let name = tmp.file_name().and_then(|n| n.to_str()).expect("name");
        assert_eq!(name, "CURRENT.42-7.tmp");
        assert!(is_current_tmp_name(name));
        assert!(!is_current_tmp_name(CURRENT_FILE));
        assert!(!is_current_tmp_name("CURRENT..tmp"));
    }

    #[test]
    fn test_generation_dir_is_under_root() {
        let root = Path::new("/models");
        assert_eq!(
            generation_dir(root, 3),
            PathBuf::from("/models/generations/00000000000000000003")
        );
    }
}
