//! Name sanitizing for class directories and uploaded files.

use std::path::Path;

use classifier_structs::{ClassifierError, ClassifierResult};
use uuid::Uuid;

/// File extensions treated as images, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff", "gif", "webp",
];

/// Reduces a class name to alphanumerics, spaces and underscores.
///
/// Anything that could form a path (`/`, `.`, `\`) is dropped, so the result
/// always names a direct child of the dataset root.
///
/// # Errors
///
/// Returns `InvalidClassName` if nothing is left after sanitizing.
pub fn sanitize_class_name(raw: &str) -> ClassifierResult<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        return Err(ClassifierError::InvalidClassName(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Produces a safe file name for an uploaded image.
///
/// Only the final path component is kept, restricted to `[A-Za-z0-9._-]`
/// with no leading dot. An empty result becomes `upload-<uuid>`. A name
/// without an extension gets one derived from `content_type`.
#[must_use]
pub fn sanitize_file_name(raw: &str, content_type: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let kept: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let kept = kept.trim_start_matches('.');

    let mut name = if kept.is_empty() {
        format!("upload-{}", Uuid::new_v4().simple())
    } else {
        kept.to_string()
    };

    if Path::new(&name).extension().is_none() {
        name.push('.');
        name.push_str(extension_for(content_type));
    }
    name
}

/// Guesses an `image/*` content type from a file extension.
#[must_use]
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "ppm" => "image/x-portable-pixmap",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(content_type)
}

/// Returns true if the path has one of [`IMAGE_EXTENSIONS`].
#[must_use]
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn extension_for(content_type: &str) -> &'static str {
    let subtype = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .strip_prefix("image/")
        .unwrap_or_default();
    match subtype.to_ascii_lowercase().as_str() {
        "png" => "png",
        "bmp" | "x-ms-bmp" => "bmp",
        "gif" => "gif",
        "webp" => "webp",
        "tiff" => "tiff",
        "x-portable-pixmap" => "ppm",
        _ => "jpg",
    }
}
