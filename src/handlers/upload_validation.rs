//! Upload checks applied at the HTTP boundary before the photo service sees
//! anything: size limit, allowed image types, allowed file extensions.

use thiserror::Error;

/// Default maximum upload size (10 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

pub const ALLOWED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file size exceeds maximum limit of {max} bytes")]
    TooLarge { max: u64 },
    #[error("invalid file type `{0}`; allowed types: JPEG, PNG, GIF, WebP")]
    ContentType(String),
    #[error("invalid file extension `{0}`; allowed extensions: .jpg, .jpeg, .png, .gif, .webp")]
    Extension(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("duplicate field `{0}`")]
    DuplicateField(&'static str),
}

/// Lowercased extension of `filename`, including the dot, or empty.
pub fn extension_of(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    base.rfind('.')
        .map(|idx| base[idx..].to_ascii_lowercase())
        .unwrap_or_default()
}

/// Image content type implied by a file name's extension.
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    match extension_of(filename).as_str() {
        ".jpg" | ".jpeg" => Some("image/jpeg"),
        ".png" => Some("image/png"),
        ".gif" => Some("image/gif"),
        ".webp" => Some("image/webp"),
        _ => None,
    }
}

/// Settle on the upload's content type and check both it and the extension.
///
/// A missing or empty declared type falls back to the one implied by the
/// extension.
pub fn validate_file(declared: Option<&str>, filename: &str) -> Result<String, ValidationError> {
    let content_type = match declared.map(str::trim) {
        Some(declared) if !declared.is_empty() => declared.to_ascii_lowercase(),
        _ => content_type_for(filename).unwrap_or_default().to_string(),
    };

    if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
        return Err(ValidationError::ContentType(content_type));
    }

    let ext = extension_of(filename);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ValidationError::Extension(ext));
    }

    Ok(content_type)
}

pub fn validate_size(size: u64, max: u64) -> Result<(), ValidationError> {
    if size > max {
        return Err(ValidationError::TooLarge { max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_is_kept_when_allowed() {
        assert_eq!(
            validate_file(Some("image/PNG"), "cat.png").unwrap(),
            "image/png"
        );
    }

    #[test]
    fn missing_type_is_inferred_from_extension() {
        assert_eq!(validate_file(None, "cat.JPEG").unwrap(), "image/jpeg");
        assert_eq!(validate_file(Some(""), "cat.webp").unwrap(), "image/webp");
    }

    #[test]
    fn disallowed_type_is_rejected() {
        assert_eq!(
            validate_file(Some("application/pdf"), "doc.png"),
            Err(ValidationError::ContentType("application/pdf".into()))
        );
        assert_eq!(
            validate_file(None, "notes.txt"),
            Err(ValidationError::ContentType(String::new()))
        );
    }

    #[test]
    fn disallowed_extension_is_rejected_even_with_image_type() {
        assert_eq!(
            validate_file(Some("image/png"), "payload.exe"),
            Err(ValidationError::Extension(".exe".into()))
        );
        assert_eq!(
            validate_file(Some("image/png"), "noext"),
            Err(ValidationError::Extension(String::new()))
        );
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(validate_size(10, 10).is_ok());
        assert_eq!(
            validate_size(11, 10),
            Err(ValidationError::TooLarge { max: 10 })
        );
    }
}
