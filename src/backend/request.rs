use std::path::{Path, PathBuf};

use thiserror::Error;

/// Telegram caps pack titles and short names at 64 characters.
pub const MAX_TITLE_CHARS: usize = 64;
pub const MAX_URL_NAME_CHARS: usize = 64;
/// Telegram caps video sticker packs at 50 entries.
pub const MAX_STICKER_FILES: usize = 50;
pub const MAX_PATH_BYTES: usize = 1024;

/// Everything the backend needs to start one pack-creation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackCreationRequest {
    pub title: String,
    pub url_name: String,
    pub sticker_files: Vec<PathBuf>,
    pub default_emoji: String,
    pub icon_path: Option<PathBuf>,
    pub auto_skip_icon: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} exceeds {limit} characters")]
    TooLong { field: &'static str, limit: usize },
    #[error("{field} contains control characters")]
    ControlCharacters { field: &'static str },
    #[error("url name must start with a letter and use only letters, digits, and underscores")]
    InvalidUrlName,
    #[error("a pack needs at least one sticker file")]
    NoStickerFiles,
    #[error("too many sticker files: {count} (limit {MAX_STICKER_FILES})")]
    TooManyStickerFiles { count: usize },
    #[error("{field} path exceeds {MAX_PATH_BYTES} bytes")]
    PathTooLong { field: &'static str },
}

impl RequestValidationError {
    /// Name of the request field the error is about, for error reporting
    /// at the client seam.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Empty { field }
            | Self::TooLong { field, .. }
            | Self::ControlCharacters { field }
            | Self::PathTooLong { field } => field,
            Self::InvalidUrlName => "url_name",
            Self::NoStickerFiles | Self::TooManyStickerFiles { .. } => "sticker_files",
        }
    }
}

/// Checks every string field of a start request before it goes on the wire.
/// The backend's bot automation fails with opaque OS-level errors on control
/// characters or oversized fields, so they are rejected client-side instead.
pub fn sanitize_request(request: &PackCreationRequest) -> Result<(), RequestValidationError> {
    validate_text(request.title.as_str(), "title", MAX_TITLE_CHARS)?;
    sanitize_url_name(request.url_name.as_str())?;
    validate_text(request.default_emoji.as_str(), "default_emoji", 16)?;

    if request.sticker_files.is_empty() {
        return Err(RequestValidationError::NoStickerFiles);
    }
    if request.sticker_files.len() > MAX_STICKER_FILES {
        return Err(RequestValidationError::TooManyStickerFiles {
            count: request.sticker_files.len(),
        });
    }
    for path in &request.sticker_files {
        validate_path(path.as_path(), "sticker_files")?;
    }
    if let Some(icon_path) = &request.icon_path {
        validate_path(icon_path.as_path(), "icon_path")?;
    }
    Ok(())
}

/// Url names become part of `t.me/addstickers/<name>`: ASCII letters, digits,
/// and underscores only, starting with a letter.
pub fn sanitize_url_name(value: &str) -> Result<(), RequestValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RequestValidationError::Empty { field: "url_name" });
    }
    if trimmed.chars().count() > MAX_URL_NAME_CHARS {
        return Err(RequestValidationError::TooLong {
            field: "url_name",
            limit: MAX_URL_NAME_CHARS,
        });
    }
    let mut chars = trimmed.chars();
    let starts_with_letter = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic());
    if !starts_with_letter || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(RequestValidationError::InvalidUrlName);
    }
    Ok(())
}

fn validate_text(
    value: &str,
    field: &'static str,
    limit: usize,
) -> Result<(), RequestValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RequestValidationError::Empty { field });
    }
    if trimmed.chars().count() > limit {
        return Err(RequestValidationError::TooLong { field, limit });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(RequestValidationError::ControlCharacters { field });
    }
    Ok(())
}

fn validate_path(path: &Path, field: &'static str) -> Result<(), RequestValidationError> {
    let rendered = path.to_string_lossy();
    if rendered.trim().is_empty() {
        return Err(RequestValidationError::Empty { field });
    }
    if rendered.len() > MAX_PATH_BYTES {
        return Err(RequestValidationError::PathTooLong { field });
    }
    if rendered.chars().any(char::is_control) {
        return Err(RequestValidationError::ControlCharacters { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PackCreationRequest {
        PackCreationRequest {
            title: String::from("Dancing Capys"),
            url_name: String::from("dancing_capys"),
            sticker_files: vec![PathBuf::from("/tmp/stickers/one.webm")],
            default_emoji: String::from("\u{1F600}"),
            icon_path: None,
            auto_skip_icon: false,
        }
    }

    #[test]
    fn accepts_a_well_formed_request() {
        sanitize_request(&request()).expect("request should pass");
    }

    #[test]
    fn rejects_control_characters_in_title() {
        let mut bad = request();
        bad.title = String::from("sneaky\u{0007}title");
        let err = sanitize_request(&bad).expect_err("control characters should fail");
        assert_eq!(
            err,
            RequestValidationError::ControlCharacters { field: "title" }
        );
        assert_eq!(err.field(), "title");
    }

    #[test]
    fn rejects_over_length_title() {
        let mut bad = request();
        bad.title = "x".repeat(MAX_TITLE_CHARS + 1);
        let err = sanitize_request(&bad).expect_err("oversized title should fail");
        assert_eq!(
            err,
            RequestValidationError::TooLong {
                field: "title",
                limit: MAX_TITLE_CHARS
            }
        );
    }

    #[test]
    fn rejects_empty_sticker_list_and_oversized_lists() {
        let mut empty = request();
        empty.sticker_files.clear();
        assert_eq!(
            sanitize_request(&empty).expect_err("empty list should fail"),
            RequestValidationError::NoStickerFiles
        );

        let mut oversized = request();
        oversized.sticker_files =
            (0..=MAX_STICKER_FILES).map(|i| PathBuf::from(format!("/tmp/{i}.webm"))).collect();
        assert_eq!(
            sanitize_request(&oversized).expect_err("oversized list should fail"),
            RequestValidationError::TooManyStickerFiles {
                count: MAX_STICKER_FILES + 1
            }
        );
    }

    #[test]
    fn rejects_control_characters_in_paths() {
        let mut bad = request();
        bad.sticker_files = vec![PathBuf::from("/tmp/bad\u{0000}name.webm")];
        assert_eq!(
            sanitize_request(&bad).expect_err("control characters in path should fail"),
            RequestValidationError::ControlCharacters {
                field: "sticker_files"
            }
        );
    }

    #[test]
    fn url_name_rules_match_telegram_short_names() {
        sanitize_url_name("dancing_capys").expect("plain name should pass");
        sanitize_url_name("a").expect("single letter should pass");
        sanitize_url_name("  padded_ok  ").expect("padding should be trimmed");

        assert_eq!(
            sanitize_url_name("7leading_digit").expect_err("digit start should fail"),
            RequestValidationError::InvalidUrlName
        );
        assert_eq!(
            sanitize_url_name("has-dash").expect_err("dash should fail"),
            RequestValidationError::InvalidUrlName
        );
        assert_eq!(
            sanitize_url_name("has space").expect_err("space should fail"),
            RequestValidationError::InvalidUrlName
        );
        assert_eq!(
            sanitize_url_name("").expect_err("empty should fail"),
            RequestValidationError::Empty { field: "url_name" }
        );
        assert_eq!(
            sanitize_url_name("x".repeat(MAX_URL_NAME_CHARS + 1).as_str())
                .expect_err("oversized should fail"),
            RequestValidationError::TooLong {
                field: "url_name",
                limit: MAX_URL_NAME_CHARS
            }
        );
    }
}
