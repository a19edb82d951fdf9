use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::AppError;

pub const INVALID_NAME_CODE: &str = "ATTACHMENTS/INVALID_NAME";
pub const INVALID_MIME_CODE: &str = "ATTACHMENTS/INVALID_MIME";
pub const MIME_NOT_ALLOWED_CODE: &str = "ATTACHMENTS/MIME_NOT_ALLOWED";
pub const EXECUTABLE_CODE: &str = "ATTACHMENTS/EXECUTABLE_REJECTED";

const RESERVED_WINDOWS_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const MAX_NAME_BYTES: usize = 255;

/// Documents, office formats, images and plain text.
pub const ALLOWED_MIME_TYPES: [&str; 13] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "text/plain",
    "text/csv",
];

static MIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._+-]+/[a-zA-Z0-9._+-]+$")
        .expect("mime validation pattern to compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("file name is empty")]
    Empty,
    #[error("file name may not be . or ..")]
    RelativeSegment,
    #[error("file name is reserved")]
    ReservedName,
    #[error("file name may not end with a dot or space")]
    TrailingDotOrSpace,
    #[error("file name contains a forbidden character")]
    ForbiddenCharacter,
    #[error("file name is too long")]
    TooLong,
}

impl FilenameError {
    pub fn code(&self) -> &'static str {
        match self {
            FilenameError::Empty => "empty",
            FilenameError::RelativeSegment => "relative-segment",
            FilenameError::ReservedName => "reserved-name",
            FilenameError::TrailingDotOrSpace => "trailing-dot-or-space",
            FilenameError::ForbiddenCharacter => "forbidden-character",
            FilenameError::TooLong => "too-long",
        }
    }
}

impl From<FilenameError> for AppError {
    fn from(err: FilenameError) -> Self {
        AppError::new(INVALID_NAME_CODE, err.to_string()).with_context("reason", err.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MimeError {
    #[error("malformed MIME type")]
    Malformed(String),
    #[error("file type {0} is not allowed")]
    NotAllowed(String),
    #[error("executable content is not allowed")]
    Executable(&'static str),
}

impl From<MimeError> for AppError {
    fn from(err: MimeError) -> Self {
        let message = err.to_string();
        match err {
            MimeError::Malformed(value) => {
                AppError::new(INVALID_MIME_CODE, message).with_context("mime_type", value)
            }
            MimeError::NotAllowed(value) => {
                AppError::new(MIME_NOT_ALLOWED_CODE, message).with_context("mime_type", value)
            }
            MimeError::Executable(detected) => {
                AppError::new(EXECUTABLE_CODE, message).with_context("detected", detected)
            }
        }
    }
}

fn has_forbidden_characters(value: &str) -> bool {
    value.chars().any(|c| c.is_control() || FORBIDDEN_CHARS.contains(&c))
}

fn is_reserved_name(value: &str) -> bool {
    let stem = value
        .split_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(value);

    RESERVED_WINDOWS_NAMES
        .iter()
        .any(|candidate| stem.eq_ignore_ascii_case(candidate))
}

fn has_trailing_dot_or_space(value: &str) -> bool {
    value.trim_end_matches([' ', '.']).len() != value.len()
}

/// NFC-normalised upload name that is safe to hand back in a download header.
pub fn sanitize_filename(name: &str) -> Result<String, FilenameError> {
    if name.trim().is_empty() {
        return Err(FilenameError::Empty);
    }

    if name == "." || name == ".." {
        return Err(FilenameError::RelativeSegment);
    }

    let normalized: String = name.nfc().collect();

    if is_reserved_name(&normalized) {
        return Err(FilenameError::ReservedName);
    }

    if has_trailing_dot_or_space(&normalized) {
        return Err(FilenameError::TrailingDotOrSpace);
    }

    if has_forbidden_characters(&normalized) {
        return Err(FilenameError::ForbiddenCharacter);
    }

    if normalized.len() > MAX_NAME_BYTES {
        return Err(FilenameError::TooLong);
    }

    Ok(normalized)
}

/// Canonical MIME type for an upload.
///
/// Parameters such as `; charset=utf-8` are dropped. An empty declaration is
/// guessed from the file name.
pub fn resolve_mime(declared: &str, file_name: &str) -> Result<String, MimeError> {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let mime = if essence.is_empty() {
        mime_guess::from_path(file_name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    } else {
        essence
    };
    if !MIME_PATTERN.is_match(&mime) {
        return Err(MimeError::Malformed(mime));
    }
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(MimeError::NotAllowed(mime));
    }
    Ok(mime)
}

/// Reject payloads whose bytes identify as a program, whatever their label.
pub fn reject_executable(bytes: &[u8]) -> Result<(), MimeError> {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::App => {
            Err(MimeError::Executable(kind.mime_type()))
        }
        _ => Ok(()),
    }
}
