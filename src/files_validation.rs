use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::AppError;

const RESERVED_WINDOWS_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const MAX_NAME_BYTES: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("file name is empty")]
    Empty,
    #[error("file name is a relative segment")]
    RelativeSegment,
    #[error("file name is a reserved device name")]
    ReservedName,
    #[error("file name ends with a dot or space")]
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
    fn from(error: FilenameError) -> Self {
        AppError::new("ATTACHMENTS/INVALID_NAME", error.to_string())
            .with_context("reason", error.code())
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

/// Validate the name an upload is sent under and return its NFC form.
///
/// The server stores uploads under the client-supplied name, so anything
/// that would not survive as a single path component is refused here.
pub fn sanitize_upload_name(name: &str) -> Result<String, FilenameError> {
    if name.is_empty() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert_eq!(sanitize_upload_name("facade.jpg").unwrap(), "facade.jpg");
        assert_eq!(
            sanitize_upload_name("titre de propriété.pdf").unwrap(),
            "titre de propriété.pdf"
        );
    }

    #[test]
    fn normalizes_to_nfc() {
        let decomposed = "cafe\u{301}.png";
        assert_eq!(sanitize_upload_name(decomposed).unwrap(), "caf\u{e9}.png");
    }

    #[test]
    fn rejection_codes() {
        let cases = [
            ("", "empty"),
            ("..", "relative-segment"),
            ("CON.txt", "reserved-name"),
            ("lpt1", "reserved-name"),
            ("plan.pdf.", "trailing-dot-or-space"),
            ("plan.pdf ", "trailing-dot-or-space"),
            ("a/b.jpg", "forbidden-character"),
            ("tab\there.jpg", "forbidden-character"),
        ];
        for (name, code) in cases {
            let err = sanitize_upload_name(name).expect_err(name);
            assert_eq!(err.code(), code, "{name:?}");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let name = format!("{}.jpg", "x".repeat(MAX_NAME_BYTES));
        assert_eq!(sanitize_upload_name(&name), Err(FilenameError::TooLong));
    }

    #[test]
    fn converts_into_app_error() {
        let err = AppError::from(FilenameError::ReservedName);
        assert_eq!(err.code(), "ATTACHMENTS/INVALID_NAME");
        assert_eq!(err.context().get("reason").map(String::as_str), Some("reserved-name"));
    }
}
