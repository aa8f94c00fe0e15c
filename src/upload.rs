use std::fmt;
use std::path::Path;

use infer::Infer;
use mime_guess::MimeGuess;
use sha2::{Digest, Sha256};

use crate::files_validation::sanitize_upload_name;
use crate::{AppError, AppResult};

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file blob staged for upload. It has no server identity until saved.
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    file_name: String,
    mime: String,
    bytes: Vec<u8>,
    fingerprint: String,
}

impl FileUpload {
    /// Build an upload from memory. The MIME type is sniffed from the
    /// content first and falls back to the file extension.
    pub fn from_bytes(file_name: &str, bytes: Vec<u8>) -> AppResult<Self> {
        let file_name = sanitize_upload_name(file_name).map_err(AppError::from)?;
        let mime = detect_mime(&file_name, &bytes);
        let fingerprint = fingerprint(&bytes);
        Ok(Self {
            file_name,
            mime,
            bytes,
            fingerprint,
        })
    }

    pub async fn from_path(path: &Path) -> AppResult<Self> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AppError::new("ATTACHMENTS/INVALID_INPUT", "Path does not name a file")
            })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "read_upload"))?;
        Self::from_bytes(&file_name, bytes)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 of the content; logged in place of the file name.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

fn detect_mime(file_name: &str, bytes: &[u8]) -> String {
    if let Some(kind) = Infer::new().get(bytes) {
        return kind.mime_type().to_string();
    }
    MimeGuess::from_path(file_name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
