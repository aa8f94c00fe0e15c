use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// File-bearing field of a record.
///
/// Each category owns its wire names: the JSON/form list key, the path
/// segment used for per-file deletes, and the prefix of replacement keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Images,
    Documents,
    OwnerDocuments,
}

impl FileCategory {
    pub const ALL: [FileCategory; 3] = [
        FileCategory::Images,
        FileCategory::Documents,
        FileCategory::OwnerDocuments,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FileCategory::Images => "images",
            FileCategory::Documents => "documents",
            FileCategory::OwnerDocuments => "owner_documents",
        }
    }

    pub fn iter() -> impl Iterator<Item = FileCategory> {
        Self::ALL.into_iter()
    }

    /// Path segment of `DELETE /api/<resource>/<id>/<segment>/<index>`.
    pub const fn delete_segment(self) -> &'static str {
        match self {
            FileCategory::Images => "images",
            FileCategory::Documents => "document",
            FileCategory::OwnerDocuments => "owner-documents",
        }
    }

    /// Multipart key new uploads are appended under.
    pub fn list_key(self) -> String {
        format!("{}[]", self.as_str())
    }

    /// Multipart key carrying the replacement for the file at `position`.
    pub fn replacement_key(self, position: usize) -> String {
        format!("replace_{}_{position}", self.as_str())
    }

    /// Default cap on persisted plus pending files.
    pub const fn max_count(self) -> Option<usize> {
        match self {
            FileCategory::Images => None,
            FileCategory::Documents => Some(2),
            FileCategory::OwnerDocuments => Some(2),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid file category: {value}")]
pub struct CategoryError {
    value: String,
}

impl CategoryError {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FromStr for FileCategory {
    type Err = CategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" | "image" => Ok(FileCategory::Images),
            "documents" | "document" => Ok(FileCategory::Documents),
            "owner_documents" | "owner-documents" => Ok(FileCategory::OwnerDocuments),
            other => Err(CategoryError::new(other)),
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::FileCategory;
    use std::str::FromStr;

    #[test]
    fn parses_slugs_and_path_segments() {
        for variant in FileCategory::iter() {
            assert_eq!(FileCategory::from_str(variant.as_str()), Ok(variant));
            assert_eq!(FileCategory::from_str(variant.delete_segment()), Ok(variant));
        }
    }

    #[test]
    fn rejects_unknown() {
        let err = FileCategory::from_str("floorplans").unwrap_err();
        assert_eq!(err.value(), "floorplans");
    }

    #[test]
    fn wire_keys() {
        assert_eq!(FileCategory::Images.list_key(), "images[]");
        assert_eq!(
            FileCategory::OwnerDocuments.replacement_key(3),
            "replace_owner_documents_3"
        );
        assert_eq!(FileCategory::Documents.delete_segment(), "document");
        assert_eq!(FileCategory::Documents.max_count(), Some(2));
        assert_eq!(FileCategory::Images.max_count(), None);
    }
}
