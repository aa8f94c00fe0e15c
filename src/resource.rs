use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::category::FileCategory;
use crate::{AppError, AppResult};

const READ_ONLY_FIELDS: &[&str] = &["id", "created_at", "updated_at", "deleted_at"];

/// Back-office resources exposed under `/api/<segment>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Properties,
    Prospects,
    BlogPosts,
    Users,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Properties,
        ResourceKind::Prospects,
        ResourceKind::BlogPosts,
        ResourceKind::Users,
    ];

    pub const fn path_segment(self) -> &'static str {
        match self {
            ResourceKind::Properties => "properties",
            ResourceKind::Prospects => "prospects",
            ResourceKind::BlogPosts => "blog-posts",
            ResourceKind::Users => "users",
        }
    }

    /// File categories this resource carries.
    pub fn categories(self) -> &'static [FileCategory] {
        match self {
            ResourceKind::Properties => &FileCategory::ALL,
            ResourceKind::BlogPosts => &[FileCategory::Images],
            ResourceKind::Prospects | ResourceKind::Users => &[],
        }
    }

    pub fn carries(self, category: FileCategory) -> bool {
        self.categories().contains(&category)
    }

    /// Upper bound on persisted plus pending files for `category`.
    pub fn max_files(self, category: FileCategory) -> Option<usize> {
        match (self, category) {
            (ResourceKind::BlogPosts, FileCategory::Images) => Some(1),
            _ => category.max_count(),
        }
    }

    /// Fields owned by the server and never sent back on save.
    pub fn is_read_only(self, field: &str) -> bool {
        READ_ONLY_FIELDS.contains(&field)
    }

    pub(crate) fn ensure_carries(self, category: FileCategory) -> AppResult<()> {
        if self.carries(category) {
            Ok(())
        } else {
            Err(AppError::new(
                "ATTACHMENTS/CATEGORY_UNSUPPORTED",
                "This resource does not accept that kind of file.",
            )
            .with_context("resource", self.path_segment())
            .with_context("category", category.as_str()))
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for ResourceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "properties" | "property" => Ok(ResourceKind::Properties),
            "prospects" | "prospect" | "leads" => Ok(ResourceKind::Prospects),
            "blog-posts" | "blog_posts" | "blog" => Ok(ResourceKind::BlogPosts),
            "users" | "user" => Ok(ResourceKind::Users),
            other => Err(AppError::new("RESOURCE/UNKNOWN", "Unknown resource")
                .with_context("resource", other)),
        }
    }
}
