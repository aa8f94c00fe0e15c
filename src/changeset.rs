//! Staged edits against one record.
//!
//! Every mutation declares when it reaches the server: per-file deletes are
//! immediate, everything else is deferred until the aggregate save. The
//! changeset only ever holds deferred work; immediate mutations report back
//! through [`Changeset::persisted_removed`] so staged replacements keep
//! pointing at the same underlying file.

use std::collections::BTreeMap;

use crate::category::FileCategory;
use crate::record::FieldValue;
use crate::upload::FileUpload;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Sent to the server as soon as it is requested.
    Immediate,
    /// Held locally until the aggregate save.
    Deferred,
}

/// A user-requested change to a record being edited.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetScalar {
        name: String,
        value: FieldValue,
    },
    AddFile {
        category: FileCategory,
        file: FileUpload,
    },
    ReplaceFile {
        category: FileCategory,
        position: usize,
        file: FileUpload,
    },
    DeletePersisted {
        category: FileCategory,
        position: usize,
    },
    RemovePending {
        category: FileCategory,
        index: usize,
    },
}

impl Mutation {
    pub fn timing(&self) -> Timing {
        match self {
            Mutation::DeletePersisted { .. } => Timing::Immediate,
            Mutation::SetScalar { .. }
            | Mutation::AddFile { .. }
            | Mutation::ReplaceFile { .. }
            | Mutation::RemovePending { .. } => Timing::Deferred,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SetScalar { .. } => "set_scalar",
            Mutation::AddFile { .. } => "add_file",
            Mutation::ReplaceFile { .. } => "replace_file",
            Mutation::DeletePersisted { .. } => "delete_persisted",
            Mutation::RemovePending { .. } => "remove_pending",
        }
    }
}

/// Deferred file work, in the order the save serialises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect<'a> {
    Upload {
        category: FileCategory,
        file: &'a FileUpload,
    },
    Replace {
        category: FileCategory,
        position: usize,
        file: &'a FileUpload,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    scalars: BTreeMap<String, FieldValue>,
    new_files: BTreeMap<FileCategory, Vec<FileUpload>>,
    replacements: BTreeMap<FileCategory, BTreeMap<usize, FileUpload>>,
    dirty: bool,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Overwrite a scalar field; no validation happens at this layer.
    pub fn set_scalar(&mut self, name: impl Into<String>, value: FieldValue) {
        self.scalars.insert(name.into(), value);
        self.dirty = true;
    }

    pub fn scalar_edits(&self) -> &BTreeMap<String, FieldValue> {
        &self.scalars
    }

    /// Server-side scalars with staged edits laid over them.
    pub fn merged_scalars<'a>(
        &'a self,
        base: &'a BTreeMap<String, FieldValue>,
    ) -> BTreeMap<&'a str, &'a FieldValue> {
        let mut merged: BTreeMap<&str, &FieldValue> = base
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect();
        merged.extend(
            self.scalars
                .iter()
                .map(|(name, value)| (name.as_str(), value)),
        );
        merged
    }

    pub fn pending(&self, category: FileCategory) -> &[FileUpload] {
        self.new_files
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn replacements(&self, category: FileCategory) -> Option<&BTreeMap<usize, FileUpload>> {
        self.replacements.get(&category)
    }

    pub fn replacement(&self, category: FileCategory, position: usize) -> Option<&FileUpload> {
        self.replacements
            .get(&category)
            .and_then(|by_position| by_position.get(&position))
    }

    /// Append a new upload. `persisted` is the number of files already on
    /// the server for the category and `cap` its maximum, if any.
    pub fn stage_new(
        &mut self,
        category: FileCategory,
        file: FileUpload,
        persisted: usize,
        cap: Option<usize>,
    ) -> AppResult<()> {
        let pending = self.pending(category).len();
        if let Some(cap) = cap {
            if persisted + pending >= cap {
                return Err(AppError::new(
                    "ATTACHMENTS/LIMIT_REACHED",
                    "No more files can be added to this category.",
                )
                .with_context("category", category.as_str())
                .with_context("limit", cap.to_string()));
            }
        }
        self.new_files.entry(category).or_default().push(file);
        self.dirty = true;
        Ok(())
    }

    /// Stage a replacement; a later one at the same position overwrites it.
    pub fn stage_replacement(
        &mut self,
        category: FileCategory,
        position: usize,
        file: FileUpload,
        persisted: usize,
    ) -> AppResult<()> {
        if position >= persisted {
            return Err(position_out_of_range(category, position, persisted));
        }
        self.replacements
            .entry(category)
            .or_default()
            .insert(position, file);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_pending(&mut self, category: FileCategory, index: usize) -> AppResult<FileUpload> {
        let files = self.new_files.get_mut(&category);
        match files {
            Some(files) if index < files.len() => {
                let removed = files.remove(index);
                if files.is_empty() {
                    self.new_files.remove(&category);
                }
                Ok(removed)
            }
            _ => Err(AppError::new(
                "ATTACHMENTS/PENDING_NOT_FOUND",
                "No pending file at that index.",
            )
            .with_context("category", category.as_str())
            .with_context("index", index.to_string())),
        }
    }

    /// Re-key replacements after the server deleted the file at `position`.
    ///
    /// The replacement for the deleted file is dropped and the ones behind
    /// it move down by one, so each keeps targeting the file it was staged
    /// for. Returns the dropped replacement, if any.
    pub fn persisted_removed(
        &mut self,
        category: FileCategory,
        position: usize,
    ) -> Option<FileUpload> {
        let by_position = self.replacements.remove(&category)?;
        let mut dropped = None;
        let rekeyed: BTreeMap<usize, FileUpload> = by_position
            .into_iter()
            .filter_map(|(at, file)| {
                if at == position {
                    dropped = Some(file);
                    None
                } else if at > position {
                    Some((at - 1, file))
                } else {
                    Some((at, file))
                }
            })
            .collect();
        if !rekeyed.is_empty() {
            self.replacements.insert(category, rekeyed);
        }
        dropped
    }

    /// Deferred file work: uploads in staging order, then replacements by
    /// ascending position, category by category.
    pub fn effects(&self) -> Vec<Effect<'_>> {
        let mut effects = Vec::new();
        for category in FileCategory::iter() {
            for file in self.pending(category) {
                effects.push(Effect::Upload { category, file });
            }
            if let Some(by_position) = self.replacements.get(&category) {
                for (position, file) in by_position {
                    effects.push(Effect::Replace {
                        category,
                        position: *position,
                        file,
                    });
                }
            }
        }
        effects
    }

    pub fn clear(&mut self) {
        self.scalars.clear();
        self.new_files.clear();
        self.replacements.clear();
        self.dirty = false;
    }
}

fn position_out_of_range(category: FileCategory, position: usize, len: usize) -> AppError {
    AppError::new(
        "ATTACHMENTS/POSITION_OUT_OF_RANGE",
        "No stored file at that position.",
    )
    .with_context("category", category.as_str())
    .with_context("position", position.to_string())
    .with_context("len", len.to_string())
}

pub(crate) fn ensure_position(category: FileCategory, position: usize, len: usize) -> AppResult<()> {
    if position < len {
        Ok(())
    } else {
        Err(position_out_of_range(category, position, len))
    }
}
