//! Local edit buffer for one record.
//!
//! Holds the server's view of the record plus a [`Changeset`] of staged
//! work, scalar edits included. Per-file deletes hit the server
//! immediately; scalar edits, new uploads and replacements wait for
//! [`EditBuffer::save`]. Every mutation takes `&mut self`, so a buffer
//! never has two requests in flight.

use tracing::{debug, info, warn};

use crate::api::RecordStore;
use crate::category::FileCategory;
use crate::changeset::{self, Changeset, Mutation, Timing};
use crate::form::{self, FormPayload};
use crate::record::{FieldValue, Record, RecordId};
use crate::resource::ResourceKind;
use crate::upload::FileUpload;
use crate::{AppError, AppResult};

pub struct EditBuffer<'s, S: RecordStore> {
    store: &'s S,
    record: Record,
    changes: Changeset,
}

impl<'s, S: RecordStore> EditBuffer<'s, S> {
    /// Fetch a record and open a buffer on it. On failure no buffer exists.
    pub async fn load(store: &'s S, kind: ResourceKind, id: &RecordId) -> AppResult<Self> {
        let record = store.fetch(kind, id).await.map_err(|err| {
            warn!(
                target: "listing_desk",
                event = "record_load_failed",
                resource = kind.path_segment(),
                record_id = id.as_str(),
                code = err.code(),
            );
            err.with_context("resource", kind.path_segment())
        })?;
        debug!(
            target: "listing_desk",
            event = "record_loaded",
            resource = kind.path_segment(),
            record_id = id.as_str(),
        );
        Ok(Self {
            store,
            record,
            changes: Changeset::new(),
        })
    }

    /// A buffer for a record that does not exist yet; saving creates it.
    pub fn draft(store: &'s S, kind: ResourceKind) -> Self {
        Self {
            store,
            record: Record::draft(kind),
            changes: Changeset::new(),
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn changes(&self) -> &Changeset {
        &self.changes
    }

    pub fn kind(&self) -> ResourceKind {
        self.record.kind
    }

    pub fn is_dirty(&self) -> bool {
        self.changes.is_dirty()
    }

    pub fn persisted(&self, category: FileCategory) -> &[String] {
        self.record.files(category)
    }

    pub fn pending(&self, category: FileCategory) -> &[FileUpload] {
        self.changes.pending(category)
    }

    /// Current value of a scalar field, staged edits included.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.changes
            .scalar_edits()
            .get(name)
            .or_else(|| self.record.field(name))
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, value: FieldValue) {
        self.changes.set_scalar(name, value);
    }

    pub fn stage_new_file(&mut self, category: FileCategory, file: FileUpload) -> AppResult<()> {
        let kind = self.kind();
        kind.ensure_carries(category)?;
        let persisted = self.record.files(category).len();
        let fingerprint = file.fingerprint().to_string();
        self.changes
            .stage_new(category, file, persisted, kind.max_files(category))?;
        debug!(
            target: "listing_desk",
            event = "file_staged",
            resource = kind.path_segment(),
            category = category.as_str(),
            fingerprint = fingerprint.as_str(),
        );
        Ok(())
    }

    pub fn stage_replacement(
        &mut self,
        category: FileCategory,
        position: usize,
        file: FileUpload,
    ) -> AppResult<()> {
        self.kind().ensure_carries(category)?;
        let persisted = self.record.files(category).len();
        self.changes
            .stage_replacement(category, position, file, persisted)
    }

    pub fn remove_pending_new_file(
        &mut self,
        category: FileCategory,
        index: usize,
    ) -> AppResult<FileUpload> {
        self.changes.remove_pending(category, index)
    }

    /// Delete one persisted file on the server right away.
    ///
    /// On success the file is removed locally, later files shift down and
    /// staged replacements are re-keyed to follow them. On failure nothing
    /// changes. The dirty flag is never touched.
    pub async fn delete_persisted(&mut self, category: FileCategory, position: usize) -> AppResult<()> {
        let kind = self.kind();
        kind.ensure_carries(category)?;
        let len = self.record.files(category).len();
        changeset::ensure_position(category, position, len)?;
        let id = self.record.id.clone().ok_or_else(|| {
            AppError::new(
                "ATTACHMENTS/NOT_PERSISTED",
                "The record has not been saved yet.",
            )
        })?;

        self.store
            .delete_file(kind, &id, category, position)
            .await
            .map_err(|err| {
                err.with_context("resource", kind.path_segment())
                    .with_context("category", category.as_str())
                    .with_context("position", position.to_string())
            })?;

        self.record.files_mut(category).remove(position);
        let dropped = self.changes.persisted_removed(category, position);
        info!(
            target: "listing_desk",
            event = "file_deleted",
            resource = kind.path_segment(),
            record_id = id.as_str(),
            category = category.as_str(),
            position,
            dropped_replacement = dropped.is_some(),
        );
        Ok(())
    }

    /// Route a mutation by its declared timing.
    pub async fn apply(&mut self, mutation: Mutation) -> AppResult<()> {
        let name = mutation.name();
        if mutation.timing() == Timing::Immediate {
            debug!(target: "listing_desk", event = "mutation_immediate", mutation = name);
        }
        match mutation {
            Mutation::SetScalar { name, value } => {
                self.set_scalar(name, value);
                Ok(())
            }
            Mutation::AddFile { category, file } => self.stage_new_file(category, file),
            Mutation::ReplaceFile {
                category,
                position,
                file,
            } => self.stage_replacement(category, position, file),
            Mutation::DeletePersisted { category, position } => {
                self.delete_persisted(category, position).await
            }
            Mutation::RemovePending { category, index } => {
                self.remove_pending_new_file(category, index).map(|_| ())
            }
        }
    }

    /// The body [`EditBuffer::save`] would send.
    pub fn payload(&self) -> FormPayload {
        form::build_save_payload(&self.record, &self.changes)
    }

    /// Send every staged change in one multipart request.
    ///
    /// On success the server's representation replaces the record and the
    /// changeset is cleared. On failure the buffer is left exactly as it
    /// was so the save can be retried.
    pub async fn save(&mut self) -> AppResult<&Record> {
        let kind = self.kind();
        let payload = self.payload();
        let files = payload.file_count();

        let result = match &self.record.id {
            Some(id) => self.store.update(kind, id, payload).await,
            None => self.store.create(kind, payload).await,
        };
        let saved = match result {
            Ok(saved) => saved,
            Err(err) => {
                warn!(
                    target: "listing_desk",
                    event = "record_save_failed",
                    resource = kind.path_segment(),
                    record_id = self.record.id.as_ref().map(RecordId::as_str),
                    code = err.code(),
                    field_errors = err.field_errors().len(),
                );
                return Err(err.with_context("resource", kind.path_segment()));
            }
        };

        info!(
            target: "listing_desk",
            event = "record_saved",
            resource = kind.path_segment(),
            record_id = saved.id.as_ref().map(RecordId::as_str),
            files,
        );
        self.record = saved;
        self.changes.clear();
        Ok(&self.record)
    }

    /// Drop staged work without talking to the server.
    pub fn discard(&mut self) {
        self.changes.clear();
    }
}
