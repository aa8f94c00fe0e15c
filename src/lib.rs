//! Client library for a real-estate agency's back-office API.
//!
//! The interesting part is [`edit_buffer`]: a record being edited carries a
//! changeset of staged scalar edits and file uploads/replacements, while
//! per-file deletes go to the server immediately. Everything else is
//! plumbing around it: typed decoding of inconsistent API bodies, the
//! multipart save format, the bearer session and client-side list filters.

pub mod api;
pub mod category;
pub mod changeset;
pub mod config;
pub mod edit_buffer;
pub mod error;
pub mod files_validation;
pub mod filter;
pub mod form;
pub mod logging;
pub mod record;
pub mod resource;
pub mod session;
pub mod upload;

pub use api::{ApiClient, RecordStore};
pub use category::FileCategory;
pub use changeset::{Changeset, Effect, Mutation, Timing};
pub use config::ClientConfig;
pub use edit_buffer::EditBuffer;
pub use error::{AppError, AppResult};
pub use filter::{PropertyFilter, ProspectFilter, RecordFilter};
pub use form::{FormPart, FormPayload};
pub use record::{FieldValue, Record, RecordId};
pub use resource::ResourceKind;
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionHandle, SessionStore};
pub use upload::FileUpload;
