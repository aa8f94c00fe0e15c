#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

use listing_desk_lib::form::{FormPart, METHOD_OVERRIDE_FIELD};
use listing_desk_lib::record;
use listing_desk_lib::{
    AppError, AppResult, FieldValue, FileCategory, FileUpload, FormPayload, Record, RecordId,
    RecordStore, ResourceKind,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch(RecordId),
    List,
    Create(FormPayload),
    Update(RecordId, FormPayload),
    DeleteFile(RecordId, FileCategory, usize),
    DeleteRecord(RecordId),
}

#[derive(Default)]
struct State {
    records: HashMap<(ResourceKind, RecordId), Record>,
    calls: Vec<Call>,
    fail_next: Option<AppError>,
    next_id: u64,
}

/// In-memory stand-in for the back-office API. Saves behave the way the
/// server does: scalars overwrite, `<category>[]` files append and
/// `replace_<category>_<n>` files swap the file at `n`.
#[derive(Default)]
pub struct FakeStore {
    state: StdMutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(kind: ResourceKind, body: Value) -> (Self, RecordId) {
        let store = Self::new();
        let id = store.insert(kind, body);
        (store, id)
    }

    pub fn insert(&self, kind: ResourceKind, body: Value) -> RecordId {
        let record = record::decode(kind, body).expect("decode seed record");
        let id = record.id.clone().expect("seed record has an id");
        self.state
            .lock()
            .unwrap()
            .records
            .insert((kind, id.clone()), record);
        id
    }

    pub fn stored(&self, kind: ResourceKind, id: &RecordId) -> Record {
        self.state.lock().unwrap().records[&(kind, id.clone())].clone()
    }

    /// The next call of any kind fails with `error`.
    pub fn fail_next(&self, error: AppError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn last_payload(&self) -> Option<FormPayload> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Create(payload) | Call::Update(_, payload) => Some(payload),
            _ => None,
        })
    }

    fn begin(&self, call: Call) -> AppResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

fn not_found(id: &RecordId) -> AppError {
    AppError::new("HTTP/NOT_FOUND", "Record not found").with_context("id", id.to_string())
}

fn stored_name(file: &FileUpload) -> String {
    format!("uploads/{}-{}", &file.fingerprint()[..8], file.file_name())
}

fn replacement_target(name: &str) -> Option<(FileCategory, usize)> {
    let rest = name.strip_prefix("replace_")?;
    let (category, position) = rest.rsplit_once('_')?;
    Some((category.parse().ok()?, position.parse().ok()?))
}

fn apply_payload(record: &mut Record, payload: &FormPayload) {
    let mut replaced = Vec::new();
    for part in payload.parts() {
        match part {
            FormPart::Text { name, .. } if name == METHOD_OVERRIDE_FIELD => {}
            FormPart::Text { name, value } if !name.contains('[') => {
                record
                    .scalars
                    .insert(name.clone(), FieldValue::from(value.as_str()));
            }
            FormPart::Text { .. } => {}
            FormPart::File { name, file } => {
                if let Some(category) = FileCategory::iter().find(|c| c.list_key() == *name) {
                    record
                        .persisted
                        .entry(category)
                        .or_default()
                        .push(stored_name(file));
                } else if let Some((category, position)) = replacement_target(name) {
                    replaced.push((category, position, stored_name(file)));
                }
            }
        }
    }
    for (category, position, name) in replaced {
        if let Some(slot) = record
            .persisted
            .get_mut(&category)
            .and_then(|files| files.get_mut(position))
        {
            *slot = name;
        }
    }
}

impl RecordStore for FakeStore {
    async fn fetch(&self, kind: ResourceKind, id: &RecordId) -> AppResult<Record> {
        let state = self.begin(Call::Fetch(id.clone()))?;
        state
            .records
            .get(&(kind, id.clone()))
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn list(&self, kind: ResourceKind) -> AppResult<Vec<Record>> {
        let state = self.begin(Call::List)?;
        let mut records: Vec<Record> = state
            .records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn create(&self, kind: ResourceKind, payload: FormPayload) -> AppResult<Record> {
        let mut state = self.begin(Call::Create(payload.clone()))?;
        state.next_id += 1;
        let id = RecordId::new(format!("new-{}", state.next_id));
        let mut record = Record::draft(kind);
        record.id = Some(id.clone());
        apply_payload(&mut record, &payload);
        state.records.insert((kind, id), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &RecordId,
        payload: FormPayload,
    ) -> AppResult<Record> {
        let mut state = self.begin(Call::Update(id.clone(), payload.clone()))?;
        let record = state
            .records
            .get_mut(&(kind, id.clone()))
            .ok_or_else(|| not_found(id))?;
        apply_payload(record, &payload);
        Ok(record.clone())
    }

    async fn delete_file(
        &self,
        kind: ResourceKind,
        id: &RecordId,
        category: FileCategory,
        position: usize,
    ) -> AppResult<()> {
        let mut state = self.begin(Call::DeleteFile(id.clone(), category, position))?;
        let record = state
            .records
            .get_mut(&(kind, id.clone()))
            .ok_or_else(|| not_found(id))?;
        let files = record.persisted.entry(category).or_default();
        if position >= files.len() {
            return Err(AppError::new("HTTP/NOT_FOUND", "File not found"));
        }
        files.remove(position);
        Ok(())
    }

    async fn delete_record(&self, kind: ResourceKind, id: &RecordId) -> AppResult<()> {
        let mut state = self.begin(Call::DeleteRecord(id.clone()))?;
        state
            .records
            .remove(&(kind, id.clone()))
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }
}

pub fn upload(name: &str, body: &str) -> FileUpload {
    FileUpload::from_bytes(name, body.as_bytes().to_vec()).expect("valid upload")
}

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("listing_desk=debug"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn log_lines(buffer: &Arc<StdMutex<Vec<u8>>>) -> Vec<Value> {
    let raw = String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8");
    raw.lines()
        .map(|line| serde_json::from_str(line).expect("json log line"))
        .collect()
}
