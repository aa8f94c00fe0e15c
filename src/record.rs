//! Typed view of a back-office record.
//!
//! The API is inconsistent about shapes: list fields sometimes arrive as
//! arrays and sometimes as JSON-encoded strings, ids as numbers or strings,
//! and bodies may or may not be wrapped in a `{"data": ...}` envelope.
//! [`decode`] is the single place that absorbs those differences.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::category::FileCategory;
use crate::resource::ResourceKind;
use crate::{AppError, AppResult};

/// Opaque server-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<FieldValue>),
    Json(Map<String, Value>),
}

impl FieldValue {
    /// Numeric view; numeric strings count as numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse the value the way an operator would type it on the command line.
    pub fn parse_input(raw: &str) -> FieldValue {
        match raw {
            "" | "null" => return FieldValue::Null,
            "true" => return FieldValue::Bool(true),
            "false" => return FieldValue::Bool(false),
            _ => {}
        }
        if let Ok(Value::Number(n)) = serde_json::from_str::<Value>(raw) {
            return FieldValue::Number(n);
        }
        decode_text(raw.to_string())
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => decode_text(s),
            Value::Array(items) => FieldValue::List(items.into_iter().map(FieldValue::from).collect()),
            Value::Object(map) => FieldValue::Json(map),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

/// Strings holding an encoded array or object are expanded into structure.
fn decode_text(text: String) -> FieldValue {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        match serde_json::from_str::<Value>(&text) {
            Ok(value @ (Value::Array(_) | Value::Object(_))) => return FieldValue::from(value),
            _ => {}
        }
    }
    FieldValue::Text(text)
}

/// One record as held by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: ResourceKind,
    pub id: Option<RecordId>,
    pub scalars: BTreeMap<String, FieldValue>,
    pub persisted: BTreeMap<FileCategory, Vec<String>>,
}

impl Record {
    /// A record that has never been saved.
    pub fn draft(kind: ResourceKind) -> Self {
        let persisted = kind
            .categories()
            .iter()
            .map(|category| (*category, Vec::new()))
            .collect();
        Self {
            kind,
            id: None,
            scalars: BTreeMap::new(),
            persisted,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.scalars.get(name)
    }

    pub fn files(&self, category: FileCategory) -> &[String] {
        self.persisted
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn files_mut(&mut self, category: FileCategory) -> &mut Vec<String> {
        self.persisted.entry(category).or_default()
    }

    /// Flat JSON rendering, file lists as arrays.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert("id".into(), Value::String(id.to_string()));
        }
        for (name, value) in &self.scalars {
            map.insert(
                name.clone(),
                serde_json::to_value(value).unwrap_or(Value::Null),
            );
        }
        for (category, files) in &self.persisted {
            map.insert(
                category.as_str().into(),
                Value::Array(files.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }
}

/// Keys a response wrapper may carry next to `data`.
const ENVELOPE_KEYS: &[&str] = &["data", "message", "status", "success", "meta", "links"];

fn is_envelope(map: &Map<String, Value>) -> bool {
    map.get("data").is_some_and(Value::is_object)
        && map.keys().all(|key| ENVELOPE_KEYS.contains(&key.as_str()))
}

fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if is_envelope(&map) => map.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

fn decode_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(RecordId::new(s.clone())),
        Value::Number(n) => Some(RecordId::new(n.to_string())),
        _ => None,
    }
}

fn file_reference(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(mut map) => ["path", "url"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s),
                _ => None,
            }),
        _ => None,
    }
}

fn decode_files(category: FileCategory, value: Value) -> AppResult<Vec<String>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(items)) => items,
            Ok(Value::String(single)) => vec![Value::String(single)],
            // A bare path rather than an encoded list.
            Err(_) => vec![Value::String(s)],
            Ok(_) => {
                return Err(AppError::new(
                    "DECODE/FILE_LIST",
                    "File list is not an array of references",
                )
                .with_context("category", category.as_str()))
            }
        },
        Value::Array(items) => items,
        _ => {
            return Err(AppError::new(
                "DECODE/FILE_LIST",
                "File list is not an array of references",
            )
            .with_context("category", category.as_str()))
        }
    };
    Ok(items.into_iter().filter_map(file_reference).collect())
}

/// Normalise a server body into a [`Record`].
pub fn decode(kind: ResourceKind, body: Value) -> AppResult<Record> {
    let Value::Object(mut map) = unwrap_envelope(body) else {
        return Err(AppError::new("DECODE/NOT_OBJECT", "Expected a JSON object")
            .with_context("resource", kind.path_segment()));
    };

    let id = map.remove("id").as_ref().and_then(decode_id);
    let mut record = Record::draft(kind);
    record.id = id;

    for category in kind.categories() {
        let files = match map.remove(category.as_str()) {
            Some(value) => decode_files(*category, value)
                .map_err(|err| err.with_context("resource", kind.path_segment()))?,
            None => Vec::new(),
        };
        record.persisted.insert(*category, files);
    }

    record.scalars = map
        .into_iter()
        .map(|(name, value)| (name, FieldValue::from(value)))
        .collect();
    Ok(record)
}

/// Decode a collection body: a bare array or a `{"data": [...]}` envelope.
pub fn decode_list(kind: ResourceKind, body: Value) -> AppResult<Vec<Record>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AppError::new("DECODE/NOT_LIST", "Expected a JSON array")
                    .with_context("resource", kind.path_segment()))
            }
        },
        _ => {
            return Err(AppError::new("DECODE/NOT_LIST", "Expected a JSON array")
                .with_context("resource", kind.path_segment()))
        }
    };
    items.into_iter().map(|item| decode(kind, item)).collect()
}
