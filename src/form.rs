use reqwest::multipart::{Form, Part};

use crate::changeset::{Changeset, Effect};
use crate::record::{FieldValue, Record};
use crate::upload::FileUpload;
use crate::AppResult;

/// Field the backend reads to treat a `POST` as a `PUT`.
pub const METHOD_OVERRIDE_FIELD: &str = "_method";

#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text { name: String, value: String },
    File { name: String, file: FileUpload },
}

impl FormPart {
    pub fn name(&self) -> &str {
        match self {
            FormPart::Text { name, .. } | FormPart::File { name, .. } => name,
        }
    }
}

/// Ordered multipart body, kept as plain data until it hits the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormPayload {
    parts: Vec<FormPart>,
}

impl FormPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn file(&mut self, name: impl Into<String>, file: FileUpload) {
        self.parts.push(FormPart::File {
            name: name.into(),
            file,
        });
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            FormPart::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn files_named(&self, name: &str) -> Vec<&FileUpload> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                FormPart::File { name: n, file } if n == name => Some(file),
                _ => None,
            })
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, FormPart::File { .. }))
            .count()
    }

    pub fn into_multipart(self) -> AppResult<Form> {
        let mut form = Form::new();
        for part in self.parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name, value),
                FormPart::File { name, file } => {
                    let body = Part::bytes(file.bytes().to_vec())
                        .file_name(file.file_name().to_string())
                        .mime_str(file.mime())?;
                    form.part(name, body)
                }
            };
        }
        Ok(form)
    }
}

/// Append `value` under `name`, flattening lists into indexed keys.
pub fn push_field(payload: &mut FormPayload, name: &str, value: &FieldValue) {
    match value {
        FieldValue::Null => payload.text(name, ""),
        FieldValue::Bool(b) => payload.text(name, if *b { "1" } else { "0" }),
        FieldValue::Number(n) => payload.text(name, n.to_string()),
        FieldValue::Text(s) => payload.text(name, s.as_str()),
        FieldValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                push_field(payload, &format!("{name}[{index}]"), item);
            }
        }
        FieldValue::Json(map) => {
            payload.text(name, serde_json::Value::Object(map.clone()).to_string())
        }
    }
}

/// Flatten a record and its staged changes into one aggregate save body.
pub fn build_save_payload(record: &Record, changes: &Changeset) -> FormPayload {
    let mut payload = FormPayload::new();
    if record.id.is_some() {
        payload.text(METHOD_OVERRIDE_FIELD, "PUT");
    }
    for (name, value) in changes.merged_scalars(&record.scalars) {
        if record.kind.is_read_only(name) {
            continue;
        }
        push_field(&mut payload, name, value);
    }
    for effect in changes.effects() {
        match effect {
            Effect::Upload { category, file } => payload.file(category.list_key(), file.clone()),
            Effect::Replace {
                category,
                position,
                file,
            } => payload.file(category.replacement_key(position), file.clone()),
        }
    }
    payload
}
