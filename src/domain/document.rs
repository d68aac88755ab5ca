//! Schemaless resource documents.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::error::DomainError;

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// Accepts a client body as a document, dropping service-managed fields.
pub fn from_body(body: Value) -> Result<Document, DomainError> {
    match body {
        Value::Object(mut document) => {
            for field in RESERVED_FIELDS {
                document.remove(field);
            }
            Ok(document)
        }
        other => Err(DomainError::validation(format!(
            "request body must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

pub fn id_of(document: &Document) -> Option<Uuid> {
    uuid_field(document, ID_FIELD)
}

pub fn uuid_field(document: &Document, field: &str) -> Option<Uuid> {
    document
        .get(field)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

pub fn str_field<'a>(document: &'a Document, field: &str) -> Option<&'a str> {
    document.get(field).and_then(Value::as_str)
}

/// Trimmed, non-empty `title`.
pub fn title(document: &Document) -> Option<&str> {
    str_field(document, "title")
        .map(str::trim)
        .filter(|title| !title.is_empty())
}

pub fn stamp_created(document: &mut Document, id: Uuid, now: &str) {
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    document.insert(CREATED_AT_FIELD.to_string(), Value::String(now.to_string()));
    document.insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_string()));
}

/// Carries identity and creation time over from `previous` into a replacement.
pub fn stamp_updated(document: &mut Document, previous: &Document, id: Uuid, now: &str) {
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    let created = previous
        .get(CREATED_AT_FIELD)
        .cloned()
        .unwrap_or_else(|| Value::String(now.to_string()));
    document.insert(CREATED_AT_FIELD.to_string(), created);
    document.insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_string()));
}

pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
