//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Document;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Conjunction of field matches plus ordering and a window.
///
/// A document matches `(field, value)` when the field equals `value`, or when
/// the field is an array containing `value`. `contains` clauses match string
/// fields case-insensitively; `not_equals` clauses also accept a missing field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub equals: Vec<(String, Value)>,
    pub not_equals: Vec<(String, Value)>,
    pub contains: Vec<(String, String)>,
    pub sort_by: Option<String>,
    pub descending: bool,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.not_equals.push((field.into(), value.into()));
        self
    }

    pub fn contains(mut self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.contains.push((field.into(), needle.into()));
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort_by = Some(field.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn window(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation of the match clause.
    pub fn matches(&self, document: &Document) -> bool {
        let equal = self.equals.iter().all(|(field, expected)| match document.get(field) {
            Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
            Some(actual) => actual == expected,
            None => false,
        });
        let different = self
            .not_equals
            .iter()
            .all(|(field, unwanted)| document.get(field) != Some(unwanted));
        let containing = self.contains.iter().all(|(field, needle)| {
            document
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase()))
        });
        equal && different && containing
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Document>, RepoError>;

    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, RepoError>;

    async fn insert(&self, collection: &str, id: Uuid, document: Document)
    -> Result<(), RepoError>;

    /// Inserts every document or none of them.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<(Uuid, Document)>,
    ) -> Result<(), RepoError>;

    /// Replaces the stored body. Returns `false` when no document has `id`.
    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        document: Document,
    ) -> Result<bool, RepoError>;

    /// Returns `false` when no document has `id`.
    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}
