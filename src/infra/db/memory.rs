//! In-process document store used when no database is configured.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::application::repos::{DocumentFilter, DocumentStore, RepoError};
use crate::domain::{Document, ResourceKind};

/// Mirrors the partial unique index of the Postgres schema.
const UNIQUE_TITLE_CONSTRAINT: &str = "documents_unique_title";

struct Stored {
    seq: u64,
    body: Document,
}

/// Collections of documents kept in memory, lost on restart.
///
/// Titles are unique within the collections of kinds that require it; the
/// check and the write happen under the same shard lock.
pub struct MemoryDocuments {
    collections: DashMap<String, HashMap<Uuid, Stored>>,
    unique_titles: HashSet<&'static str>,
    next_seq: AtomicU64,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            unique_titles: ResourceKind::ALL
                .into_iter()
                .filter(|kind| kind.has_unique_title())
                .map(ResourceKind::collection)
                .collect(),
            next_seq: AtomicU64::new(0),
        }
    }

    fn check_title(
        &self,
        collection: &str,
        documents: &HashMap<Uuid, Stored>,
        id: Uuid,
        body: &Document,
    ) -> Result<(), RepoError> {
        if !self.unique_titles.contains(collection) {
            return Ok(());
        }
        let Some(title) = body.get("title").and_then(Value::as_str) else {
            return Ok(());
        };
        let taken = documents.iter().any(|(other, stored)| {
            *other != id && stored.body.get("title").and_then(Value::as_str) == Some(title)
        });
        if taken {
            return Err(RepoError::Duplicate {
                constraint: UNIQUE_TITLE_CONSTRAINT.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryDocuments {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Document>, RepoError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(&id).map(|stored| stored.body.clone())))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, RepoError> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Stored> = documents
            .values()
            .filter(|stored| filter.matches(&stored.body))
            .collect();
        matched.sort_by(|a, b| {
            let by_field = match filter.sort_by.as_deref() {
                Some(field) if filter.descending => {
                    compare_values(b.body.get(field), a.body.get(field))
                }
                Some(field) => compare_values(a.body.get(field), b.body.get(field)),
                None => Ordering::Equal,
            };
            by_field.then(a.seq.cmp(&b.seq))
        });

        let skip = usize::try_from(filter.skip).unwrap_or(usize::MAX);
        let limit = filter
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|stored| stored.body.clone())
            .collect())
    }

    async fn insert(
        &self,
        collection: &str,
        id: Uuid,
        document: Document,
    ) -> Result<(), RepoError> {
        let mut documents = self.collections.entry(collection.to_string()).or_default();
        if documents.contains_key(&id) {
            return Err(RepoError::Duplicate {
                constraint: "documents_pkey".to_string(),
            });
        }
        self.check_title(collection, &documents, id, &document)?;
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        documents.insert(id, Stored { seq, body: document });
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<(Uuid, Document)>,
    ) -> Result<(), RepoError> {
        let mut stored = self.collections.entry(collection.to_string()).or_default();
        let mut seen = HashSet::with_capacity(documents.len());
        if documents
            .iter()
            .any(|(id, _)| stored.contains_key(id) || !seen.insert(*id))
        {
            return Err(RepoError::Duplicate {
                constraint: "documents_pkey".to_string(),
            });
        }
        for (id, body) in &documents {
            self.check_title(collection, &stored, *id, body)?;
        }
        let mut titles = HashSet::new();
        if self.unique_titles.contains(collection)
            && documents
                .iter()
                .filter_map(|(_, body)| body.get("title").and_then(Value::as_str))
                .any(|title| !titles.insert(title))
        {
            return Err(RepoError::Duplicate {
                constraint: UNIQUE_TITLE_CONSTRAINT.to_string(),
            });
        }
        for (id, body) in documents {
            let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
            stored.insert(id, Stored { seq, body });
        }
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        document: Document,
    ) -> Result<bool, RepoError> {
        let Some(mut documents) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        if !documents.contains_key(&id) {
            return Ok(false);
        }
        self.check_title(collection, &documents, id, &document)?;
        match documents.get_mut(&id) {
            Some(stored) => {
                stored.body = document;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, RepoError> {
        Ok(self
            .collections
            .get_mut(collection)
            .is_some_and(|mut documents| documents.remove(&id).is_some()))
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Orders missing < null < string < number < bool < array < object, the
/// ranking Postgres applies to `jsonb`.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::Bool(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
