//! Resource operations: validate, write to the store, invalidate the cache,
//! notify listeners.
//!
//! Reads go through the cache-aside layer. Writes commit to the store first;
//! cache invalidation and notification afterwards are best effort and never
//! turn a committed write into a failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::invalidation::{self, InvalidationPlan, Mutation};
use crate::application::repos::{DocumentFilter, DocumentStore, RepoError};
use crate::cache::{CacheAside, CacheKey, CacheTtl};
use crate::domain::{Document, DomainError, ResourceKind, document};
use crate::notify::{Notification, Notifier};

const SOURCE: &str = "application::resources";

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MOVIE_PAGE_SIZE: u32 = 24;
/// Movies embedded per category on one page of the categories view.
pub const CATEGORY_MOVIES_PER_PAGE: u64 = 6;

const ACTIVE_STATUS: i64 = 1;
const HIDDEN_STATUS: i64 = 2;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("{kind} not found")]
    NotFound { kind: ResourceKind },
    #[error("{kind} titled `{title}` already exists")]
    Duplicate { kind: ResourceKind, title: String },
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl ResourceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

impl From<DomainError> for ResourceError {
    fn from(err: DomainError) -> Self {
        Self::invalid(err.to_string())
    }
}

/// One entry of a bulk movie reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MoviePosition {
    pub id: Uuid,
    pub position: i64,
}

#[derive(Clone)]
pub struct ResourceService {
    store: Arc<dyn DocumentStore>,
    cache: CacheAside,
    notifier: Notifier,
    query_timeout: Duration,
    movie_page_size: u32,
}

impl ResourceService {
    pub fn new(store: Arc<dyn DocumentStore>, cache: CacheAside, notifier: Notifier) -> Self {
        Self {
            store,
            cache,
            notifier,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            movie_page_size: DEFAULT_MOVIE_PAGE_SIZE,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_movie_page_size(mut self, size: u32) -> Self {
        self.movie_page_size = size.max(1);
        self
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub async fn health(&self) -> Result<(), ResourceError> {
        self.timed(self.store.health_check()).await
    }

    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<Document>, ResourceError> {
        let key = CacheKey::collection(kind);
        let filter = DocumentFilter::new().sort_by(kind.default_sort());
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::List), || {
                self.timed(self.store.find(kind.collection(), &filter))
            })
            .await
    }

    pub async fn get(&self, kind: ResourceKind, id: Uuid) -> Result<Document, ResourceError> {
        let key = CacheKey::entity(kind, id);
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::Entity), || {
                self.load_existing(kind, id)
            })
            .await
    }

    /// One page of movies ordered by `position`. Pages start at 1.
    pub async fn movie_page(&self, page: u32) -> Result<Vec<Document>, ResourceError> {
        if page == 0 {
            return Err(ResourceError::invalid("page numbers start at 1"));
        }
        let kind = ResourceKind::Movie;
        let size = u64::from(self.movie_page_size);
        let filter = DocumentFilter::new()
            .sort_by(kind.default_sort())
            .window(u64::from(page - 1) * size, size);
        let key = CacheKey::page(kind, page);
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::Page), || {
                self.timed(self.store.find(kind.collection(), &filter))
            })
            .await
    }

    pub async fn episodes_for_movie(&self, movie_id: Uuid) -> Result<Vec<Document>, ResourceError> {
        let kind = ResourceKind::Episode;
        let key = CacheKey::scoped(kind, &[&movie_id.to_string()]);
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::List), || {
                self.load_episodes(movie_id)
            })
            .await
    }

    pub async fn qualities_for(
        &self,
        movie_id: Uuid,
        episode_id: Uuid,
        server_id: Uuid,
    ) -> Result<Vec<Document>, ResourceError> {
        let kind = ResourceKind::Quality;
        let key = invalidation::quality_key(movie_id, episode_id, server_id);
        let filter = DocumentFilter::new()
            .eq("movie_id", movie_id.to_string())
            .eq("episode_id", episode_id.to_string())
            .eq("server_id", server_id.to_string())
            .sort_by(kind.default_sort());
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::List), || {
                self.timed(self.store.find(kind.collection(), &filter))
            })
            .await
    }

    /// Movie with its episodes embedded under `episodes`.
    pub async fn movie_detail(&self, id: Uuid) -> Result<Document, ResourceError> {
        let key = CacheKey::movie_detail(id);
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::Detail), || async {
                let mut movie = self.load_existing(ResourceKind::Movie, id).await?;
                let episodes = self.load_episodes(id).await?;
                movie.insert(
                    "episodes".to_string(),
                    Value::Array(episodes.into_iter().map(Value::Object).collect()),
                );
                Ok::<_, ResourceError>(movie)
            })
            .await
    }

    /// Movies whose title contains `query`, ignoring case, ordered by
    /// `position`. Hidden movies are left out.
    pub async fn search_movies(&self, query: &str) -> Result<Vec<Document>, ResourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResourceError::invalid("search query must not be empty"));
        }
        let kind = ResourceKind::Movie;
        let filter = DocumentFilter::new()
            .contains("title", query)
            .ne("status", HIDDEN_STATUS)
            .sort_by(kind.default_sort());
        let key = CacheKey::movie_search(query);
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::Page), || {
                self.timed(self.store.find(kind.collection(), &filter))
            })
            .await
    }

    /// Every category, newest first, each with one page of its active movies
    /// embedded under `movies`. Page 0 is read as page 1.
    pub async fn categories_with_movies(&self, page: u32) -> Result<Vec<Document>, ResourceError> {
        let page = page.max(1);
        let key = CacheKey::categories_with_movies(page);
        self.cache
            .get_or_load(&key, self.cache.ttl(CacheTtl::Page), || {
                self.load_categories_with_movies(page)
            })
            .await
    }

    pub async fn create(&self, kind: ResourceKind, body: Value) -> Result<Document, ResourceError> {
        let mut document = document::from_body(body)?;
        self.guard_title(kind, &mut document, None).await?;

        let id = Uuid::new_v4();
        document::stamp_created(&mut document, id, &document::now_rfc3339());
        self.timed(self.store.insert(kind.collection(), id, document.clone()))
            .await?;

        info!(target_module = SOURCE, kind = %kind, %id, "Resource created");
        let plan = InvalidationPlan::for_mutation(kind, id, &document, Mutation::Created);
        self.after_write(kind, id, &document, plan, Mutation::Created)
            .await;
        Ok(document)
    }

    /// Inserts several movies in one store call. Either all are stored or
    /// none is.
    pub async fn create_movies_bulk(&self, bodies: Vec<Value>) -> Result<Vec<Document>, ResourceError> {
        if bodies.is_empty() {
            return Err(ResourceError::invalid("`movies` must not be empty"));
        }
        let kind = ResourceKind::Movie;
        let now = document::now_rfc3339();
        let mut rows = Vec::with_capacity(bodies.len());
        for body in bodies {
            let mut document = document::from_body(body)?;
            let id = Uuid::new_v4();
            document::stamp_created(&mut document, id, &now);
            rows.push((id, document));
        }
        let created: Vec<Document> = rows.iter().map(|(_, document)| document.clone()).collect();

        self.timed(self.store.insert_many(kind.collection(), rows))
            .await?;

        info!(target_module = SOURCE, count = created.len(), "Movies created in bulk");
        self.apply_plan(&InvalidationPlan::movies_created()).await;
        self.notifier
            .publish(
                Notification::new(kind.notification_type(), "Movies created")
                    .field("count", created.len()),
            )
            .await;
        Ok(created)
    }

    /// Replaces the body of an existing document.
    pub async fn update(
        &self,
        kind: ResourceKind,
        id: Uuid,
        body: Value,
    ) -> Result<Document, ResourceError> {
        let mut document = document::from_body(body)?;
        let previous = self.load_existing(kind, id).await?;
        self.guard_title(kind, &mut document, Some(id)).await?;

        document::stamp_updated(&mut document, &previous, id, &document::now_rfc3339());
        self.replace(kind, id, &previous, document).await
    }

    /// Sets one field of an existing document.
    pub async fn patch_field(
        &self,
        kind: ResourceKind,
        id: Uuid,
        field: &str,
        value: Value,
    ) -> Result<Document, ResourceError> {
        let field = field.trim();
        if field.is_empty() {
            return Err(ResourceError::invalid("field name must not be empty"));
        }
        if document::is_reserved(field) {
            return Err(ResourceError::invalid(format!(
                "field `{field}` is managed by the service"
            )));
        }

        let previous = self.load_existing(kind, id).await?;
        let mut document = previous.clone();
        document.insert(field.to_string(), value);
        if field == "title" {
            self.guard_title(kind, &mut document, Some(id)).await?;
        }

        document::stamp_updated(&mut document, &previous, id, &document::now_rfc3339());
        self.replace(kind, id, &previous, document).await
    }

    pub async fn delete(&self, kind: ResourceKind, id: Uuid) -> Result<(), ResourceError> {
        let previous = self.load_existing(kind, id).await?;
        if !self.timed(self.store.delete(kind.collection(), id)).await? {
            return Err(ResourceError::NotFound { kind });
        }

        info!(target_module = SOURCE, kind = %kind, %id, "Resource deleted");
        let plan = InvalidationPlan::for_mutation(kind, id, &previous, Mutation::Deleted);
        self.after_write(kind, id, &previous, plan, Mutation::Deleted)
            .await;
        Ok(())
    }

    /// Applies new `position` values. Every id must exist before anything is
    /// written.
    pub async fn reorder_movies(&self, positions: &[MoviePosition]) -> Result<usize, ResourceError> {
        let kind = ResourceKind::Movie;
        let mut documents = Vec::with_capacity(positions.len());
        for entry in positions {
            let document = self.load_existing(kind, entry.id).await?;
            documents.push((entry, document));
        }

        let now = document::now_rfc3339();
        for (entry, mut document) in documents {
            document.insert("position".to_string(), Value::from(entry.position));
            document.insert(
                document::UPDATED_AT_FIELD.to_string(),
                Value::String(now.clone()),
            );
            if !self
                .timed(self.store.update(kind.collection(), entry.id, document))
                .await?
            {
                return Err(ResourceError::NotFound { kind });
            }
        }

        info!(
            target_module = SOURCE,
            count = positions.len(),
            "Movie positions updated"
        );
        self.apply_plan(&InvalidationPlan::movies_reordered()).await;
        self.notifier
            .publish(
                Notification::new(kind.notification_type(), "Movie positions updated")
                    .field("count", positions.len()),
            )
            .await;
        Ok(positions.len())
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        id: Uuid,
        previous: &Document,
        document: Document,
    ) -> Result<Document, ResourceError> {
        if !self
            .timed(self.store.update(kind.collection(), id, document.clone()))
            .await?
        {
            return Err(ResourceError::NotFound { kind });
        }

        info!(target_module = SOURCE, kind = %kind, %id, "Resource updated");
        let plan = InvalidationPlan::for_mutation(kind, id, &document, Mutation::Updated)
            .with_previous(kind, id, previous);
        self.after_write(kind, id, &document, plan, Mutation::Updated)
            .await;
        Ok(document)
    }

    async fn load_existing(&self, kind: ResourceKind, id: Uuid) -> Result<Document, ResourceError> {
        self.timed(self.store.find_by_id(kind.collection(), id))
            .await?
            .ok_or(ResourceError::NotFound { kind })
    }

    async fn load_episodes(&self, movie_id: Uuid) -> Result<Vec<Document>, ResourceError> {
        let kind = ResourceKind::Episode;
        let filter = DocumentFilter::new()
            .eq("movie_id", movie_id.to_string())
            .sort_by(kind.default_sort());
        self.timed(self.store.find(kind.collection(), &filter)).await
    }

    async fn load_categories_with_movies(&self, page: u32) -> Result<Vec<Document>, ResourceError> {
        let categories = DocumentFilter::new().sort_by("created_at").descending();
        let mut categories = self
            .timed(self.store.find(ResourceKind::Category.collection(), &categories))
            .await?;

        let skip = u64::from(page - 1) * CATEGORY_MOVIES_PER_PAGE;
        for category in &mut categories {
            let Some(id) = document::id_of(category) else {
                continue;
            };
            let filter = DocumentFilter::new()
                .eq("category", id.to_string())
                .eq("status", ACTIVE_STATUS)
                .sort_by(ResourceKind::Movie.default_sort())
                .window(skip, CATEGORY_MOVIES_PER_PAGE);
            let movies = self
                .timed(self.store.find(ResourceKind::Movie.collection(), &filter))
                .await?;
            category.insert(
                "movies".to_string(),
                Value::Array(movies.into_iter().map(Value::Object).collect()),
            );
        }
        Ok(categories)
    }

    /// Requires a unique, non-empty title for the kinds that need one and
    /// stores it trimmed.
    async fn guard_title(
        &self,
        kind: ResourceKind,
        document: &mut Document,
        current: Option<Uuid>,
    ) -> Result<(), ResourceError> {
        if !kind.has_unique_title() {
            return Ok(());
        }
        let title = document::title(document)
            .map(str::to_string)
            .ok_or_else(|| ResourceError::invalid("`title` is required"))?;

        let filter = DocumentFilter::new().eq("title", title.clone());
        let existing = self.timed(self.store.find(kind.collection(), &filter)).await?;
        let taken = existing
            .iter()
            .any(|other| current.is_none() || document::id_of(other) != current);
        if taken {
            return Err(ResourceError::Duplicate { kind, title });
        }

        document.insert("title".to_string(), Value::String(title));
        Ok(())
    }

    async fn after_write(
        &self,
        kind: ResourceKind,
        id: Uuid,
        document: &Document,
        plan: InvalidationPlan,
        mutation: Mutation,
    ) {
        debug!(target_module = SOURCE, kind = %kind, %id, plan = %plan, "Invalidating cache");
        self.apply_plan(&plan).await;

        let notification = change_notification(kind, id, document, mutation);
        match mutation {
            Mutation::Created | Mutation::Updated => {
                self.notifier
                    .publish_with(notification, kind.singular(), document)
                    .await
            }
            Mutation::Deleted => self.notifier.publish(notification).await,
        }
    }

    async fn apply_plan(&self, plan: &InvalidationPlan) {
        self.cache.invalidate_many(&plan.keys).await;
        for keyword in &plan.keywords {
            self.cache.invalidate_by_keyword(keyword).await;
        }
    }

    async fn timed<T, F>(&self, operation: F) -> Result<T, ResourceError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        match tokio::time::timeout(self.query_timeout, operation).await {
            Ok(result) => result.map_err(ResourceError::from),
            Err(_) => Err(ResourceError::Timeout(self.query_timeout)),
        }
    }
}

/// `{"type", "message", "id"}` plus the parent ids listeners filter on.
fn change_notification(
    kind: ResourceKind,
    id: Uuid,
    document: &Document,
    mutation: Mutation,
) -> Notification {
    let mut notification = Notification::new(
        kind.notification_type(),
        format!("{} {}", kind.label(), mutation.verb()),
    )
    .field("id", id.to_string());

    let related: &[(&str, &str)] = match kind {
        ResourceKind::Episode => &[("movie_id", "movieID")],
        ResourceKind::Quality => &[
            ("movie_id", "movieID"),
            ("episode_id", "episodeID"),
            ("server_id", "serverID"),
        ],
        _ => &[],
    };
    for (field, wire) in related {
        if let Some(value) = document.get(*field) {
            notification = notification.field(*wire, value.clone());
        }
    }
    notification
}
