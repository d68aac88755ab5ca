//! Which cache entries a write makes stale.

use std::fmt;

use uuid::Uuid;

use crate::cache::{CATEGORIES_WITH_MOVIES, CacheKey};
use crate::domain::{Document, ResourceKind, document};

/// Keyword that every movie-derived cache key contains.
pub const MOVIE_KEYWORD: &str = "movie";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Created,
    Updated,
    Deleted,
}

impl Mutation {
    pub fn verb(self) -> &'static str {
        match self {
            Mutation::Created => "created",
            Mutation::Updated => "updated",
            Mutation::Deleted => "deleted",
        }
    }
}

/// Exact keys to delete plus keywords to sweep after one write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub keys: Vec<CacheKey>,
    pub keywords: Vec<&'static str>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ keys: {}, keywords: {:?} }}",
            self.keys.len(),
            self.keywords
        )
    }
}

impl InvalidationPlan {
    /// Plan for a write to `id`. `document` is the stored state after a
    /// create or update, or the last state before a delete.
    pub fn for_mutation(
        kind: ResourceKind,
        id: Uuid,
        document: &Document,
        mutation: Mutation,
    ) -> Self {
        let mut plan = Self::default();
        match kind {
            // Lists, pages, details and single movies all contain the stem.
            ResourceKind::Movie => plan.keywords.push(MOVIE_KEYWORD),
            ResourceKind::Episode => {
                plan.keys.push(CacheKey::entity(kind, id));
                plan.keys.push(CacheKey::collection(kind));
                if let Some(movie_id) = document::uuid_field(document, "movie_id") {
                    plan.keys
                        .push(CacheKey::scoped(kind, &[&movie_id.to_string()]));
                }
                plan.keywords.push(MOVIE_KEYWORD);
            }
            ResourceKind::Quality => {
                plan.keys.push(CacheKey::entity(kind, id));
                plan.keys.push(CacheKey::collection(kind));
                if let Some(key) = quality_lookup_key(document) {
                    plan.keys.push(key);
                }
            }
            _ => {
                plan.keys.push(CacheKey::entity(kind, id));
                plan.keys.push(CacheKey::collection(kind));
                if mutation == Mutation::Deleted && kind.referenced_by_movies() {
                    plan.keywords.push(MOVIE_KEYWORD);
                } else if kind == ResourceKind::Category {
                    plan.keywords.push(CATEGORIES_WITH_MOVIES);
                }
            }
        }
        plan
    }

    /// Adds the keys scoped to the parents of the state an update replaced,
    /// so lookups under a parent the document moved away from are cleared.
    pub fn with_previous(mut self, kind: ResourceKind, id: Uuid, previous: &Document) -> Self {
        let earlier = Self::for_mutation(kind, id, previous, Mutation::Updated);
        for key in earlier.keys {
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
        for keyword in earlier.keywords {
            if !self.keywords.contains(&keyword) {
                self.keywords.push(keyword);
            }
        }
        self
    }

    /// Plan after a bulk movie insert.
    pub fn movies_created() -> Self {
        Self::movies_reordered()
    }

    /// Plan after bulk movie reordering.
    pub fn movies_reordered() -> Self {
        Self {
            keys: Vec::new(),
            keywords: vec![MOVIE_KEYWORD],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.keywords.is_empty()
    }
}

/// `qualities_<movie>_<episode>_<server>` for a quality document.
pub fn quality_lookup_key(document: &Document) -> Option<CacheKey> {
    let movie = document::uuid_field(document, "movie_id")?;
    let episode = document::uuid_field(document, "episode_id")?;
    let server = document::uuid_field(document, "server_id")?;
    Some(quality_key(movie, episode, server))
}

pub fn quality_key(movie: Uuid, episode: Uuid, server: Uuid) -> CacheKey {
    CacheKey::scoped(
        ResourceKind::Quality,
        &[&movie.to_string(), &episode.to_string(), &server.to_string()],
    )
}
