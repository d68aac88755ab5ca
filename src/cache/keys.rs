//! Cache key scheme.
//!
//! Keys are plain strings so that keyword sweeps can match on substrings:
//!
//! - `<plural>` for a whole collection (`movies`, `categories`)
//! - `<singular>_<id>` for one entity (`movie_<uuid>`)
//! - `<plural>_<dim>_<dim>...` for paged or filtered reads
//!   (`movies_3`, `qualities_<movie>_<episode>_<server>`)
//! - `movies_search_<query>` and `categorieswithmovie_<page>` for the
//!   storefront views
//!
//! All construction goes through [`CacheKey`] so collisions between stems are
//! visible in one place.

use std::fmt;

use uuid::Uuid;

use crate::domain::ResourceKind;

/// Stem of the paged categories-with-movies view.
pub const CATEGORIES_WITH_MOVIES: &str = "categorieswithmovie";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a raw name, used by operator tooling.
    pub fn raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn collection(kind: ResourceKind) -> Self {
        Self(kind.plural().to_string())
    }

    pub fn entity(kind: ResourceKind, id: Uuid) -> Self {
        Self(format!("{}_{}", kind.singular(), id))
    }

    pub fn page(kind: ResourceKind, page: u32) -> Self {
        Self(format!("{}_{}", kind.plural(), page))
    }

    /// Collection narrowed by one or more dimensions.
    pub fn scoped(kind: ResourceKind, dimensions: &[&str]) -> Self {
        let mut key = kind.plural().to_string();
        for dimension in dimensions {
            key.push('_');
            key.push_str(dimension);
        }
        Self(key)
    }

    /// Movie with its episodes embedded.
    pub fn movie_detail(id: Uuid) -> Self {
        Self(format!("movie_detail_{id}"))
    }

    /// Title search; the query is trimmed and lowercased.
    pub fn movie_search(query: &str) -> Self {
        Self(format!("movies_search_{}", query.trim().to_lowercase()))
    }

    pub fn categories_with_movies(page: u32) -> Self {
        Self(format!("{CATEGORIES_WITH_MOVIES}_{page}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// TTL class of a cached read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// Whole collections.
    List,
    /// Single documents.
    Entity,
    /// Aggregated detail views.
    Detail,
    /// Paged and filtered lists.
    Page,
}
