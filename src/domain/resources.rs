//! Catalogue of the content resources served by the backend.
//!
//! Every resource kind knows its storage collection, the stems used to build
//! its cache keys and the `type` it announces in change notifications.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Movie,
    Episode,
    Server,
    Quality,
    Category,
    Genre,
    Country,
    User,
    Ad,
    News,
    Slide,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Movie,
        ResourceKind::Episode,
        ResourceKind::Server,
        ResourceKind::Quality,
        ResourceKind::Category,
        ResourceKind::Genre,
        ResourceKind::Country,
        ResourceKind::User,
        ResourceKind::Ad,
        ResourceKind::News,
        ResourceKind::Slide,
    ];

    /// Storage collection name. Also the URL segment under `/api`.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Movie => "movies",
            ResourceKind::Episode => "episodes",
            ResourceKind::Server => "servers",
            ResourceKind::Quality => "qualities",
            ResourceKind::Category => "categories",
            ResourceKind::Genre => "genres",
            ResourceKind::Country => "countries",
            ResourceKind::User => "users",
            ResourceKind::Ad => "ads",
            ResourceKind::News => "news",
            ResourceKind::Slide => "slides",
        }
    }

    /// Stem for single-entity cache keys (`<singular>_<id>`).
    pub fn singular(self) -> &'static str {
        match self {
            ResourceKind::Movie => "movie",
            ResourceKind::Episode => "episode",
            ResourceKind::Server => "server",
            ResourceKind::Quality => "quality",
            ResourceKind::Category => "category",
            ResourceKind::Genre => "genre",
            ResourceKind::Country => "country",
            ResourceKind::User => "user",
            ResourceKind::Ad => "ad",
            ResourceKind::News => "news",
            ResourceKind::Slide => "slide",
        }
    }

    /// Stem for collection and composite cache keys.
    pub fn plural(self) -> &'static str {
        self.collection()
    }

    pub fn notification_type(self) -> &'static str {
        self.singular()
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Movie => "Movie",
            ResourceKind::Episode => "Episode",
            ResourceKind::Server => "Server",
            ResourceKind::Quality => "Quality",
            ResourceKind::Category => "Category",
            ResourceKind::Genre => "Genre",
            ResourceKind::Country => "Country",
            ResourceKind::User => "User",
            ResourceKind::Ad => "Ad",
            ResourceKind::News => "News",
            ResourceKind::Slide => "Slide",
        }
    }

    /// Kinds whose `title` must be unique within the collection.
    pub fn has_unique_title(self) -> bool {
        matches!(
            self,
            ResourceKind::Category
                | ResourceKind::Genre
                | ResourceKind::Country
                | ResourceKind::Server
        )
    }

    /// Kinds referenced from movie documents; deleting one stales every
    /// movie-derived cache entry.
    pub fn referenced_by_movies(self) -> bool {
        matches!(
            self,
            ResourceKind::Category | ResourceKind::Genre | ResourceKind::Country
        )
    }

    pub fn default_sort(self) -> &'static str {
        match self {
            ResourceKind::Movie | ResourceKind::Slide => "position",
            ResourceKind::Episode => "number",
            _ => "created_at",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.collection() == value || kind.singular() == value)
            .ok_or_else(|| DomainError::unknown_resource(value))
    }
}
