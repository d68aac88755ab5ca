//! Domain layer: the resource catalogue and the shape of stored documents.

pub mod document;
pub mod error;
pub mod resources;

pub use document::Document;
pub use error::DomainError;
pub use resources::ResourceKind;
