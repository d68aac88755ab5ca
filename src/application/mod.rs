//! Application services orchestrating the store, cache and notifications.

pub mod error;
pub mod invalidation;
pub mod repos;
pub mod resources;
