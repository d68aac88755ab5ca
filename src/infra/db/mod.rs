//! Document store adapters.

mod memory;
mod postgres;
mod util;

pub use memory::MemoryDocuments;
pub use postgres::PostgresDocuments;
pub use util::map_sqlx_error;
