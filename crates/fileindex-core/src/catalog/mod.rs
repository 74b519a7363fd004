pub mod loader;
pub mod models;
pub mod path_cache;
pub mod paths;
pub mod queries;
pub mod registry;
pub mod remove;
pub mod sqlite;

pub use loader::{RunFailures, RunPath};
pub use models::*;
pub use paths::{normalize_dir, parent_dir};
pub use remove::RemovalStats;
pub use sqlite::{Catalog, CatalogOptions, SCHEMA_VERSION};
