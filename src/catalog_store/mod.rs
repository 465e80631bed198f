mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{Kind, ProgressMap, SeasonProgress, Title, UnitSelector};
pub use schema::{CATALOG_BASE_TABLES, CATALOG_MIGRATIONS};
pub use store::SqliteCatalogStore;
pub use trait_def::CatalogStore;
