pub mod export;
pub mod listing;
pub mod pricing;
pub mod schema;
pub mod taxonomy;

pub use listing::ListingRow;
pub use schema::{HeaderSchema, TemplateCatalog};
pub use taxonomy::Condition;
