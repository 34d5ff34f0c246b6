pub mod errors;
pub mod services;

pub use errors::{SearchError, StoreErrorKind};
pub use services::search::SearchService;
