pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod query;
pub mod result_set;
pub mod watcher;

pub use collection::{Collection, CollectionStats};
pub use config::{IdStrategy, Options};
pub use database::{Database, DEFAULT_COLLECTION};
pub use document::{callback_ref, CallbackRegistry, Document, IntoDocument};
pub use error::{JsonDbError, Result};
pub use query::Query;
pub use result_set::ResultSet;
