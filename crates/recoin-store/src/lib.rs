//! SQLite persistence for the recoin messaging engine: the shared
//! connection wrapper, schema DDL, and the conversation/message
//! repositories.

pub mod conversations;
pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
