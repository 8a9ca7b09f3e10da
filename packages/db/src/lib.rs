//! SurrealDB integration for the thumbnail pipeline.
//!
//! This crate provides database connectivity and repositories for
//! persisting jobs, image and thumbnail records, and the broker log.
//!
//! # Features
//!
//! The in-memory engine (`mem://`) is always available.
//!
//! - `rocksdb`: RocksDB for persistent file-based storage (`rocksdb://path`)
//! - `remote`: connect to a SurrealDB server over WebSocket (`ws://`, `wss://`)

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;

/// Connect and initialize the schema.
///
/// This should be called once at application startup; the returned handle
/// is then passed to every repository.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

/// Parse a ULID-backed id out of a SurrealDB record id.
pub(crate) fn parse_record_id<T, E: std::fmt::Display>(
    thing: &surrealdb::sql::Thing,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, DbError> {
    let raw = thing.id.to_raw();
    parse(&raw).map_err(|e| DbError::Serialization(format!("invalid record id {}: {}", thing, e)))
}
