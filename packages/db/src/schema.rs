//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Safe to run on
/// every startup.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(IMAGE_SCHEMA).await?.check()?;
    db.query(THUMBNAIL_SCHEMA).await?.check()?;
    db.query(JOB_SCHEMA).await?.check()?;
    db.query(BROKER_MESSAGE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

// Timestamps are RFC 3339 strings, except on `job` where they are
// microseconds since the epoch so queries can order and filter on them.

/// Image table schema.
const IMAGE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS image SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS filename ON image TYPE string;
DEFINE FIELD IF NOT EXISTS original_filename ON image TYPE string;
DEFINE FIELD IF NOT EXISTS content_type ON image TYPE string;
DEFINE FIELD IF NOT EXISTS size ON image TYPE int;
DEFINE FIELD IF NOT EXISTS storage_key ON image TYPE string;
DEFINE FIELD IF NOT EXISTS created_at ON image TYPE string;
"#;

/// Thumbnail table schema.
const THUMBNAIL_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS thumbnail SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON thumbnail TYPE string READONLY;
DEFINE FIELD IF NOT EXISTS image_id ON thumbnail TYPE string READONLY;
DEFINE FIELD IF NOT EXISTS filename ON thumbnail TYPE string;
DEFINE FIELD IF NOT EXISTS content_type ON thumbnail TYPE string;
DEFINE FIELD IF NOT EXISTS size ON thumbnail TYPE int;
DEFINE FIELD IF NOT EXISTS storage_key ON thumbnail TYPE string;
DEFINE FIELD IF NOT EXISTS created_at ON thumbnail TYPE string;

-- At most one thumbnail per job
DEFINE INDEX IF NOT EXISTS thumbnail_job ON thumbnail FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS thumbnail_image ON thumbnail FIELDS image_id;
"#;

/// Job table schema.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS image_id ON job TYPE string READONLY;
DEFINE FIELD IF NOT EXISTS thumbnail_id ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string
    ASSERT $value INSIDE ["pending", "processing", "complete", "failure"];
DEFINE FIELD IF NOT EXISTS error ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE int;

DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_image ON job FIELDS image_id;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
"#;

/// Durable broker log. A row exists from enqueue until acknowledgment.
const BROKER_MESSAGE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS broker_message SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS seq ON broker_message TYPE int;
DEFINE FIELD IF NOT EXISTS job_id ON broker_message TYPE string;
DEFINE FIELD IF NOT EXISTS enqueued_at ON broker_message TYPE string;

DEFINE INDEX IF NOT EXISTS broker_message_seq ON broker_message FIELDS seq UNIQUE;
DEFINE INDEX IF NOT EXISTS broker_message_job ON broker_message FIELDS job_id;
"#;
