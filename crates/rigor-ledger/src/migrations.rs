//! SurrealDB schema for the session ledger
//!
//! Safe to run on every connection; `DEFINE` statements are idempotent.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all ledger tables.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing ledger schema");
    init_execution_records_table(db).await?;
    Ok(())
}

/// Initialize the `execution_records` table
///
/// Schema:
/// ```text
/// TABLE execution_records {
///   session_id:     STRING (indexed)
///   seq:            INT (1-indexed, gapless within a session)
///   record_digest:  STRING (hash chain tip after this record)
///   body:           STRING (sealed record as JSON)
/// }
/// ```
///
/// Constraints:
/// - `(session_id, seq)` is unique, so a racing writer cannot reuse a number
/// - rows are never updated or deleted
async fn init_execution_records_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing execution_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS execution_records AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_session_seq ON TABLE execution_records
            COLUMNS session_id, seq UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_session ON TABLE execution_records
            COLUMNS session_id;
    "#;

    db.query(sql).await?.check()?;
    info!("execution_records table initialized");
    Ok(())
}
