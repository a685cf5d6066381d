//! SurrealDB-backed SessionLedger implementation
//!
//! Each sealed record is stored as one row; the record itself travels as a
//! JSON string so the stored bytes are exactly what the digest covers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::keyed_lock::KeyedLocks;
use crate::migrations;
use crate::records::{ExecutionRecord, NewExecutionRecord, SessionId};
use crate::storage_traits::{SessionLedger, StorageResult};

const NAMESPACE: &str = "rigor";
const DATABASE: &str = "ledger";

/// Row in `execution_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordRow {
    /// SurrealDB record ID
    id: Option<surrealdb::sql::Thing>,
    session_id: String,
    seq: u64,
    record_digest: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct TipRow {
    seq: u64,
    record_digest: String,
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    session_id: String,
}

/// SurrealDB-backed implementation of [`SessionLedger`].
pub struct SurrealSessionLedger {
    db: Surreal<Any>,
    writers: KeyedLocks<SessionId, ()>,
}

impl SurrealSessionLedger {
    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://<path>`, ...).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url, "SurrealSessionLedger connected");
        Ok(Self {
            db,
            writers: KeyedLocks::new(),
        })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Persistent local instance stored under `path`.
    pub async fn local(path: &std::path::Path) -> StorageResult<Self> {
        std::fs::create_dir_all(path)?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    async fn tip(&self, session_id: &SessionId) -> StorageResult<Option<TipRow>> {
        let sid = session_id.to_string();
        let mut res = self
            .db
            .query(
                "SELECT seq, record_digest FROM execution_records \
                 WHERE session_id = $sid ORDER BY seq DESC LIMIT 1",
            )
            .bind(("sid", sid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<TipRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    fn row_to_record(row: RecordRow) -> StorageResult<ExecutionRecord> {
        let record: ExecutionRecord =
            serde_json::from_str(&row.body).map_err(|e| StorageError::Corrupt {
                session_id: row.session_id.clone(),
                line: row.seq as usize,
                reason: e.to_string(),
            })?;
        if record.seq != row.seq || record.record_digest != row.record_digest {
            return Err(StorageError::Corrupt {
                session_id: row.session_id,
                line: row.seq as usize,
                reason: "row columns disagree with record body".into(),
            });
        }
        Ok(record)
    }
}

#[async_trait]
impl SessionLedger for SurrealSessionLedger {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewExecutionRecord,
    ) -> StorageResult<ExecutionRecord> {
        record.validate()?;

        let slot = self.writers.slot(session_id);
        let _guard = slot.lock().await;

        let tip = self.tip(session_id).await?;
        let (seq, prev) = match tip {
            Some(t) => (t.seq + 1, Some(t.record_digest)),
            None => (1, None),
        };
        let sealed = ExecutionRecord::seal(session_id.clone(), seq, record, prev)?;

        let row = RecordRow {
            id: None,
            session_id: session_id.to_string(),
            seq,
            record_digest: sealed.record_digest.clone(),
            body: serde_json::to_string(&sealed)?,
        };

        let _created: Option<RecordRow> = self
            .db
            .create("execution_records")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(session_id = %session_id, seq, "ledger row created");
        Ok(sealed)
    }

    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<ExecutionRecord>> {
        let sid = session_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM execution_records WHERE session_id = $sid ORDER BY seq ASC")
            .bind(("sid", sid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RecordRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn sessions(&self) -> StorageResult<Vec<SessionId>> {
        let mut res = self
            .db
            .query("SELECT session_id FROM execution_records GROUP BY session_id")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<SessionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut ids: Vec<SessionId> = rows.into_iter().map(|r| SessionId(r.session_id)).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
