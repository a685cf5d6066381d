//! Filesystem-backed session ledger.
//!
//! Layout: `<root>/<session_id>/ledger.jsonl`, one sealed record per line.
//! Every append is fsynced before it is acknowledged. A trailing line without
//! its newline is what a crash mid-append leaves behind; it is truncated by
//! the next append.
//!
//! Appends hold `ledger.lock` (an advisory file lock) while they derive the
//! tip and write, so separate processes sharing a root stay gapless. The tip
//! is cached per instance and re-read whenever the file length no longer
//! matches what this instance last wrote.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::file_lock::{LedgerFileLock, LOCK_FILE};
use crate::keyed_lock::KeyedLocks;
use crate::records::{ExecutionRecord, NewExecutionRecord, SessionId};
use crate::storage_traits::{SessionLedger, StorageResult};

pub const LEDGER_FILE: &str = "ledger.jsonl";

/// Next sequence number and chain tip of one session file.
#[derive(Debug, Clone)]
struct Cursor {
    next_seq: u64,
    last_digest: Option<String>,
    /// File length the cursor was derived at.
    file_len: u64,
}

impl Cursor {
    fn empty() -> Self {
        Self {
            next_seq: 1,
            last_digest: None,
            file_len: 0,
        }
    }
}

/// Append-only JSONL ledger, one file per session.
#[derive(Debug)]
pub struct FsSessionLedger {
    root: PathBuf,
    cursors: KeyedLocks<SessionId, Option<Cursor>>,
}

impl FsSessionLedger {
    /// Create a ledger rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cursors: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one session's ledger file.
    pub fn session_dir(&self, session_id: &SessionId) -> StorageResult<PathBuf> {
        let id = session_id.as_str();
        let safe = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(StorageError::InvariantViolation {
                reason: format!("session id {id:?} is not a valid directory name"),
            });
        }
        Ok(self.root.join(id))
    }

    pub fn ledger_path(&self, session_id: &SessionId) -> StorageResult<PathBuf> {
        Ok(self.session_dir(session_id)?.join(LEDGER_FILE))
    }

    /// Read the session file, truncating a torn trailing line, and return the
    /// cursor for the next append.
    async fn recover(&self, session_id: &SessionId, path: &Path) -> StorageResult<Cursor> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Cursor::empty()),
            Err(e) => return Err(e.into()),
        };

        let complete_len = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        if complete_len < bytes.len() {
            warn!(
                session_id = %session_id,
                dropped_bytes = bytes.len() - complete_len,
                "truncating torn trailing ledger line"
            );
            let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
            file.set_len(complete_len as u64).await?;
            file.sync_all().await?;
        }

        let records = parse_lines(session_id, &bytes[..complete_len])?;
        Ok(match records.last() {
            Some(last) => Cursor {
                next_seq: last.seq + 1,
                last_digest: Some(last.record_digest.clone()),
                file_len: complete_len as u64,
            },
            None => Cursor {
                file_len: complete_len as u64,
                ..Cursor::empty()
            },
        })
    }

    async fn file_len(path: &Path) -> StorageResult<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_line(path: &Path, line: &[u8]) -> StorageResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line).await?;
        file.sync_data().await?;
        Ok(())
    }
}

fn parse_lines(session_id: &SessionId, bytes: &[u8]) -> StorageResult<Vec<ExecutionRecord>> {
    let mut records = Vec::new();
    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let record: ExecutionRecord =
            serde_json::from_slice(line).map_err(|e| StorageError::Corrupt {
                session_id: session_id.to_string(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl SessionLedger for FsSessionLedger {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewExecutionRecord,
    ) -> StorageResult<ExecutionRecord> {
        record.validate()?;
        let dir = self.session_dir(session_id)?;
        let path = dir.join(LEDGER_FILE);

        let slot = self.cursors.slot(session_id);
        let mut guard = slot.lock().await;

        tokio::fs::create_dir_all(&dir).await?;
        let _file_lock = LedgerFileLock::acquire(dir.join(LOCK_FILE)).await?;

        let on_disk = Self::file_len(&path).await?;
        let cursor = match guard.as_ref() {
            Some(c) if c.file_len == on_disk => c.clone(),
            cached => {
                if cached.is_some() {
                    debug!(session_id = %session_id, "ledger changed on disk, re-reading tip");
                }
                self.recover(session_id, &path).await?
            }
        };

        let sealed = ExecutionRecord::seal(
            session_id.clone(),
            cursor.next_seq,
            record,
            cursor.last_digest.clone(),
        )?;
        let mut line = serde_json::to_vec(&sealed)?;
        line.push(b'\n');

        if let Err(e) = Self::write_line(&path, &line).await {
            // Force a re-read so a partial write is truncated before the next append.
            *guard = None;
            return Err(e);
        }

        *guard = Some(Cursor {
            next_seq: sealed.seq + 1,
            last_digest: Some(sealed.record_digest.clone()),
            file_len: cursor.file_len + line.len() as u64,
        });
        debug!(session_id = %session_id, seq = sealed.seq, "ledger line appended");
        Ok(sealed)
    }

    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<ExecutionRecord>> {
        let path = self.ledger_path(session_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        // An in-flight or torn append is not part of the ledger yet.
        let complete_len = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        parse_lines(session_id, &bytes[..complete_len])
    }

    async fn sessions(&self) -> StorageResult<Vec<SessionId>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let ledger = entry.path().join(LEDGER_FILE);
            match tokio::fs::metadata(&ledger).await {
                Ok(meta) if meta.len() > 0 => {
                    if let Some(name) = entry.file_name().to_str() {
                        out.push(SessionId::from(name));
                    }
                }
                _ => {}
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{
        ConfirmationStatus, ContentDigest, Outcome, RecordVerdicts,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn clean_success(code: &str) -> NewExecutionRecord {
        let now = Utc::now();
        NewExecutionRecord {
            attempt_id: Uuid::new_v4(),
            code: code.to_string(),
            code_digest: ContentDigest::from_bytes(code.as_bytes()),
            confirmed_flag: false,
            prior_seq: None,
            verdicts: RecordVerdicts::default(),
            confirmation: ConfirmationStatus::NotRequired,
            outcome: Outcome::ExecutedSuccess,
            failure: None,
            output: None,
            inputs: vec![],
            started_at: now,
            ended_at: now,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsSessionLedger::new(dir.path()).unwrap();
        let sid = SessionId::from("s1");

        let a = ledger.append(&sid, clean_success("a")).await.unwrap();
        let b = ledger.append(&sid, clean_success("b")).await.unwrap();
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(b.prev_digest.as_deref(), Some(a.record_digest.as_str()));

        let text = std::fs::read_to_string(dir.path().join("s1").join(LEDGER_FILE)).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_reopen_continues_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let sid = SessionId::from("s1");
        {
            let ledger = FsSessionLedger::new(dir.path()).unwrap();
            ledger.append(&sid, clean_success("a")).await.unwrap();
        }
        let ledger = FsSessionLedger::new(dir.path()).unwrap();
        let rec = ledger.append(&sid, clean_success("b")).await.unwrap();
        assert_eq!(rec.seq, 2);
        crate::records::verify_chain(&ledger.list(&sid).await.unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsSessionLedger::new(dir.path()).unwrap();
        for bad in ["..", "a/b", ""] {
            let err = ledger
                .append(&SessionId::from(bad), clean_success("x"))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvariantViolation { .. }));
        }
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsSessionLedger::new(dir.path()).unwrap();
        let sid = SessionId::from("s1");
        ledger.append(&sid, clean_success("a")).await.unwrap();

        let path = ledger.ledger_path(&sid).unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.insert_str(0, "{not json}\n");
        std::fs::write(&path, text).unwrap();

        let err = ledger.list(&sid).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { line: 1, .. }));
    }
}
