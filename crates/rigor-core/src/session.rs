//! Session lifecycle and the per-session lock registry.
//!
//! A session's metadata lives in `sessions/<id>/session.json` beside its
//! ledger when the registry is persistent, so it survives a restart. The
//! async mutex handed out by [`SessionRegistry::lock`] serializes the gate,
//! the executor and the ledger append for one session.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use rigor_ledger::{KeyedLocks, SessionId};

pub const SESSION_FILE: &str = "session.json";
pub const ORPHANED_DIR: &str = "orphaned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Closed,
}

/// One analysis conversation and the directory its code writes into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, output_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity_at: now,
            output_dir,
            state: SessionState::Active,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_activity_at
    }

    fn close(&mut self, at: DateTime<Utc>) {
        self.state = SessionState::Closed;
        self.closed_at = Some(at);
    }
}

/// Known sessions plus one async lock per session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// `<data root>/sessions` when persistent.
    sessions_root: Option<PathBuf>,
    sessions: Mutex<BTreeMap<SessionId, Session>>,
    locks: KeyedLocks<SessionId, ()>,
}

impl SessionRegistry {
    /// Registry that forgets everything on drop.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Registry backed by `<root>/sessions/*/session.json`, loading what is
    /// already there. Unreadable metadata files are skipped with a warning.
    pub fn load(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let sessions_root = root.as_ref().join("sessions");
        std::fs::create_dir_all(&sessions_root)?;

        let mut sessions = BTreeMap::new();
        for entry in std::fs::read_dir(&sessions_root)? {
            let path = entry?.path().join(SESSION_FILE);
            if !path.is_file() {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<Session>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping session metadata"),
            }
        }

        Ok(Self {
            sessions_root: Some(sessions_root),
            sessions: Mutex::new(sessions),
            locks: KeyedLocks::new(),
        })
    }

    /// Where ledger-failure fallbacks for a session go, when persistent.
    pub fn orphan_dir(&self, id: &SessionId) -> Option<PathBuf> {
        self.sessions_root
            .as_ref()
            .map(|root| root.join(id.as_str()).join(ORPHANED_DIR))
    }

    pub fn lock(&self, id: &SessionId) -> Arc<AsyncMutex<()>> {
        self.locks.slot(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.map().get(id).cloned()
    }

    /// All sessions, ordered by id.
    pub fn list(&self) -> Vec<Session> {
        self.map().values().cloned().collect()
    }

    /// Register a new session. Returns `false` if the id is taken.
    pub fn insert(&self, session: Session) -> std::io::Result<bool> {
        let mut map = self.map();
        if map.contains_key(&session.id) {
            return Ok(false);
        }
        self.persist(&session)?;
        map.insert(session.id.clone(), session);
        Ok(true)
    }

    /// Bump `last_activity_at`.
    pub fn touch(&self, id: &SessionId) -> std::io::Result<Option<Session>> {
        self.update(id, |s| s.last_activity_at = Utc::now())
    }

    /// Mark a session closed. Closing twice keeps the first `closed_at`.
    pub fn close(&self, id: &SessionId) -> std::io::Result<Option<Session>> {
        self.update(id, |s| {
            if s.is_active() {
                s.close(Utc::now());
            }
        })
    }

    fn update(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session),
    ) -> std::io::Result<Option<Session>> {
        let mut map = self.map();
        let Some(current) = map.get(id) else {
            return Ok(None);
        };
        let mut next = current.clone();
        f(&mut next);
        self.persist(&next)?;
        map.insert(id.clone(), next.clone());
        Ok(Some(next))
    }

    fn persist(&self, session: &Session) -> std::io::Result<()> {
        let Some(root) = &self.sessions_root else {
            return Ok(());
        };
        let dir = root.join(session.id.as_str());
        std::fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(session)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(SESSION_FILE)).map_err(|e| e.error)?;
        Ok(())
    }

    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
