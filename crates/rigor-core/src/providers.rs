//! Collaborator inputs: dataset snapshots, bounds tables and session
//! output directories.
//!
//! The pipeline only sees these traits. Upload handling, sample management
//! and whatever computes the column summaries live behind them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use rigor_ledger::SessionId;

use crate::guardrails::{BoundsConfig, DatasetSnapshot};

/// Supplies the dataset summary a submission is validated against.
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn snapshot(&self, session_id: &SessionId) -> anyhow::Result<DatasetSnapshot>;
}

/// Supplies the expected parameter ranges for a session.
#[async_trait]
pub trait BoundsProvider: Send + Sync {
    async fn bounds(&self, session_id: &SessionId) -> anyhow::Result<BoundsConfig>;
}

/// Allocates the directory a session's code may write into.
pub trait WorkdirAllocator: Send + Sync {
    /// Create (if needed) and return the output directory for a session.
    fn allocate(&self, session_id: &SessionId) -> anyhow::Result<PathBuf>;
}

/// In-memory inputs with optional per-session overrides.
///
/// Sessions without an override get the defaults. An empty snapshot and an
/// empty bounds table produce no findings.
#[derive(Debug, Default)]
pub struct StaticInputs {
    default_snapshot: DatasetSnapshot,
    default_bounds: BoundsConfig,
    snapshots: Mutex<HashMap<SessionId, DatasetSnapshot>>,
    bounds: Mutex<HashMap<SessionId, BoundsConfig>>,
}

impl StaticInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_bounds(mut self, bounds: BoundsConfig) -> Self {
        self.default_bounds = bounds;
        self
    }

    pub fn with_default_snapshot(mut self, snapshot: DatasetSnapshot) -> Self {
        self.default_snapshot = snapshot;
        self
    }

    pub fn set_snapshot(&self, session_id: &SessionId, snapshot: DatasetSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.clone(), snapshot);
    }

    /// Per-session bounds are layered over the defaults.
    pub fn set_bounds(&self, session_id: &SessionId, bounds: BoundsConfig) {
        let mut merged = self.default_bounds.clone();
        merged.update(&bounds);
        self.bounds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.clone(), merged);
    }
}

#[async_trait]
impl DatasetProvider for StaticInputs {
    async fn snapshot(&self, session_id: &SessionId) -> anyhow::Result<DatasetSnapshot> {
        let map = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| self.default_snapshot.clone()))
    }
}

#[async_trait]
impl BoundsProvider for StaticInputs {
    async fn bounds(&self, session_id: &SessionId) -> anyhow::Result<BoundsConfig> {
        let map = self.bounds.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| self.default_bounds.clone()))
    }
}

/// `<root>/sessions/<id>/output`, next to the session's ledger file.
#[derive(Debug, Clone)]
pub struct FsWorkdirAllocator {
    root: PathBuf,
}

impl FsWorkdirAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root
            .join("sessions")
            .join(session_id.as_str())
            .join("output")
    }
}

impl WorkdirAllocator for FsWorkdirAllocator {
    fn allocate(&self, session_id: &SessionId) -> anyhow::Result<PathBuf> {
        let id = session_id.as_str();
        if id.is_empty()
            || id == "."
            || id == ".."
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            anyhow::bail!("session id {id:?} cannot be used as a directory name");
        }
        let dir = self.output_dir(session_id);
        std::fs::create_dir_all(&dir)?;
        // Absolute so the sandbox child and the curator see the same path.
        Ok(std::fs::canonicalize(&dir)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_inputs_overrides_and_defaults() {
        let inputs = StaticInputs::new()
            .with_default_bounds(BoundsConfig::new().with("temperature", 0.0, 1000.0));
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        inputs.set_snapshot(&a, DatasetSnapshot::new().with_measurement("temperature", 1.0));
        inputs.set_bounds(&a, BoundsConfig::new().with("pressure", 0.0, 5.0));

        assert_eq!(inputs.snapshot(&a).await.unwrap().measurements.len(), 1);
        assert!(inputs.snapshot(&b).await.unwrap().measurements.is_empty());

        let bounds_a = inputs.bounds(&a).await.unwrap();
        assert!(bounds_a.get("temperature").is_some());
        assert!(bounds_a.get("pressure").is_some());
        assert_eq!(inputs.bounds(&b).await.unwrap().len(), 1);
    }

    #[test]
    fn test_fs_allocator_layout() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = FsWorkdirAllocator::new(dir.path());
        let out = alloc.allocate(&SessionId::from("s1")).unwrap();
        assert!(out.is_dir());
        assert!(out.ends_with("sessions/s1/output"));
        assert!(out.is_absolute());
    }

    #[test]
    fn test_fs_allocator_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = FsWorkdirAllocator::new(dir.path());
        assert!(alloc.allocate(&SessionId::from("../escape")).is_err());
        assert!(alloc.allocate(&SessionId::from("..")).is_err());
    }
}
