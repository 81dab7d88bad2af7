// Session store
//
// Layout under the storage root:
//   sessions/{id}/meta.json    immutable spec + creation timestamp
//   sessions/{id}/state.json   mutable record wrapped with a monotonic version
//   sessions/{id}/report.md    final report, written once on finalize
//
// Updates are serialised per session id and written durably before the
// mutated session is returned. The store treats the research state as an
// opaque document; it never interprets stage semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{atomic_write, ensure_dir, read_json, write_json, FileResult};
use crate::models::{ResearchStage, Session, SessionMeta, SessionRecord};

/// Version of the state file format
const STATE_FILE_VERSION: u32 = 1;

/// Wrapper persisted as state.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateFile {
    /// File format version
    format: u32,
    /// Monotonic document version, bumped on every update
    version: u64,
    /// When this file was last written
    updated_at: DateTime<Utc>,
    /// The mutable session record
    record: SessionRecord,
}

/// File-backed session store
pub struct SessionStore {
    root: PathBuf,
    /// Per-session write locks; concurrent updates to one id serialise here
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Open (and create) the store under `root`
    pub fn new(root: impl Into<PathBuf>) -> FileResult<Self> {
        let root = root.into();
        ensure_dir(&root.join("sessions"))?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join("sessions").join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("meta.json")
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("state.json")
    }

    fn report_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("report.md")
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.to_string()).or_default().clone()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.meta_path(id).exists()
    }

    /// Create a new session from its immutable metadata
    pub async fn create(&self, meta: SessionMeta) -> FileResult<Session> {
        let id = meta.id.clone();
        let guard = self.lock_for(&id).await;
        let _guard = guard.lock().await;

        if self.exists(&id) {
            return Err(format!("Session '{}' already exists", id));
        }

        ensure_dir(&self.session_dir(&id))?;
        write_json(&self.meta_path(&id), &meta)?;

        let state = StateFile {
            format: STATE_FILE_VERSION,
            version: 1,
            updated_at: Utc::now(),
            record: SessionRecord::new(),
        };
        write_json(&self.state_path(&id), &state)?;

        Ok(Session {
            meta,
            record: state.record,
            version: state.version,
        })
    }

    /// Load a session; None when the id is unknown
    pub async fn load(&self, id: &str) -> FileResult<Option<Session>> {
        if !self.exists(id) {
            return Ok(None);
        }
        let meta: SessionMeta = read_json(&self.meta_path(id))?;
        let state: StateFile = read_json(&self.state_path(id))?;
        Ok(Some(Session {
            meta,
            record: state.record,
            version: state.version,
        }))
    }

    /// Atomically mutate a session record. The mutation is durable before
    /// the updated session is returned; concurrent updates serialise.
    pub async fn update<F>(&self, id: &str, mutator: F) -> FileResult<Session>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let guard = self.lock_for(id).await;
        let _guard = guard.lock().await;

        if !self.exists(id) {
            return Err(format!("Session '{}' not found", id));
        }

        let meta: SessionMeta = read_json(&self.meta_path(id))?;
        let mut state: StateFile = read_json(&self.state_path(id))?;

        mutator(&mut state.record);
        state.version += 1;
        state.updated_at = Utc::now();
        state.record.updated_at = state.updated_at;

        write_json(&self.state_path(id), &state)?;

        Ok(Session {
            meta,
            record: state.record,
            version: state.version,
        })
    }

    /// List sessions newest first, optionally filtered by stage
    pub async fn list(
        &self,
        stage: Option<ResearchStage>,
        offset: usize,
        limit: usize,
    ) -> FileResult<(Vec<Session>, usize)> {
        let sessions_dir = self.root.join("sessions");
        if !sessions_dir.exists() {
            return Ok((Vec::new(), 0));
        }

        let entries = fs::read_dir(&sessions_dir)
            .map_err(|e| format!("Failed to read sessions directory: {}", e))?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let id = entry.file_name().to_string_lossy().to_string();
            // Skip stray files; a session is a directory with meta.json
            match self.load(&id).await {
                Ok(Some(session)) => {
                    if stage.map_or(true, |s| session.record.stage == s) {
                        sessions.push(session);
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Skipping unreadable session '{}': {}", id, e);
                }
            }
        }

        sessions.sort_by(|a, b| b.meta.created_at.cmp(&a.meta.created_at));
        let total = sessions.len();
        let page = sessions.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    /// Remove a session and all of its files
    pub async fn delete(&self, id: &str) -> FileResult<bool> {
        let guard = self.lock_for(id).await;
        let _guard = guard.lock().await;

        let dir = self.session_dir(id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)
            .map_err(|e| format!("Failed to delete session '{}': {}", id, e))?;

        self.locks.lock().await.remove(id);
        Ok(true)
    }

    /// Write the final report artefact next to the session state
    pub async fn save_report(&self, id: &str, content: &str) -> FileResult<()> {
        if !self.exists(id) {
            return Err(format!("Session '{}' not found", id));
        }
        atomic_write(&self.report_path(id), content)
    }

    /// Read the final report artefact, if written
    pub fn read_report(&self, id: &str) -> FileResult<Option<String>> {
        let path = self.report_path(id);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| format!("Failed to read report for '{}': {}", id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Depth, ErrorKind, Language, ResearchStage};
    use tempfile::TempDir;

    fn meta(id: &str) -> SessionMeta {
        SessionMeta {
            id: id.to_string(),
            research_question: "What is new in RISC-V vector extensions?".to_string(),
            language: Language::En,
            depth: Depth::Deep,
            max_researchers: 3,
            max_iterations: 6,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();

        let created = store.create(meta("research-1")).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.record.stage, ResearchStage::Intake);

        let loaded = store.load("research-1").await.unwrap().unwrap();
        assert_eq!(loaded.meta.id, created.meta.id);
        assert_eq!(loaded.meta.research_question, created.meta.research_question);
        assert_eq!(loaded.meta.max_researchers, 3);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_load_unknown_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();
        store.create(meta("research-1")).await.unwrap();
        assert!(store.create(meta("research-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();
        store.create(meta("research-1")).await.unwrap();

        let updated = store
            .update("research-1", |record| {
                record.set_stage(ResearchStage::Clarify, 10);
            })
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.record.stage, ResearchStage::Clarify);

        let loaded = store.load("research-1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.record.progress, 10);
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(temp_dir.path()).unwrap());
        store.create(meta("research-1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("research-1", |record| {
                        record.state.iteration += 1;
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = store.load("research-1").await.unwrap().unwrap();
        assert_eq!(loaded.record.state.iteration, 10);
        assert_eq!(loaded.version, 11);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();

        for i in 0..3 {
            store.create(meta(&format!("research-{}", i))).await.unwrap();
        }
        store
            .update("research-1", |record| {
                record.set_error(ErrorKind::Cancelled, "cancelled");
            })
            .await
            .unwrap();

        let (all, total) = store.list(None, 0, 50).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let (errored, total) = store.list(Some(ResearchStage::Error), 0, 50).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(errored[0].meta.id, "research-1");

        let (page, total) = store.list(None, 1, 1).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();
        store.create(meta("research-1")).await.unwrap();
        store.save_report("research-1", "# Report").await.unwrap();

        assert!(store.delete("research-1").await.unwrap());
        assert!(!store.exists("research-1"));
        assert!(store.read_report("research-1").unwrap().is_none());

        // Second delete is a no-op
        assert!(!store.delete("research-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path()).unwrap();
        store.create(meta("research-1")).await.unwrap();

        store
            .save_report("research-1", "# Findings\n\ncontent")
            .await
            .unwrap();
        let report = store.read_report("research-1").unwrap().unwrap();
        assert!(report.contains("Findings"));
    }
}
