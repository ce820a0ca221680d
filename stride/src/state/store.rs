//! State store contract and the reference stores.
//!
//! Saves must be atomic: a crash mid-write leaves either the prior state
//! or the new one, never a torn file. The file store gets this from the
//! classic write-to-temp-then-rename dance; the memory store is trivially
//! atomic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

use super::AgentState;

/// Durable persistence for [`AgentState`], keyed by agent id.
///
/// The runtime assumes exclusive access per agent id within a process;
/// no cross-process locking is provided.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state for an agent id, or `None` when absent.
    async fn load(&self, agent_id: &str) -> Result<Option<AgentState>>;

    /// Persist a state atomically.
    async fn save(&self, state: &AgentState) -> Result<()>;

    /// Remove the state for an agent id. Removing an absent state is not
    /// an error.
    async fn delete(&self, agent_id: &str) -> Result<()>;
}

/// In-memory store backed by `tokio::sync::RwLock<HashMap>`. Data is lost
/// when the value is dropped; best for tests and single-run agents.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, AgentState>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentState>> {
        Ok(self.states.read().await.get(agent_id).cloned())
    }

    async fn save(&self, state: &AgentState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(state.agent_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<()> {
        self.states.write().await.remove(agent_id);
        Ok(())
    }
}

/// One-JSON-file-per-agent store under a root directory.
///
/// File names are sanitized agent ids; writes go to a sibling temp file
/// first and are moved into place with a rename, which is atomic on the
/// same filesystem.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `root`. The directory is created on the
    /// first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The path holding one agent's state.
    #[must_use]
    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(agent_id)))
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map_or_else(|| "state.json".into(), |n| n.to_os_string());
        name.push(".tmp");
        path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentState>> {
        let path = self.path_for(agent_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(Error::persist(format!(
                    "failed to read {}: {error}",
                    path.display()
                )));
            }
        };
        let state: AgentState = serde_json::from_slice(&bytes).map_err(|error| {
            Error::persist(format!("corrupt state file {}: {error}", path.display()))
        })?;
        if !state.is_consistent() {
            return Err(Error::persist(format!(
                "state file {} has non-contiguous turn indices",
                path.display()
            )));
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &AgentState) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|error| {
            Error::persist(format!(
                "failed to create {}: {error}",
                self.root.display()
            ))
        })?;

        let path = self.path_for(&state.agent_id);
        let temp = Self::temp_path(&path);
        let json = serde_json::to_vec_pretty(state)
            .map_err(|error| Error::persist(format!("failed to serialize state: {error}")))?;

        tokio::fs::write(&temp, &json).await.map_err(|error| {
            Error::persist(format!("failed to write {}: {error}", temp.display()))
        })?;
        tokio::fs::rename(&temp, &path).await.map_err(|error| {
            Error::persist(format!(
                "failed to move {} into place: {error}",
                temp.display()
            ))
        })?;
        debug!(agent_id = %state.agent_id, turns = state.turns.len(), "state persisted");
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<()> {
        let path = self.path_for(agent_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::persist(format!(
                "failed to delete {}: {error}",
                path.display()
            ))),
        }
    }
}

/// Keep file names portable: alphanumerics, dot, dash and underscore pass
/// through; everything else becomes an underscore.
fn sanitize(agent_id: &str) -> String {
    let cleaned: String = agent_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "agent".to_owned()
    } else {
        cleaned
    }
}
