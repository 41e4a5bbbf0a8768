//! Persisted identity of the managed proxy process

use chrono::{DateTime, Utc};
use edgectl_core::JsonFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::ProcessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Starting,
    Running,
    Reloading,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Reloading => write!(f, "reloading"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// edgectl invocation that claimed the slot
    pub owner_pid: u32,
    /// Proxy process, once spawned
    pub pid: Option<u32>,
    pub config_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub state: ProcessState,
}

impl ProcessIdentity {
    pub(crate) fn claim(config_path: &Path) -> Self {
        Self {
            owner_pid: std::process::id(),
            pid: None,
            config_path: config_path.to_path_buf(),
            started_at: Utc::now(),
            state: ProcessState::Starting,
        }
    }

    /// Pid to report for this slot
    pub fn holder(&self) -> u32 {
        self.pid.unwrap_or(self.owner_pid)
    }
}

pub(crate) struct IdentityStore {
    file: JsonFile<ProcessIdentity>,
}

impl IdentityStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    pub(crate) fn load(&self) -> Result<Option<ProcessIdentity>, ProcessError> {
        Ok(self.file.load()?)
    }

    /// Create the record only if no other invocation holds one.
    pub(crate) fn claim(&self, identity: &ProcessIdentity) -> Result<bool, ProcessError> {
        Ok(self.file.create_new(identity)?)
    }

    pub(crate) fn save(&self, identity: &ProcessIdentity) -> Result<(), ProcessError> {
        Ok(self.file.store(identity)?)
    }

    pub(crate) fn clear(&self) -> Result<bool, ProcessError> {
        Ok(self.file.remove()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path().join("process.json"));
        let identity = ProcessIdentity::claim(Path::new("/etc/Caddyfile"));

        assert!(store.claim(&identity).unwrap());
        assert!(!store.claim(&identity).unwrap());
        assert_eq!(store.load().unwrap(), Some(identity));

        assert!(store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_holder_prefers_proxy_pid() {
        let mut identity = ProcessIdentity::claim(Path::new("/etc/Caddyfile"));
        assert_eq!(identity.holder(), std::process::id());
        identity.pid = Some(4242);
        assert_eq!(identity.holder(), 4242);
    }

    #[test]
    fn test_serialized_shape() {
        let mut identity = ProcessIdentity::claim(Path::new("/etc/Caddyfile"));
        identity.pid = Some(7);
        identity.state = ProcessState::Running;
        let value = serde_json::to_value(&identity).unwrap();
        assert_eq!(value["pid"], 7);
        assert_eq!(value["state"], "running");
        assert_eq!(value["config_path"], "/etc/Caddyfile");
    }
}
