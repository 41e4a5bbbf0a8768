//! Persistent deployment state
//!
//! One JSON document keyed by subdomain. Every mutation takes the store
//! lock, reloads the document, applies the change and atomically replaces
//! the file, so readers only ever see complete versions.

use edgectl_core::{FileLock, JsonFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::StateError;
use crate::model::{Deployment, Subdomain};

const STORE_VERSION: u32 = 1;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    deployments: BTreeMap<String, Deployment>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            deployments: BTreeMap::new(),
        }
    }
}

pub struct DeploymentStore {
    file: JsonFile<StoreDocument>,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl DeploymentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            file: JsonFile::new(path),
            lock_path: PathBuf::from(lock_path),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn get(&self, subdomain: &Subdomain) -> Result<Option<Deployment>, StateError> {
        Ok(self.load()?.deployments.remove(subdomain.as_str()))
    }

    /// Every deployment, ordered by subdomain
    pub fn list(&self) -> Result<Vec<Deployment>, StateError> {
        Ok(self.load()?.deployments.into_values().collect())
    }

    pub fn put(&self, deployment: &Deployment) -> Result<(), StateError> {
        self.mutate(|doc| {
            doc.deployments
                .insert(deployment.subdomain.to_string(), deployment.clone());
        })?;
        debug!(
            "Stored deployment {} ({})",
            deployment.subdomain, deployment.state
        );
        Ok(())
    }

    /// Returns `false` if there was nothing to remove
    pub fn remove(&self, subdomain: &Subdomain) -> Result<bool, StateError> {
        let removed = self.mutate(|doc| doc.deployments.remove(subdomain.as_str()).is_some())?;
        if removed {
            debug!("Removed deployment {} from state", subdomain);
        }
        Ok(removed)
    }

    fn load(&self) -> Result<StoreDocument, StateError> {
        let doc = self.file.load()?.unwrap_or_default();
        if doc.version != STORE_VERSION {
            return Err(StateError::CorruptStore {
                path: self.path().to_path_buf(),
                reason: format!("unsupported store version {}", doc.version),
            });
        }
        Ok(doc)
    }

    fn mutate<R>(&self, change: impl FnOnce(&mut StoreDocument) -> R) -> Result<R, StateError> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut doc = self.load()?;
        let result = change(&mut doc);
        self.file.store(&doc)?;
        Ok(result)
    }
}
