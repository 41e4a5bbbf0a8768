//! Proxy lifecycle state machine
//!
//! `Stopped -> Starting -> Running -> Reloading -> Running`, with `stop`
//! reachable from every state. The tracked instance lives in a persisted
//! identity record, so separate invocations agree on what is running.

use edgectl_core::{process, AtomicFile, FileError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::backend::{ProcessHandle, ProxyBackend};
use super::identity::{IdentityStore, ProcessIdentity, ProcessState};
use crate::errors::ProcessError;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Live configuration document the proxy runs from
    pub config_path: PathBuf,
    /// Persisted [`ProcessIdentity`]
    pub identity_path: PathBuf,
    pub health_timeout: Duration,
    pub health_interval: Duration,
    pub stop_grace: Duration,
}

impl ControllerSettings {
    pub fn new(config_path: impl Into<PathBuf>, identity_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            identity_path: identity_path.into(),
            health_timeout: Duration::from_secs(30),
            health_interval: Duration::from_millis(500),
            stop_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyStatus {
    Stopped,
    Running,
    /// Alive but failing its health check
    Unhealthy,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStatus::Stopped => write!(f, "STOPPED"),
            ProxyStatus::Running => write!(f, "RUNNING"),
            ProxyStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ProxyStatus,
    pub identity: Option<ProcessIdentity>,
}

pub struct ProcessController {
    backend: Arc<dyn ProxyBackend>,
    settings: ControllerSettings,
    identity: IdentityStore,
}

impl ProcessController {
    pub fn new(backend: Arc<dyn ProxyBackend>, settings: ControllerSettings) -> Self {
        let identity = IdentityStore::new(&settings.identity_path);
        Self {
            backend,
            settings,
            identity,
        }
    }

    /// Live configuration path
    pub fn config_path(&self) -> &Path {
        &self.settings.config_path
    }

    /// Validate `config_path`, make it the live document and launch the proxy,
    /// waiting for the first healthy check.
    ///
    /// On [`ProcessError::HealthCheckTimeout`] the process is left running
    /// and tracked so its logs can be inspected and `stop` still works.
    pub async fn start(&self, config_path: &Path) -> Result<ProcessHandle, ProcessError> {
        let mut identity = self.claim()?;
        match self.launch(config_path, &mut identity).await {
            Ok(handle) => Ok(handle),
            Err(e @ ProcessError::HealthCheckTimeout { .. }) => Err(e),
            Err(e) => {
                if let Err(clear_err) = self.identity.clear() {
                    warn!("Failed to release process record: {}", clear_err);
                }
                Err(e)
            }
        }
    }

    /// Stop the tracked proxy. Returns `false` if nothing was running.
    pub async fn stop(&self) -> Result<bool, ProcessError> {
        let Some(identity) = self.tracked()? else {
            debug!("No proxy running");
            return Ok(false);
        };
        let pid = Self::proxy_pid(&identity)?;

        info!("Stopping proxy (pid {})", pid);
        self.backend.terminate(pid, self.settings.stop_grace).await?;
        self.identity.clear()?;
        Ok(true)
    }

    /// Validate `candidate` and apply it.
    ///
    /// `candidate` must be a different file from the live document. Returns
    /// `false` when no proxy is running, in which case the candidate only
    /// becomes the live document. If the reload or the following health
    /// check fails, the previous document is restored and re-applied.
    pub async fn reload(&self, candidate: &Path) -> Result<bool, ProcessError> {
        self.backend.validate(candidate).await?;

        let Some(mut identity) = self.tracked()? else {
            self.promote(candidate)?;
            debug!(
                "Proxy not running; {} promoted without reload",
                self.settings.config_path.display()
            );
            return Ok(false);
        };
        let pid = Self::proxy_pid(&identity)?;

        let previous = self.promote(candidate)?;
        identity.state = ProcessState::Reloading;
        self.identity.save(&identity)?;

        let live = self.settings.config_path.clone();
        let outcome = match self.backend.reload(pid, &live).await {
            Ok(()) => self.wait_healthy(pid).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                identity.state = ProcessState::Running;
                self.identity.save(&identity)?;
                info!("Proxy (pid {}) reloaded", pid);
                Ok(true)
            }
            Err(e) => {
                warn!("Reload failed: {}; restoring previous configuration", e);
                self.restore(pid, previous).await;
                if self.backend.is_alive(pid) {
                    identity.state = ProcessState::Running;
                    self.identity.save(&identity)?;
                } else {
                    self.identity.clear()?;
                }
                Err(e)
            }
        }
    }

    pub async fn status(&self) -> Result<StatusReport, ProcessError> {
        let Some(identity) = self.tracked()? else {
            return Ok(StatusReport {
                status: ProxyStatus::Stopped,
                identity: None,
            });
        };
        let status = if identity.pid.is_some() && self.backend.check_health().await {
            ProxyStatus::Running
        } else {
            ProxyStatus::Unhealthy
        };
        Ok(StatusReport {
            status,
            identity: Some(identity),
        })
    }

    fn claim(&self) -> Result<ProcessIdentity, ProcessError> {
        let identity = ProcessIdentity::claim(&self.settings.config_path);
        if self.identity.claim(&identity)? {
            return Ok(identity);
        }
        if let Some(existing) = self.tracked()? {
            return Err(ProcessError::AlreadyRunning {
                pid: existing.holder(),
            });
        }
        // The stale record is gone now
        if self.identity.claim(&identity)? {
            return Ok(identity);
        }
        let pid = self
            .identity
            .load()?
            .map(|existing| existing.holder())
            .unwrap_or_default();
        Err(ProcessError::AlreadyRunning { pid })
    }

    async fn launch(
        &self,
        candidate: &Path,
        identity: &mut ProcessIdentity,
    ) -> Result<ProcessHandle, ProcessError> {
        self.backend.validate(candidate).await?;
        self.promote(candidate)?;

        let handle = self.backend.spawn(&self.settings.config_path).await?;
        identity.pid = Some(handle.pid);
        self.identity.save(identity)?;

        self.wait_healthy(handle.pid).await?;
        identity.state = ProcessState::Running;
        self.identity.save(identity)?;
        info!(
            "Proxy running via {} (pid {})",
            self.backend.name(),
            handle.pid
        );
        Ok(handle)
    }

    /// The tracked identity if its process is still alive. Stale or
    /// unreadable records are cleared.
    fn tracked(&self) -> Result<Option<ProcessIdentity>, ProcessError> {
        let identity = match self.identity.load() {
            Ok(Some(identity)) => identity,
            Ok(None) => return Ok(None),
            Err(ProcessError::State(FileError::Corrupt { .. })) => {
                warn!(
                    "Discarding unreadable process record {}",
                    self.identity.path().display()
                );
                self.identity.clear()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let alive = match identity.pid {
            Some(pid) => self.backend.is_alive(pid),
            None => process::is_alive(identity.owner_pid),
        };
        if alive {
            return Ok(Some(identity));
        }
        info!("Clearing stale process record (pid {})", identity.holder());
        self.identity.clear()?;
        Ok(None)
    }

    /// Another invocation has claimed the slot but not spawned yet
    fn proxy_pid(identity: &ProcessIdentity) -> Result<u32, ProcessError> {
        identity.pid.ok_or(ProcessError::AlreadyRunning {
            pid: identity.owner_pid,
        })
    }

    /// Copy `candidate` over the live document, returning what it replaced.
    fn promote(&self, candidate: &Path) -> Result<Option<Vec<u8>>, ProcessError> {
        let live = AtomicFile::new(&self.settings.config_path);
        let previous = live.read()?;
        if candidate != live.path() {
            let bytes = AtomicFile::new(candidate).read()?.ok_or_else(|| {
                ProcessError::InvalidConfig(format!("{} does not exist", candidate.display()))
            })?;
            live.write(&bytes)?;
        }
        Ok(previous)
    }

    async fn restore(&self, pid: u32, previous: Option<Vec<u8>>) {
        let Some(bytes) = previous else {
            return;
        };
        let live = AtomicFile::new(&self.settings.config_path);
        if let Err(e) = live.write(&bytes) {
            error!("Failed to restore {}: {}", live.path().display(), e);
            return;
        }
        if let Err(e) = self.backend.reload(pid, live.path()).await {
            error!("Failed to re-apply previous configuration: {}", e);
        }
    }

    async fn wait_healthy(&self, pid: u32) -> Result<(), ProcessError> {
        let started = Instant::now();
        loop {
            if self.backend.check_health().await {
                return Ok(());
            }
            if !self.backend.is_alive(pid) {
                return Err(ProcessError::Exited { pid });
            }
            let waited = started.elapsed();
            if waited >= self.settings.health_timeout {
                return Err(ProcessError::HealthCheckTimeout { pid, waited });
            }
            tokio::time::sleep(self.settings.health_interval).await;
        }
    }
}
