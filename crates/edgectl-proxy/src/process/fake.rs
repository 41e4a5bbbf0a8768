//! Scriptable in-process backend for tests
//!
//! "Processes" are entries in a table; the loaded configuration of each is
//! the file contents at spawn or last successful reload.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::backend::{ProcessHandle, ProxyBackend};
use crate::errors::ProcessError;

const FIRST_PID: u32 = 40_000;

struct FakeState {
    next_pid: u32,
    running: BTreeMap<u32, String>,
    rejected_markers: Vec<String>,
    healthy: bool,
    exit_on_spawn: bool,
    reload_failures: usize,
    spawns: usize,
    reloads: usize,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: FIRST_PID,
                running: BTreeMap::new(),
                rejected_markers: Vec::new(),
                healthy: true,
                exit_on_spawn: false,
                reload_failures: 0,
                spawns: 0,
                reloads: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validation fails for any configuration containing `marker`
    pub fn reject_configs_containing(&self, marker: impl Into<String>) {
        self.state().rejected_markers.push(marker.into());
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state().healthy = healthy;
    }

    /// Spawned processes die before their first health check
    pub fn set_exit_on_spawn(&self, exit: bool) {
        self.state().exit_on_spawn = exit;
    }

    /// The next reload signal fails without touching the process
    pub fn fail_next_reload(&self) {
        self.state().reload_failures += 1;
    }

    /// Simulate the process dying out from under the controller
    pub fn kill(&self, pid: u32) -> bool {
        self.state().running.remove(&pid).is_some()
    }

    pub fn loaded_config(&self, pid: u32) -> Option<String> {
        self.state().running.get(&pid).cloned()
    }

    pub fn running_pids(&self) -> Vec<u32> {
        self.state().running.keys().copied().collect()
    }

    pub fn spawn_count(&self) -> usize {
        self.state().spawns
    }

    pub fn reload_count(&self) -> usize {
        self.state().reloads
    }

    fn read(path: &Path) -> Result<String, ProcessError> {
        std::fs::read_to_string(path)
            .map_err(|e| ProcessError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    fn check(&self, contents: &str) -> Result<(), ProcessError> {
        match self
            .state()
            .rejected_markers
            .iter()
            .find(|m| contents.contains(m.as_str()))
        {
            Some(marker) => Err(ProcessError::InvalidConfig(format!(
                "rejected directive '{}'",
                marker
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProxyBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn validate(&self, config_path: &Path) -> Result<(), ProcessError> {
        self.check(&Self::read(config_path)?)
    }

    async fn spawn(&self, config_path: &Path) -> Result<ProcessHandle, ProcessError> {
        let contents = Self::read(config_path)?;
        let mut state = self.state();
        state.spawns += 1;
        let pid = state.next_pid;
        state.next_pid += 1;
        if !state.exit_on_spawn {
            state.running.insert(pid, contents);
        }
        Ok(ProcessHandle { pid })
    }

    async fn reload(&self, pid: u32, config_path: &Path) -> Result<(), ProcessError> {
        let contents = Self::read(config_path)?;
        self.check(&contents)?;
        let mut state = self.state();
        state.reloads += 1;
        if state.reload_failures > 0 {
            state.reload_failures -= 1;
            return Err(ProcessError::Signal(format!("injected reload failure for pid {}", pid)));
        }
        match state.running.get_mut(&pid) {
            Some(loaded) => {
                *loaded = contents;
                Ok(())
            }
            None => Err(ProcessError::NotRunning),
        }
    }

    async fn terminate(&self, pid: u32, _grace: Duration) -> Result<(), ProcessError> {
        self.state().running.remove(&pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state().running.contains_key(&pid)
    }

    async fn check_health(&self) -> bool {
        let state = self.state();
        state.healthy && !state.running.is_empty()
    }
}
