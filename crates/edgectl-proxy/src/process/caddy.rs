//! Caddy process backend

use async_trait::async_trait;
use edgectl_core::{process, Signal};
use reqwest::Client;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::backend::{ProcessHandle, ProxyBackend};
use crate::errors::ProcessError;

#[derive(Debug, Clone)]
pub struct CaddySettings {
    pub binary: PathBuf,
    /// Admin API listener; `None` when the admin endpoint is disabled
    pub admin_address: Option<String>,
    /// HTTPS listener checked when there is no admin endpoint
    pub https_address: String,
    /// Receives the process's stdout and stderr
    pub log_file: PathBuf,
    /// Extra environment for the DNS challenge module
    pub env: Vec<(String, String)>,
    pub command_timeout: Duration,
    pub check_timeout: Duration,
}

impl Default for CaddySettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("caddy"),
            admin_address: Some("localhost:2019".to_string()),
            https_address: "127.0.0.1:443".to_string(),
            log_file: PathBuf::from("caddy.log"),
            env: Vec::new(),
            command_timeout: Duration::from_secs(30),
            check_timeout: Duration::from_secs(2),
        }
    }
}

/// Bounded liveness check against a running proxy
#[derive(Debug, Clone)]
pub enum HealthCheck {
    /// GET `<admin>/config/`
    Admin { url: String, client: Client },
    /// Plain TCP connect
    Tcp { address: String, timeout: Duration },
}

impl HealthCheck {
    pub fn admin(address: &str, timeout: Duration) -> Result<Self, ProcessError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessError::Spawn(format!("Failed to create HTTP client: {}", e)))?;
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Ok(HealthCheck::Admin {
            url: format!("{}/config/", base),
            client,
        })
    }

    pub fn tcp(address: impl Into<String>, timeout: Duration) -> Self {
        HealthCheck::Tcp {
            address: address.into(),
            timeout,
        }
    }

    pub async fn check(&self) -> bool {
        match self {
            HealthCheck::Admin { url, client } => match client.get(url).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!("Admin health check {} failed: {}", url, e);
                    false
                }
            },
            HealthCheck::Tcp { address, timeout } => {
                matches!(
                    tokio::time::timeout(*timeout, TcpStream::connect(address.as_str())).await,
                    Ok(Ok(_))
                )
            }
        }
    }
}

pub struct CaddyBackend {
    settings: CaddySettings,
    health: HealthCheck,
}

impl CaddyBackend {
    pub fn new(settings: CaddySettings) -> Result<Self, ProcessError> {
        let health = match &settings.admin_address {
            Some(address) => HealthCheck::admin(address, settings.check_timeout)?,
            None => HealthCheck::tcp(settings.https_address.clone(), settings.check_timeout),
        };
        Ok(Self { settings, health })
    }

    pub fn settings(&self) -> &CaddySettings {
        &self.settings
    }

    fn command(&self, subcommand: &str, config_path: &Path) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.arg(subcommand)
            .arg("--config")
            .arg(config_path)
            .arg("--adapter")
            .arg("caddyfile")
            .envs(self.settings.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<Output, ProcessError> {
        cmd.kill_on_drop(true);
        match tokio::time::timeout(self.settings.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ProcessError::Spawn(format!(
                "{} {}: {}",
                self.settings.binary.display(),
                what,
                e
            ))),
            Err(_) => Err(ProcessError::Spawn(format!(
                "{} {} timed out after {}s",
                self.settings.binary.display(),
                what,
                self.settings.command_timeout.as_secs()
            ))),
        }
    }

    fn open_log(&self) -> Result<std::fs::File, ProcessError> {
        let path = &self.settings.log_file;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| ProcessError::Spawn(format!("{}: {}", dir.display(), e)))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProcessError::Spawn(format!("{}: {}", path.display(), e)))
    }
}

/// Last meaningful line Caddy printed, which carries the error.
fn summarize(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    stderr
        .lines()
        .chain(stdout.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| format!("exited with {}", output.status))
}

#[async_trait]
impl ProxyBackend for CaddyBackend {
    fn name(&self) -> &str {
        "caddy"
    }

    async fn validate(&self, config_path: &Path) -> Result<(), ProcessError> {
        debug!("Validating {}", config_path.display());
        let output = self
            .run(self.command("validate", config_path), "validate")
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ProcessError::InvalidConfig(summarize(&output)))
        }
    }

    async fn spawn(&self, config_path: &Path) -> Result<ProcessHandle, ProcessError> {
        let log = self.open_log()?;
        let err_log = log
            .try_clone()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;

        let mut cmd = self.command("run", config_path);
        cmd.stdout(Stdio::from(log)).stderr(Stdio::from(err_log));
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            ProcessError::Spawn(format!("{}: {}", self.settings.binary.display(), e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Spawn("process exited before reporting a pid".into()))?;

        info!(
            "Started {} (pid {}), logging to {}",
            self.settings.binary.display(),
            pid,
            self.settings.log_file.display()
        );
        Ok(ProcessHandle { pid })
    }

    async fn reload(&self, pid: u32, config_path: &Path) -> Result<(), ProcessError> {
        match &self.settings.admin_address {
            Some(address) => {
                let mut cmd = self.command("reload", config_path);
                cmd.arg("--address").arg(address);
                let output = self.run(cmd, "reload").await?;
                if !output.status.success() {
                    return Err(ProcessError::InvalidConfig(summarize(&output)));
                }
            }
            None => {
                if !process::send_signal(pid, Signal::User1) {
                    if !process::is_alive(pid) {
                        return Err(ProcessError::NotRunning);
                    }
                    return Err(ProcessError::Signal(format!(
                        "could not deliver SIGUSR1 to pid {}",
                        pid
                    )));
                }
            }
        }
        info!("Reloaded proxy (pid {}) from {}", pid, config_path.display());
        Ok(())
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> Result<(), ProcessError> {
        if !self.is_alive(pid) {
            return Ok(());
        }
        if !process::send_signal(pid, Signal::Term) {
            warn!("Could not send SIGTERM to pid {}", pid);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !process::is_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        warn!(
            "Proxy (pid {}) still running after {}s, killing",
            pid,
            grace.as_secs()
        );
        process::kill(pid);
        for _ in 0..20 {
            if !process::is_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(ProcessError::Signal(format!("pid {} survived SIGKILL", pid)))
    }

    /// Alive and still `<binary> run`; a recycled pid is not ours
    fn is_alive(&self, pid: u32) -> bool {
        match process::inspect(pid) {
            Some(info) if info.runs(&self.settings.binary, "run") => true,
            Some(info) => {
                debug!(
                    "pid {} is {:?}, not {} run",
                    pid,
                    info.cmd,
                    self.settings.binary.display()
                );
                false
            }
            None => false,
        }
    }

    async fn check_health(&self) -> bool {
        self.health.check().await
    }
}
