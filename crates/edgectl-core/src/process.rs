//! Operating system process helpers

use std::path::{Path, PathBuf};
use sysinfo::{Pid, PidExt, ProcessExt, ProcessStatus, Signal, System, SystemExt};

/// What the OS reports about a live process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Short name, truncated by some platforms
    pub name: String,
    /// Executable path; empty when the OS does not disclose it
    pub exe: PathBuf,
    pub cmd: Vec<String>,
    /// Seconds since the epoch
    pub start_time: u64,
}

impl ProcessInfo {
    /// Whether this process is `binary` invoked with `subcommand` as its
    /// first argument.
    pub fn runs(&self, binary: &Path, subcommand: &str) -> bool {
        let Some(wanted) = binary.file_name() else {
            return false;
        };
        let program = self
            .cmd
            .first()
            .map(|arg0| Path::new(arg0).file_name() == Some(wanted))
            .unwrap_or(false);
        let exe = self.exe.file_name() == Some(wanted);
        let name = self.cmd.is_empty() && self.name.as_str() == wanted.to_string_lossy();
        (program || exe || name)
            && (self.cmd.is_empty() || self.cmd.get(1).map(String::as_str) == Some(subcommand))
    }
}

/// Details of `pid`, or `None` when it is gone or a zombie.
pub fn inspect(pid: u32) -> Option<ProcessInfo> {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    if !system.refresh_process(sys_pid) {
        return None;
    }
    let process = system.process(sys_pid)?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }
    Some(ProcessInfo {
        pid,
        name: process.name().to_string(),
        exe: process.exe().to_path_buf(),
        cmd: process.cmd().to_vec(),
        start_time: process.start_time(),
    })
}

/// Whether `pid` refers to a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    inspect(pid).is_some()
}

/// Deliver `signal` to `pid`. Returns `false` if the process does not exist
/// or the signal is unsupported on this platform.
pub fn send_signal(pid: u32, signal: Signal) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    if !system.refresh_process(pid) {
        return false;
    }
    system
        .process(pid)
        .and_then(|p| p.kill_with(signal))
        .unwrap_or(false)
}

/// Forcefully kill `pid`.
pub fn kill(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    if !system.refresh_process(pid) {
        return false;
    }
    system.process(pid).map(|p| p.kill()).unwrap_or(false)
}
