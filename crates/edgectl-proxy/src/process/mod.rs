//! Proxy process lifecycle

mod backend;
mod caddy;
mod controller;
#[cfg(any(test, feature = "test-utils"))]
mod fake;
mod identity;

pub use backend::{ProcessHandle, ProxyBackend};
pub use caddy::{CaddyBackend, CaddySettings, HealthCheck};
pub use controller::{ControllerSettings, ProcessController, ProxyStatus, StatusReport};
#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeBackend;
pub use identity::{ProcessIdentity, ProcessState};
