//! Reverse proxy management
//!
//! Renders the managed Caddyfile (one global block plus one marked block per
//! subdomain) and drives the single proxy process through start, reload,
//! stop and status.

pub mod document;
pub mod errors;
pub mod process;
pub mod renderer;
pub mod template;

pub use document::ProxyDocument;
pub use errors::{ProcessError, RenderError};
pub use process::{
    CaddyBackend, CaddySettings, ControllerSettings, HealthCheck, ProcessController,
    ProcessHandle, ProcessIdentity, ProcessState, ProxyBackend, ProxyStatus, StatusReport,
};
#[cfg(any(test, feature = "test-utils"))]
pub use process::FakeBackend;
pub use renderer::{ConfigRenderer, GlobalSettings, SiteConfig, TlsCredentialsRef};
