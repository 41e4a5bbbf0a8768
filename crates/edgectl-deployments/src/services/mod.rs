mod engine;
mod public_ip;
mod store;

pub use engine::{DeployRequest, EngineSettings, ListEntry, ReconciliationEngine};
pub use public_ip::{HttpIpResolver, PublicIpResolver, StaticIp, DEFAULT_IP_SERVICES};
pub use store::DeploymentStore;
