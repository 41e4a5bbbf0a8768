//! Deployments: the subdomain -> local target mappings edgectl manages,
//! their persisted state, and the engine that reconciles DNS, proxy
//! configuration and the proxy process with them.

pub mod errors;
pub mod model;
pub mod services;

pub use errors::{
    PublicIpError, ReconcileError, Resource, ResourceError, ResourceReport, ResourceState,
    StateError, TeardownError, ValidationError,
};
pub use model::{Deployment, DeploymentState, Subdomain, Target};
pub use services::{
    DeployRequest, DeploymentStore, EngineSettings, HttpIpResolver, ListEntry, PublicIpResolver,
    ReconciliationEngine, StaticIp, DEFAULT_IP_SERVICES,
};
