//! Configuration for the edgectl CLI

pub mod errors;
pub mod settings;

pub use errors::ConfigError;
pub use settings::{default_config_file, Config, DnsSettings, Layout, ProxySettings};
