//! edgectl - expose a local service under a public subdomain
//!
//! Each command wires the library crates together from the loaded
//! configuration: DNS provider, proxy renderer and controller, deployment
//! store and the reconciliation engine.

mod commands;
mod context;

use clap::{Parser, Subcommand};
use commands::{
    DeleteCommand, DeployCommand, DoctorCommand, InitCommand, ListCommand, ProxyCommand,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/edgectl/config.yaml)
    #[arg(long, env = "EDGECTL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "EDGECTL_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "EDGECTL_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expose a local service under a subdomain
    Deploy(DeployCommand),
    /// List deployments
    List(ListCommand),
    /// Remove a deployment and its DNS record
    Delete(DeleteCommand),
    /// Manage the reverse proxy process
    Proxy(ProxyCommand),
    /// Write a configuration file
    Init(InitCommand),
    /// Check configuration, credentials and the proxy installation
    Doctor(DoctorCommand),
}

fn init_tracing(log_level: &str, log_format: &str) -> anyhow::Result<()> {
    // RUST_LOG takes full control when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()?
    } else {
        tracing_subscriber::EnvFilter::try_new(format!(
            "edgectl={level},\
             edgectl_config={level},\
             edgectl_core={level},\
             edgectl_deployments={level},\
             edgectl_dns={level},\
             edgectl_proxy={level},\
             h2=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn",
            level = log_level
        ))?
    };

    let fmt_layer = match log_format {
        "full" => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, &cli.log_format)?;

    let config = cli.config;
    match cli.command {
        Commands::Deploy(cmd) => cmd.execute(config),
        Commands::List(cmd) => cmd.execute(config),
        Commands::Delete(cmd) => cmd.execute(config),
        Commands::Proxy(cmd) => cmd.execute(config),
        Commands::Init(cmd) => cmd.execute(config),
        Commands::Doctor(cmd) => cmd.execute(config),
    }
}
