use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use svcreg_core::{AppConfig, LogFormat, LoggingConfig, MetricsConfig};
use svcreg_registry::RegistryClient;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// svcreg - announce and look up service addresses in ZooKeeper
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Comma-separated ZooKeeper servers [default: localhost:2181]
    #[arg(long = "zk", env = "SVCREG_ZK", global = true)]
    zk: Option<String>,

    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides RUST_LOG and the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Expose Prometheus metrics on this address
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Announce SERVER for (SERVICE, PROTOCOL) and hold the announcement until interrupted
    Register {
        service: String,
        protocol: String,
        server: String,
    },

    /// Print the addresses announced for (SERVICE, PROTOCOL), one per line
    Get { service: String, protocol: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging, cli.log_level.as_deref());

    if let Err(e) = init_metrics(&config.metrics) {
        error!(error = %e, "Failed to start metrics exporter");
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config file and `SVCREG__*` environment first, then command-line flags
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::from_config_builder(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(servers) = &cli.zk {
        config.registry.servers = servers.clone();
    }
    if let Some(addr) = cli.metrics_addr {
        config.metrics.enabled = true;
        config.metrics.bind_addr = Some(addr);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) {
    let filter = match level_override {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn init_metrics(metrics: &MetricsConfig) -> Result<()> {
    if !metrics.enabled {
        return Ok(());
    }

    let Some(addr) = metrics.bind_addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to bind metrics exporter on {}", addr))?;

    info!(addr = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

async fn run(command: Command, config: AppConfig) -> Result<ExitCode> {
    let servers = config.registry.servers.clone();

    let registry = tokio::select! {
        result = RegistryClient::open(config.registry) => {
            result.with_context(|| format!("Registry connection to {} failed", servers))?
        }
        signal = shutdown_signal() => {
            info!(signal, "Interrupted while connecting");
            return Ok(ExitCode::FAILURE);
        }
    };

    let outcome = tokio::select! {
        result = execute(&registry, command) => result.map(|()| ExitCode::SUCCESS),
        signal = shutdown_signal() => {
            info!(signal, "Received signal, closing registry client");
            Ok(ExitCode::FAILURE)
        }
    };

    if let Err(e) = registry.close().await {
        warn!(error = %e, "Registry client did not close cleanly");
    }

    outcome
}

async fn execute(registry: &RegistryClient, command: Command) -> Result<()> {
    match command {
        Command::Register {
            service,
            protocol,
            server,
        } => {
            registry
                .register(&service, &protocol, &server)
                .await
                .context("Registration failed")?;
            eprintln!("Registered {} for {}/{}", server, service, protocol);

            // The announcement lives as long as the session
            std::future::pending::<()>().await;
            Ok(())
        }
        Command::Get { service, protocol } => {
            let servers = registry
                .get(&service, &protocol)
                .await
                .context("Lookup failed")?;
            for server in servers {
                println!("{}", server);
            }
            Ok(())
        }
    }
}

/// Resolves with the name of the first termination signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
