//! Attendance relay - forwards punches from a ZK time clock to an HTTP endpoint.

mod app;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use relay_config_and_utils::{init_logging, Config, CoreResult, Paths, DEFAULT_LOG_LEVEL};
use tracing::{error, info};

/// Attendance relay command-line interface.
#[derive(Parser, Debug)]
#[command(name = "attendance-relay")]
#[command(about = "Relay attendance punches from a ZK time clock to an HTTP endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.attendance-relay
    #[arg(long, env = "ATTENDANCE_RELAY_HOME", global = true)]
    base_dir: Option<PathBuf>,

    /// Config file to use instead of <base-dir>/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the sync loop until interrupted
    Run,
    /// Run a single sync cycle and print its report
    Once,
    /// Show pending and delivered record counts
    Status,
}

/// Per-run overrides, applied after the config file and environment.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Device IP address or hostname
    #[arg(long, global = true)]
    device_host: Option<String>,

    /// Device TCP port
    #[arg(long, global = true)]
    device_port: Option<u16>,

    /// Device comm password
    #[arg(long, global = true)]
    device_password: Option<u32>,

    /// Collection endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Seconds to sleep between sync cycles
    #[arg(long, global = true)]
    poll_interval_secs: Option<u64>,

    /// Path of the SQLite outbox
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.device_host {
            config.device.host = host.clone();
        }
        if let Some(port) = self.device_port {
            config.device.port = port;
        }
        if let Some(password) = self.device_password {
            config.device.password = password;
        }
        if let Some(endpoint) = &self.endpoint {
            config.sink.endpoint_url = endpoint.clone();
        }
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval_secs = secs;
        }
        if let Some(path) = &self.database {
            config.database_path = Some(path.clone());
        }
    }
}

/// Config file (or defaults), then environment, then command line.
fn load_config(cli: &Cli, paths: &Paths) -> CoreResult<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from_file(path)?;
            config.apply_env_overrides(|name| std::env::var(name).ok())?;
            config
        }
        None => Config::load(paths)?,
    };
    cli.overrides.apply(&mut config);
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let loaded = load_config(&cli, &paths);
    let level = match &loaded {
        Ok(config) => config.log_level.clone(),
        Err(_) => cli
            .log_level
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
    };
    init_logging(&level, Some(paths.log_file()));

    let command = cli.command.unwrap_or(Commands::Run);
    let config = match loaded.and_then(|config| {
        if command != Commands::Status {
            config.validate()?;
        }
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, error_class = "configuration_error", "Invalid configuration");
            return Err(e).context("invalid configuration");
        }
    };

    info!(
        command = ?command,
        base_dir = %paths.base_dir().display(),
        device = %format!("{}:{}", config.device.host, config.device.port),
        endpoint = %config.sink.endpoint_url,
        "Attendance relay starting"
    );

    let result = match command {
        Commands::Run => app::run(config, paths).await,
        Commands::Once => app::once(config, paths).await,
        Commands::Status => app::status(config, paths).await,
    };
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Attendance relay exiting with error");
    }
    result
}
