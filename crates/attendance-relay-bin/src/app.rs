//! Command implementations.

use anyhow::Context;
use attendance_database::AttendanceStore;
use attendance_sink::{HttpSink, HttpSinkConfig};
use attendance_sync_orchestrator::{SyncConfig, SyncOrchestrator};
use relay_config_and_utils::{Config, Paths};
use tokio::sync::watch;
use tracing::info;
use zk_device_source::{ZkDeviceSource, ZkSettings};

type Relay = SyncOrchestrator<ZkDeviceSource, HttpSink>;

async fn open_store(config: &Config, paths: &Paths) -> anyhow::Result<AttendanceStore> {
    let db_path = config.database_file(paths);
    let store = AttendanceStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open outbox at {}", db_path.display()))?;
    store.ensure_schema().await?;
    Ok(store)
}

async fn build(config: &Config, paths: &Paths) -> anyhow::Result<Relay> {
    let store = open_store(config, paths).await?;

    let device = ZkDeviceSource::new(ZkSettings {
        host: config.device.host.clone(),
        port: config.device.port,
        password: config.device.password,
        io_timeout: config.device_timeout(),
    });

    let sink = HttpSink::new(HttpSinkConfig {
        endpoint: config.endpoint_url()?,
        timeout: config.sink_timeout(),
    })?;

    Ok(SyncOrchestrator::new(
        store,
        device,
        sink,
        SyncConfig {
            poll_interval: config.poll_interval(),
        },
    ))
}

/// Run the sync loop until Ctrl-C or SIGTERM.
pub async fn run(config: Config, paths: Paths) -> anyhow::Result<()> {
    let relay = build(&config, &paths).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(relay.run(shutdown_rx));

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            signal?;
            info!("Received shutdown signal, finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
        joined = &mut handle => {
            joined.context("sync loop task failed")??;
            return Ok(());
        }
    }

    handle.await.context("sync loop task failed")??;
    info!("Attendance relay stopped");
    Ok(())
}

/// Run exactly one cycle and print the report as JSON.
pub async fn once(config: Config, paths: Paths) -> anyhow::Result<()> {
    let mut relay = build(&config, &paths).await?;
    let report = relay.run_cycle().await;
    report.log();
    relay.close().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print record counts from the outbox.
pub async fn status(config: Config, paths: Paths) -> anyhow::Result<()> {
    let store = open_store(&config, &paths).await?;
    let counts = store.delivery_counts().await?;
    let path = store.path().to_string();
    store.close().await?;

    println!("Outbox:    {path}");
    println!("Pending:   {}", counts.pending);
    println!("Delivered: {}", counts.delivered);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}
