//! The drain-then-ingest sync loop.

use crate::{CycleReport, SyncError, SyncResult, SyncState};
use attendance_database::{AttendanceStore, NewAttendanceRecord};
use attendance_sink::{RemoteSink, SendOutcome};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zk_device_source::DeviceSource;

/// Sync loop settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sleep between cycles.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Owns the store, the device session and the sink, and moves records
/// between them one cycle at a time.
///
/// Each cycle first drains pending records to the sink, then ingests what
/// the device holds. Records are only marked delivered after the sink
/// accepted them, so a crash anywhere leaves at worst a duplicate send.
pub struct SyncOrchestrator<D, S> {
    store: AttendanceStore,
    device: D,
    sink: S,
    config: SyncConfig,
    state: SyncState,
    cycle: u64,
}

impl<D, S> SyncOrchestrator<D, S>
where
    D: DeviceSource,
    S: RemoteSink,
{
    pub fn new(store: AttendanceStore, device: D, sink: S, config: SyncConfig) -> Self {
        Self {
            store,
            device,
            sink,
            config,
            state: SyncState::Idle,
            cycle: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn store(&self) -> &AttendanceStore {
        &self.store
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run one full cycle and return to `Idle`.
    ///
    /// Device and sink failures are absorbed into the report. A store
    /// failure ends the cycle early and is recorded in the report too.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport::new(self.cycle);

        self.state = SyncState::Draining;
        let mut result = self.drain(&mut report).await;

        if result.is_ok() {
            self.state = SyncState::Ingesting;
            result = self.ingest(&mut report).await;
        }

        if let Err(e) = result {
            error!(
                cycle = self.cycle,
                state = %self.state,
                error_class = %e.class(),
                error = %e,
                "Cycle aborted"
            );
            report.storage_failure = Some(e.to_string());
        }

        self.state = SyncState::Idle;
        report
    }

    /// Send pending records in timestamp order.
    ///
    /// Only store failures are returned; sink failures stop the drain.
    async fn drain(&mut self, report: &mut CycleReport) -> SyncResult<()> {
        let pending = self
            .store
            .list_pending()
            .await
            .map_err(SyncError::storage("list_pending"))?;
        report.pending = pending.len();

        for record in &pending {
            match self.sink.send(record).await {
                Ok(SendOutcome::Accepted) => {
                    self.store
                        .mark_delivered(&record.natural_key())
                        .await
                        .map_err(SyncError::storage("mark_delivered"))?;
                    report.delivered += 1;
                    debug!(
                        record_id = record.record_id,
                        subject_id = %record.subject_id,
                        timestamp = %record.timestamp,
                        "Record delivered"
                    );
                }
                Ok(SendOutcome::Rejected { status, reason }) => {
                    report.rejected += 1;
                    warn!(
                        record_id = record.record_id,
                        subject_id = %record.subject_id,
                        timestamp = %record.timestamp,
                        status,
                        reason = %reason,
                        error_class = %crate::ErrorClass::Rejected,
                        "Sink rejected record, leaving it pending"
                    );
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    report.drain_aborted = true;
                    warn!(
                        subject_id = %record.subject_id,
                        timestamp = %record.timestamp,
                        error_class = %e.class(),
                        error = %e,
                        remaining = pending.len() - report.delivered - report.rejected,
                        "Sink unavailable, stopping drain for this cycle"
                    );
                    break;
                }
            }
        }

        Ok(())
    }

    /// Copy device events into the store in one transaction.
    ///
    /// Device failures tear the session down and end ingestion; only store
    /// failures are returned.
    async fn ingest(&mut self, report: &mut CycleReport) -> SyncResult<()> {
        if !self.device.is_connected() {
            if let Err(e) = self.device.connect().await {
                let e = SyncError::from(e);
                report.ingestion_skipped = true;
                report.device_error = Some(e.class());
                warn!(
                    operation = "connect",
                    error_class = %e.class(),
                    error = %e,
                    "Device connect failed, skipping ingestion"
                );
                self.device.disconnect().await;
                return Ok(());
            }
        }

        let events = match self.device.fetch_new_events().await {
            Ok(events) => events,
            Err(e) => {
                let e = SyncError::from(e);
                report.device_error = Some(e.class());
                warn!(
                    operation = "fetch_new_events",
                    error_class = %e.class(),
                    error = %e,
                    "Device fetch failed, dropping session"
                );
                self.device.disconnect().await;
                return Ok(());
            }
        };
        report.fetched = events.len();

        let records = events
            .into_iter()
            .map(|event| NewAttendanceRecord::new(event.subject_id, event.timestamp))
            .collect();
        report.ingested = self
            .store
            .insert_many(records)
            .await
            .map_err(SyncError::storage("insert_many"))?;

        Ok(())
    }

    /// Loop until `shutdown` carries `true` (or its sender is dropped), then
    /// release the device and close the store.
    ///
    /// The signal is only looked at while `Idle`, so a cycle in progress
    /// always finishes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SyncResult<()> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Sync loop started"
        );

        loop {
            let stop = *shutdown.borrow_and_update();
            if stop {
                break;
            }

            let report = self.run_cycle().await;
            report.log();

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        info!(cycles = self.cycle, "Sync loop stopping");
        self.close().await
    }

    /// Disconnect the device and close the store.
    pub async fn close(mut self) -> SyncResult<()> {
        self.device.disconnect().await;
        self.store
            .close()
            .await
            .map_err(SyncError::storage("close"))?;
        info!("Sync loop stopped");
        Ok(())
    }
}
