//! The device source abstraction and its ZK implementation.

use crate::client::ZkClient;
use crate::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A raw punch as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub subject_id: String,
    pub timestamp: NaiveDateTime,
}

/// Something that yields attendance events.
///
/// Implementations may return the same event on consecutive fetches.
#[async_trait]
pub trait DeviceSource: Send {
    /// Establish a session. Calling it while connected is a no-op.
    async fn connect(&mut self) -> DeviceResult<()>;

    /// All events the device currently holds.
    async fn fetch_new_events(&mut self) -> DeviceResult<Vec<DeviceEvent>>;

    /// Release the session. Never fails.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Connection settings for a ZK terminal.
#[derive(Debug, Clone)]
pub struct ZkSettings {
    pub host: String,
    pub port: u16,
    /// Comm password; 0 when the device has none.
    pub password: u32,
    /// Bound on the TCP connect and on every read or write.
    pub io_timeout: Duration,
}

/// [`DeviceSource`] backed by a ZK terminal on the network.
pub struct ZkDeviceSource {
    settings: ZkSettings,
    client: Option<ZkClient>,
}

impl ZkDeviceSource {
    pub fn new(settings: ZkSettings) -> Self {
        Self {
            settings,
            client: None,
        }
    }

    pub fn settings(&self) -> &ZkSettings {
        &self.settings
    }
}

#[async_trait]
impl DeviceSource for ZkDeviceSource {
    async fn connect(&mut self) -> DeviceResult<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let client = ZkClient::connect(
            &self.settings.host,
            self.settings.port,
            self.settings.password,
            self.settings.io_timeout,
        )
        .await?;
        info!(host = %self.settings.host, port = self.settings.port, "Connected to device");
        self.client = Some(client);
        Ok(())
    }

    async fn fetch_new_events(&mut self) -> DeviceResult<Vec<DeviceEvent>> {
        let client = self.client.as_mut().ok_or(DeviceError::NotConnected)?;
        client.read_attendance().await
    }

    async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let peer = client.peer().to_string();
        match client.exit().await {
            Ok(()) => debug!(peer = %peer, "Device disconnected"),
            Err(e) => warn!(peer = %peer, error = %e, "Device disconnect was not clean"),
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}
