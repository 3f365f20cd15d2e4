use super::fake_device::{Behavior, FakeDevice, FakeDeviceConfig, Transfer};
use crate::protocol::{
    CMD_AUTH, CMD_CONNECT, CMD_EXIT, CMD_FREE_DATA, CMD_PREPARE_BUFFER, CMD_READ_BUFFER,
};
use crate::{DeviceError, DeviceErrorKind, DeviceSource, ZkDeviceSource, ZkSettings};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use std::time::Duration;

fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn source_for(device: &FakeDevice, password: u32) -> ZkDeviceSource {
    ZkDeviceSource::new(ZkSettings {
        host: device.host(),
        port: device.port(),
        password,
        io_timeout: Duration::from_millis(500),
    })
}

fn two_records() -> Vec<(String, NaiveDateTime)> {
    vec![
        ("A123".to_string(), ts(8, 0, 0)),
        ("B456".to_string(), ts(8, 1, 30)),
    ]
}

#[tokio::test]
async fn test_fetch_direct_transfer() {
    let device = FakeDevice::start(FakeDeviceConfig {
        records: two_records(),
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);

    source.connect().await.unwrap();
    assert!(source.is_connected());

    let events = source.fetch_new_events().await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject_id, "A123");
    assert_eq!(events[0].timestamp, ts(8, 0, 0));
    assert_eq!(events[1].subject_id, "B456");
    assert_eq!(device.count(CMD_READ_BUFFER), 0);
}

#[tokio::test]
async fn test_repeated_fetch_returns_same_events() {
    let device = FakeDevice::start(FakeDeviceConfig {
        records: two_records(),
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);
    source.connect().await.unwrap();

    let first = source.fetch_new_events().await.unwrap();
    let second = source.fetch_new_events().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_fetch_chunked_transfer() {
    let base = ts(0, 0, 0);
    let records: Vec<(String, NaiveDateTime)> = (0..1700)
        .map(|i| (format!("U{i}"), base + ChronoDuration::seconds(i)))
        .collect();
    let device = FakeDevice::start(FakeDeviceConfig {
        records,
        transfer: Transfer::Chunked { frame: 4096 },
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);
    source.connect().await.unwrap();

    let events = source.fetch_new_events().await.unwrap();

    assert_eq!(events.len(), 1700);
    assert_eq!(events[1699].subject_id, "U1699");
    // 4 + 1700 * 40 bytes spans two 0xFFC0 chunks
    assert_eq!(device.count(CMD_READ_BUFFER), 2);
    assert_eq!(device.count(CMD_FREE_DATA), 1);
}

#[tokio::test]
async fn test_empty_log_skips_buffer_read() {
    let device = FakeDevice::start(FakeDeviceConfig::default()).await;
    let mut source = source_for(&device, 0);
    source.connect().await.unwrap();

    assert!(source.fetch_new_events().await.unwrap().is_empty());
    assert_eq!(device.count(CMD_PREPARE_BUFFER), 0);
}

#[tokio::test]
async fn test_connect_with_password() {
    let device = FakeDevice::start(FakeDeviceConfig {
        password: Some(12345),
        records: two_records(),
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 12345);

    source.connect().await.unwrap();
    assert_eq!(device.count(CMD_AUTH), 1);
    assert_eq!(source.fetch_new_events().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_wrong_password_is_protocol_error() {
    let device = FakeDevice::start(FakeDeviceConfig {
        password: Some(12345),
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 999);

    let err = source.connect().await.unwrap_err();
    assert!(matches!(err, DeviceError::Unauthenticated));
    assert_eq!(err.kind(), DeviceErrorKind::Protocol);
    assert!(!source.is_connected());
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let device = FakeDevice::start(FakeDeviceConfig::default()).await;
    let mut source = source_for(&device, 0);

    source.connect().await.unwrap();
    source.connect().await.unwrap();

    assert_eq!(device.count(CMD_CONNECT), 1);
    assert_eq!(device.connections(), 1);
}

#[tokio::test]
async fn test_disconnect_sends_exit() {
    let device = FakeDevice::start(FakeDeviceConfig::default()).await;
    let mut source = source_for(&device, 0);
    source.connect().await.unwrap();

    source.disconnect().await;
    source.disconnect().await;

    assert!(!source.is_connected());
    assert_eq!(device.count(CMD_EXIT), 1);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let device = FakeDevice::start(FakeDeviceConfig {
        records: two_records(),
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);

    source.connect().await.unwrap();
    source.disconnect().await;
    source.connect().await.unwrap();

    assert_eq!(source.fetch_new_events().await.unwrap().len(), 2);
    assert_eq!(device.connections(), 2);
}

#[tokio::test]
async fn test_fetch_without_session() {
    let device = FakeDevice::start(FakeDeviceConfig::default()).await;
    let mut source = source_for(&device, 0);

    let err = source.fetch_new_events().await.unwrap_err();
    assert!(matches!(err, DeviceError::NotConnected));
    assert_eq!(err.kind(), DeviceErrorKind::Unreachable);
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut source = ZkDeviceSource::new(ZkSettings {
        host: "127.0.0.1".into(),
        port,
        password: 0,
        io_timeout: Duration::from_millis(500),
    });

    let err = source.connect().await.unwrap_err();
    assert_eq!(err.kind(), DeviceErrorKind::Unreachable);
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let device = FakeDevice::start(FakeDeviceConfig {
        behavior: Behavior::Silent,
        ..Default::default()
    })
    .await;
    let mut source = ZkDeviceSource::new(ZkSettings {
        host: device.host(),
        port: device.port(),
        password: 0,
        io_timeout: Duration::from_millis(100),
    });

    let err = source.connect().await.unwrap_err();
    assert!(matches!(err, DeviceError::Timeout { operation: "read", .. }));
    assert_eq!(err.kind(), DeviceErrorKind::Unreachable);
}

#[tokio::test]
async fn test_garbage_reply_is_protocol_error() {
    let device = FakeDevice::start(FakeDeviceConfig {
        behavior: Behavior::Garbage,
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);

    let err = source.connect().await.unwrap_err();
    assert_eq!(err.kind(), DeviceErrorKind::Protocol);
}

#[tokio::test]
async fn test_session_drop_mid_fetch_is_unreachable() {
    let device = FakeDevice::start(FakeDeviceConfig {
        records: two_records(),
        behavior: Behavior::DropAfterConnect,
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);
    source.connect().await.unwrap();

    let err = source.fetch_new_events().await.unwrap_err();
    assert_eq!(err.kind(), DeviceErrorKind::Unreachable);
}

#[tokio::test]
async fn test_oversized_buffer_is_refused() {
    let device = FakeDevice::start(FakeDeviceConfig {
        records: two_records(),
        behavior: Behavior::OversizedBuffer,
        ..Default::default()
    })
    .await;
    let mut source = source_for(&device, 0);
    source.connect().await.unwrap();

    let err = source.fetch_new_events().await.unwrap_err();
    assert!(matches!(err, DeviceError::Protocol(_)));
    assert_eq!(device.count(CMD_READ_BUFFER), 0);
}
