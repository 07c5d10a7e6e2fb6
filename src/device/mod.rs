use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

/// Most recently reported device status. The fleet is a single ESP32 today,
/// so the cell is keyed globally; multi-device support means swapping the
/// inner value for a map keyed by hardware id.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub online: bool,
    pub ip: String,
    pub one_wire_pin: i32,
    pub door_pins: String,
    pub physical_sensors: i32,
    pub configured_sensors: i32,
    /// Probe address → pin assignments as reported by the firmware.
    #[schema(value_type = Object)]
    pub mapping: serde_json::Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            online: false,
            ip: "--".to_owned(),
            one_wire_pin: 25,
            door_pins: "26, 27, 14".to_owned(),
            physical_sensors: 0,
            configured_sensors: 0,
            mapping: serde_json::Value::Array(vec![]),
            timestamp: None,
        }
    }
}

/// Partial heartbeat update; absent fields keep their previous value.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusUpdate {
    pub ip: Option<String>,
    pub one_wire_pin: Option<i32>,
    pub door_pins: Option<String>,
    pub physical_sensors: Option<i32>,
    pub configured_sensors: Option<i32>,
    #[schema(value_type = Option<Object>)]
    pub mapping: Option<serde_json::Value>,
}

/// Last-write-wins heartbeat cell.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks;
/// injected through `AppState` rather than living in module-level state.
#[derive(Clone, Default)]
pub struct DeviceStatusCell {
    inner: Arc<RwLock<DeviceStatus>>,
}

impl DeviceStatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a heartbeat into the cell, marking the device online and
    /// stamping the arrival time.
    pub async fn apply(&self, update: DeviceStatusUpdate, now: DateTime<Utc>) {
        let mut status = self.inner.write().await;
        if let Some(ip) = update.ip {
            status.ip = ip;
        }
        if let Some(pin) = update.one_wire_pin {
            status.one_wire_pin = pin;
        }
        if let Some(pins) = update.door_pins {
            status.door_pins = pins;
        }
        if let Some(n) = update.physical_sensors {
            status.physical_sensors = n;
        }
        if let Some(n) = update.configured_sensors {
            status.configured_sensors = n;
        }
        if let Some(mapping) = update.mapping {
            status.mapping = mapping;
        }
        status.online = true;
        status.timestamp = Some(now);
    }

    /// Snapshot the status, reading `online = false` when the last heartbeat
    /// is older than `offline_after`.
    pub async fn snapshot(&self, now: DateTime<Utc>, offline_after: Duration) -> DeviceStatus {
        let mut status = self.inner.read().await.clone();
        if let Some(t) = status.timestamp {
            if now - t > offline_after {
                status.online = false;
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn offline_after() -> Duration {
        Duration::seconds(120)
    }

    #[tokio::test]
    async fn fresh_cell_reads_offline() {
        let cell = DeviceStatusCell::new();
        let status = cell.snapshot(at(0), offline_after()).await;
        assert!(!status.online);
        assert_eq!(status.ip, "--");
        assert!(status.timestamp.is_none());
    }

    #[tokio::test]
    async fn heartbeat_marks_online_and_stamps_time() {
        let cell = DeviceStatusCell::new();
        cell.apply(
            DeviceStatusUpdate { ip: Some("192.168.0.50".to_owned()), ..Default::default() },
            at(0),
        )
        .await;

        let status = cell.snapshot(at(10), offline_after()).await;
        assert!(status.online);
        assert_eq!(status.ip, "192.168.0.50");
        assert_eq!(status.timestamp, Some(at(0)));
    }

    #[tokio::test]
    async fn stale_heartbeat_reads_offline() {
        let cell = DeviceStatusCell::new();
        cell.apply(DeviceStatusUpdate::default(), at(0)).await;

        // Within the window: still online.
        assert!(cell.snapshot(at(120), offline_after()).await.online);
        // Past it: offline, but the stored fields survive.
        let stale = cell.snapshot(at(121), offline_after()).await;
        assert!(!stale.online);
        assert_eq!(stale.timestamp, Some(at(0)));
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let cell = DeviceStatusCell::new();
        cell.apply(
            DeviceStatusUpdate {
                ip: Some("10.0.0.2".to_owned()),
                physical_sensors: Some(3),
                ..Default::default()
            },
            at(0),
        )
        .await;
        cell.apply(
            DeviceStatusUpdate { configured_sensors: Some(2), ..Default::default() },
            at(5),
        )
        .await;

        let status = cell.snapshot(at(6), offline_after()).await;
        assert_eq!(status.ip, "10.0.0.2");
        assert_eq!(status.physical_sensors, 3);
        assert_eq!(status.configured_sensors, 2);
        assert_eq!(status.timestamp, Some(at(5)));
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let cell = DeviceStatusCell::new();
        let clone = cell.clone();

        cell.apply(DeviceStatusUpdate::default(), at(0)).await;

        assert!(clone.snapshot(at(1), offline_after()).await.online);
    }
}
