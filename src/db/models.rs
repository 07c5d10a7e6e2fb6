use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-sensor configuration row. One per physical probe, owned by one user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: Uuid,
    /// Firmware-assigned identifier; immutable, the join key for readings.
    pub hardware_id: String,
    pub friendly_name: String,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub voltage_threshold: f64,
    pub pin: i32,
    /// Physical door-sensor pin this probe is wired to, if any.
    pub door_pin: Option<i32>,
    pub is_door_open: bool,
    /// Set while the door is open in the current episode; null when closed.
    pub door_opened_at: Option<DateTime<Utc>>,
    pub is_acknowledged: bool,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub owner_id: Uuid,
}

/// A sensor joined with its owner's contact and alert preferences, as the
/// ingestion path loads it in a single query.
#[derive(Debug, Clone, FromRow)]
pub struct SensorWithOwner {
    pub hardware_id: String,
    pub friendly_name: String,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub door_pin: Option<i32>,
    pub is_door_open: bool,
    pub door_opened_at: Option<DateTime<Utc>>,
    pub is_acknowledged: bool,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub owner_id: Uuid,
    pub whatsapp: String,
    pub whatsapp_alerts: bool,
    pub use_door_sensors: bool,
}

/// Immutable reading record, appended once per ingested payload.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Measurement {
    pub id: Uuid,
    pub sensor_id: String,
    pub owner_id: Uuid,
    pub temperature_c: f64,
    pub voltage_v: f64,
    pub door_open: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub whatsapp: String,
    pub whatsapp_alerts: bool,
    pub use_door_sensors: bool,
}
