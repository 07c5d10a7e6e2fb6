use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::errors::AppError;
use crate::ingest::ReadingInput;

// ---------------------------------------------------------------------------
// Device payloads
//
// The firmware's JSON is camelCase and has drifted across revisions, so the
// ingest body tolerates the older field names and numbers sent as strings.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default, alias = "id")]
    pub sensor_id: Option<String>,
    #[serde(default, alias = "temp", deserialize_with = "lenient_number")]
    #[schema(value_type = Option<f64>)]
    pub temp_c: Option<f64>,
    #[serde(default, alias = "battery", alias = "voltage", deserialize_with = "lenient_number")]
    #[schema(value_type = Option<f64>)]
    pub voltage_v: Option<f64>,
    #[serde(default, alias = "doorOpen", deserialize_with = "lenient_bit")]
    #[schema(value_type = Option<i32>)]
    pub door_open1: bool,
    #[serde(default, deserialize_with = "lenient_bit")]
    #[schema(value_type = Option<i32>)]
    pub door_open2: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IngestRequest {
    /// Validate presence of the required fields; nothing is written before
    /// this passes.
    pub fn into_reading(self, now: DateTime<Utc>) -> Result<ReadingInput, AppError> {
        let (Some(sensor_id), Some(temperature_c), Some(voltage_v)) =
            (self.sensor_id.filter(|s| !s.is_empty()), self.temp_c, self.voltage_v)
        else {
            return Err(AppError::InvalidInput(
                "sensorId, temp and voltage are required".to_owned(),
            ));
        };

        Ok(ReadingInput {
            sensor_id,
            temperature_c,
            voltage_v,
            door_bits: [self.door_open1, self.door_open2],
            timestamp: self.timestamp.unwrap_or(now),
        })
    }
}

/// Accept a JSON number or a numeric string; anything else (including
/// non-finite values) reads as absent and fails validation later.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite()))
}

/// A door bit is open only when the payload says exactly 1 (or `true`);
/// everything else, including absence, reads as closed.
fn lenient_bit<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(serde_json::Value::String(s)) => s.trim() == "1",
        Some(serde_json::Value::Bool(b)) => b,
        _ => false,
    })
}

/// Per-sensor wiring handed to the firmware by `GET /api/device/config`.
#[derive(Debug, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSensorDto {
    pub hardware_id: String,
    pub pin: i32,
    pub door_pin: Option<i32>,
}

// ---------------------------------------------------------------------------
// Client-facing sensor DTOs
// ---------------------------------------------------------------------------

/// A sensor's config joined with its latest measurement (if any).
#[derive(Debug, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LatestSensorDto {
    pub hardware_id: String,
    pub friendly_name: String,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub is_door_open: bool,
    pub temperature_c: Option<f64>,
    pub voltage_v: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementDto {
    pub sensor_id: String,
    pub temperature_c: f64,
    pub voltage_v: f64,
    pub door_open: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub sensor_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorUpsertRequest {
    pub hardware_id: Option<String>,
    pub friendly_name: Option<String>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub voltage_threshold: Option<f64>,
    pub pin: Option<i32>,
    pub door_pin: Option<i32>,
}

// ---------------------------------------------------------------------------
// Auth DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub whatsapp: Option<String>,
    #[serde(default = "default_true")]
    pub whatsapp_alerts: bool,
    #[serde(default)]
    pub use_door_sensors: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub username: String,
    pub whatsapp: String,
    pub whatsapp_alerts: bool,
    pub use_door_sensors: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub whatsapp: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
    pub whatsapp_alerts: Option<bool>,
    pub use_door_sensors: Option<bool>,
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self { message: "OK".to_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn ingest_request_accepts_canonical_fields() {
        let req: IngestRequest = serde_json::from_value(serde_json::json!({
            "sensorId": "ESP32-A1", "tempC": 4.5, "voltageV": 3.9,
            "doorOpen1": 1, "doorOpen2": 0
        }))
        .unwrap();
        let reading = req.into_reading(now()).unwrap();
        assert_eq!(reading.sensor_id, "ESP32-A1");
        assert_eq!(reading.temperature_c, 4.5);
        assert_eq!(reading.door_bits, [true, false]);
    }

    #[test]
    fn ingest_request_accepts_legacy_aliases() {
        let req: IngestRequest = serde_json::from_value(serde_json::json!({
            "id": "ESP32-A1", "temp": "4.5", "battery": "3.90", "doorOpen": "1"
        }))
        .unwrap();
        let reading = req.into_reading(now()).unwrap();
        assert_eq!(reading.temperature_c, 4.5);
        assert_eq!(reading.voltage_v, 3.9);
        assert_eq!(reading.door_bits, [true, false]);
    }

    #[test]
    fn non_numeric_temperature_reads_as_absent() {
        let req: IngestRequest = serde_json::from_value(serde_json::json!({
            "sensorId": "ESP32-A1", "tempC": "warm", "voltageV": 3.9
        }))
        .unwrap();
        assert!(matches!(req.into_reading(now()), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn non_finite_temperature_reads_as_absent() {
        let req: IngestRequest = serde_json::from_value(serde_json::json!({
            "sensorId": "ESP32-A1", "tempC": "NaN", "voltageV": 3.9
        }))
        .unwrap();
        assert!(req.temp_c.is_none());
    }

    #[test]
    fn missing_sensor_id_is_invalid() {
        let req: IngestRequest = serde_json::from_value(serde_json::json!({
            "tempC": 4.5, "voltageV": 3.9
        }))
        .unwrap();
        assert!(matches!(req.into_reading(now()), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn door_bit_only_one_means_open() {
        for (value, expected) in [
            (serde_json::json!(1), true),
            (serde_json::json!(1.0), true),
            (serde_json::json!("1"), true),
            (serde_json::json!(true), true),
            (serde_json::json!(0), false),
            (serde_json::json!(2), false),
            (serde_json::json!("open"), false),
            (serde_json::Value::Null, false),
        ] {
            let req: IngestRequest = serde_json::from_value(serde_json::json!({
                "sensorId": "x", "tempC": 1.0, "voltageV": 1.0, "doorOpen1": value
            }))
            .unwrap();
            assert_eq!(req.door_open1, expected);
        }
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let req: IngestRequest = serde_json::from_value(serde_json::json!({
            "sensorId": "x", "tempC": 1.0, "voltageV": 1.0,
            "timestamp": "2026-01-15T10:00:00Z"
        }))
        .unwrap();
        let reading = req.into_reading(now()).unwrap();
        assert_eq!(reading.timestamp.to_rfc3339(), "2026-01-15T10:00:00+00:00");
    }
}
