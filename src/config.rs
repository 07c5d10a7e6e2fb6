use std::{collections::HashMap, str::FromStr};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// DoorChannel
// ---------------------------------------------------------------------------

/// Which of the two door fields in the device payload a sensor reads.
///
/// The firmware reports up to two independent reed switches per message
/// (`doorOpen1`, `doorOpen2`); a sensor's configured `door_pin` selects one
/// of them through the `DOOR_PIN_CHANNELS` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorChannel {
    First,
    Second,
}

impl FromStr for DoorChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1" => Ok(Self::First),
            "2" => Ok(Self::Second),
            other => Err(anyhow::anyhow!("unknown door channel: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Key material for signing API bearer tokens.
    pub auth_secret: String,
    pub server_host: String,
    pub server_port: u16,
    /// Maps a sensor's configured door pin → payload channel.
    /// Format: `"pin:channel,pin:channel"` (e.g. `"4:1,16:2"`).
    pub door_channels: HashMap<i32, DoorChannel>,
    /// Minimum minutes between two dispatched threshold alerts per sensor.
    pub alert_cooldown_minutes: i64,
    /// Heartbeats older than this many seconds read as offline.
    pub device_offline_secs: i64,
    /// When set, device-facing endpoints require this key in `x-device-key`.
    pub device_api_key: Option<String>,
    pub evolution_url: Option<String>,
    pub evolution_api_key: Option<String>,
    pub evolution_instance: Option<String>,
    /// Hardware ids accepted by sensor config upserts. Empty = accept any.
    pub allowed_hardware_ids: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            auth_secret: required("AUTH_SECRET")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            door_channels: parse_door_channels(&optional("DOOR_PIN_CHANNELS", "4:1,16:2"))?,
            alert_cooldown_minutes: optional("ALERT_COOLDOWN", "30")
                .parse()
                .context("ALERT_COOLDOWN must be a number of minutes")?,
            device_offline_secs: optional("DEVICE_OFFLINE_SECS", "120")
                .parse()
                .context("DEVICE_OFFLINE_SECS must be a number of seconds")?,
            device_api_key: std::env::var("DEVICE_API_KEY").ok().filter(|s| !s.is_empty()),
            evolution_url: std::env::var("EVOLUTION_API_URL").ok().filter(|s| !s.is_empty()),
            evolution_api_key: std::env::var("EVOLUTION_API_KEY").ok().filter(|s| !s.is_empty()),
            evolution_instance: std::env::var("EVOLUTION_INSTANCE").ok().filter(|s| !s.is_empty()),
            allowed_hardware_ids: parse_id_list(&optional("ALLOWED_HARDWARE_IDS", "")),
        })
    }
}

/// Parse `"pin:channel,pin:channel"` into a `HashMap<i32, DoorChannel>`.
///
/// Returns an error immediately if any entry is malformed or names an
/// unrecognised channel, so bad mappings fail at startup instead of being
/// silently ignored per reading.
fn parse_door_channels(raw: &str) -> Result<HashMap<i32, DoorChannel>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (pin, channel) = entry.split_once(':').with_context(|| {
                format!("DOOR_PIN_CHANNELS entry must be 'pin:channel', got: {entry:?}")
            })?;
            let pin = pin.trim().parse::<i32>().with_context(|| {
                format!("invalid pin number in DOOR_PIN_CHANNELS entry {entry:?}")
            })?;
            let channel = channel.trim().parse::<DoorChannel>().with_context(|| {
                format!("unknown door channel in DOOR_PIN_CHANNELS entry {entry:?}")
            })?;
            Ok((pin, channel))
        })
        .collect()
}

fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
