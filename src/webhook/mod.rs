//! Numeric-menu replies arriving through the WhatsApp gateway webhook.
//!
//! Every alert message ends with a three-option menu; this module resolves
//! the sender to a user and executes the chosen action. Unknown senders and
//! unrecognized texts are ignored, and the webhook is always acknowledged
//! regardless of what happens here.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::America::Argentina::Buenos_Aires;
use sqlx::PgPool;
use tracing::debug;

use crate::{
    db::models::{Measurement, SensorConfig, User},
    evolution::EvolutionClient,
};

const HISTORY_PER_SENSOR: i64 = 5;

#[derive(Clone)]
pub struct ReplyService {
    pool: PgPool,
    notifier: EvolutionClient,
}

impl ReplyService {
    pub fn new(pool: PgPool, notifier: EvolutionClient) -> Self {
        Self { pool, notifier }
    }

    /// Handle one normalized webhook message.
    pub async fn handle(&self, from: &str, text: &str) -> Result<()> {
        let Some(user) = self.find_user_by_number(from).await? else {
            debug!(from = %from, "Webhook sender matches no user, ignoring");
            return Ok(());
        };

        match text {
            "1" => self.acknowledge_latest_alert(&user, from).await,
            "2" => self.send_history_report(&user, from).await,
            "3" | "estado" => self.send_status_report(&user, from).await,
            _ => Ok(()),
        }
    }

    /// Match a sender to a user by the last ten digits of their stored
    /// WhatsApp number; country-code prefixes vary between the gateway and
    /// what users type into their profile.
    async fn find_user_by_number(&self, from: &str) -> Result<Option<User>> {
        let start = from.len().saturating_sub(10);
        let suffix = from.get(start..).unwrap_or(from);

        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, whatsapp, whatsapp_alerts, use_door_sensors \
             FROM users WHERE whatsapp LIKE '%' || $1",
        )
        .bind(suffix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Menu option 1: silence the sensor whose alert fired most recently.
    async fn acknowledge_latest_alert(&self, user: &User, from: &str) -> Result<()> {
        let name = sqlx::query_scalar::<_, String>(
            "UPDATE sensors SET is_acknowledged = TRUE \
             WHERE id = (SELECT id FROM sensors \
                         WHERE owner_id = $1 AND last_alert_sent IS NOT NULL \
                         ORDER BY last_alert_sent DESC LIMIT 1) \
             RETURNING friendly_name",
        )
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(name) = name {
            self.notifier
                .send_text(
                    from,
                    &format!("✅ *Entendido.* Alertas de \"{name}\" silenciadas."),
                )
                .await?;
        }
        Ok(())
    }

    /// Menu option 2: last readings per sensor, in local time.
    async fn send_history_report(&self, user: &User, from: &str) -> Result<()> {
        let sensors = self.enabled_sensors(user).await?;
        if sensors.is_empty() {
            self.notifier
                .send_text(from, "❌ No tienes equipos vinculados.")
                .await?;
            return Ok(());
        }

        let mut report = String::from("📊 *HISTORIAL RECIENTE*\n\n");
        for sensor in &sensors {
            let docs = sqlx::query_as::<_, Measurement>(
                "SELECT id, sensor_id, owner_id, temperature_c, voltage_v, door_open, timestamp \
                 FROM measurements WHERE sensor_id = $1 AND owner_id = $2 \
                 ORDER BY timestamp DESC LIMIT $3",
            )
            .bind(&sensor.hardware_id)
            .bind(user.id)
            .bind(HISTORY_PER_SENSOR)
            .fetch_all(&self.pool)
            .await?;

            report.push_str(&format!("*{}:*\n", sensor.friendly_name));
            if docs.is_empty() {
                report.push_str("(Sin mediciones recientes)\n");
            } else {
                for m in &docs {
                    report.push_str(&history_line(m.timestamp, m.temperature_c));
                }
            }
            report.push('\n');
        }

        self.notifier.send_text(from, &report).await?;
        Ok(())
    }

    /// Menu option 3 / "estado": one line per sensor with the latest reading.
    async fn send_status_report(&self, user: &User, from: &str) -> Result<()> {
        let sensors = self.enabled_sensors(user).await?;

        let mut report = String::from("📋 *ESTADO ACTUAL*\n\n");
        for sensor in &sensors {
            let latest = sqlx::query_as::<_, Measurement>(
                "SELECT id, sensor_id, owner_id, temperature_c, voltage_v, door_open, timestamp \
                 FROM measurements WHERE sensor_id = $1 AND owner_id = $2 \
                 ORDER BY timestamp DESC LIMIT 1",
            )
            .bind(&sensor.hardware_id)
            .bind(user.id)
            .fetch_optional(&self.pool)
            .await?;

            report.push_str(&status_line(sensor, latest.as_ref()));
        }

        self.notifier.send_text(from, &report).await?;
        Ok(())
    }

    async fn enabled_sensors(&self, user: &User) -> Result<Vec<SensorConfig>> {
        let sensors = sqlx::query_as::<_, SensorConfig>(
            "SELECT id, hardware_id, friendly_name, min_threshold, max_threshold, \
                    voltage_threshold, pin, door_pin, is_door_open, door_opened_at, \
                    is_acknowledged, last_alert_sent, enabled, owner_id \
             FROM sensors WHERE owner_id = $1 AND enabled = TRUE \
             ORDER BY friendly_name",
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sensors)
    }
}

/// One history bullet, with the reading time rendered in Buenos Aires local
/// time the way the mobile client shows it.
fn history_line(timestamp: DateTime<Utc>, temperature_c: f64) -> String {
    let local = timestamp.with_timezone(&Buenos_Aires);
    format!("• {}: *{temperature_c:.2}°C*\n", local.format("%I:%M %p"))
}

fn status_line(sensor: &SensorConfig, latest: Option<&Measurement>) -> String {
    let out_of_range = latest.is_some_and(|m| {
        m.temperature_c > sensor.max_threshold || m.temperature_c < sensor.min_threshold
    });
    let icon = if out_of_range { "🔴" } else { "🟢" };
    let value = latest
        .map(|m| format!("{:.2}", m.temperature_c))
        .unwrap_or_else(|| "--".to_owned());
    let door = if sensor.is_door_open { "🚪 ABIERTA" } else { "🔒 Cerrada" };
    format!("{icon} *{}*: {value}°C ({door})\n", sensor.friendly_name)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    fn sensor(min: f64, max: f64, door_open: bool) -> SensorConfig {
        SensorConfig {
            id: Uuid::new_v4(),
            hardware_id: "ESP32-A1".to_owned(),
            friendly_name: "Heladera 1".to_owned(),
            min_threshold: min,
            max_threshold: max,
            voltage_threshold: 4.2,
            pin: 25,
            door_pin: None,
            is_door_open: door_open,
            door_opened_at: None,
            is_acknowledged: false,
            last_alert_sent: None,
            enabled: true,
            owner_id: Uuid::new_v4(),
        }
    }

    fn measurement(temperature_c: f64) -> Measurement {
        Measurement {
            id: Uuid::new_v4(),
            sensor_id: "ESP32-A1".to_owned(),
            owner_id: Uuid::new_v4(),
            temperature_c,
            voltage_v: 3.9,
            door_open: false,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn history_line_renders_buenos_aires_time() {
        // 2023-11-14 22:13:20 UTC is 19:13 in Buenos Aires (UTC-3).
        let line = history_line(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), 4.5);
        assert_eq!(line, "• 07:13 PM: *4.50°C*\n");
    }

    #[test]
    fn status_line_in_range_door_closed() {
        let line = status_line(&sensor(0.0, 10.0, false), Some(&measurement(5.0)));
        assert!(line.starts_with("🟢"));
        assert!(line.contains("5.00°C"));
        assert!(line.contains("🔒 Cerrada"));
    }

    #[test]
    fn status_line_out_of_range_door_open() {
        let line = status_line(&sensor(0.0, 10.0, true), Some(&measurement(12.0)));
        assert!(line.starts_with("🔴"));
        assert!(line.contains("🚪 ABIERTA"));
    }

    #[test]
    fn status_line_at_bound_reads_in_range() {
        let line = status_line(&sensor(0.0, 10.0, false), Some(&measurement(10.0)));
        assert!(line.starts_with("🟢"));
    }

    #[test]
    fn status_line_without_readings_shows_placeholder() {
        let line = status_line(&sensor(0.0, 10.0, false), None);
        assert!(line.contains("--°C"));
        assert!(line.starts_with("🟢"));
    }
}
