pub mod decision;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    api::errors::AppError,
    config::DoorChannel,
    db::models::SensorWithOwner,
    evolution::EvolutionClient,
    ingest::decision::DoorAction,
};

/// One validated reading, as handed over by the HTTP boundary.
#[derive(Debug, Clone)]
pub struct ReadingInput {
    pub sensor_id: String,
    pub temperature_c: f64,
    pub voltage_v: f64,
    /// Raw payload door bits for channels one and two.
    pub door_bits: [bool; 2],
    pub timestamp: DateTime<Utc>,
}

/// Processes one incoming reading end to end: resolve the sensor, persist
/// the measurement (the only mandatory outcome), run the decision rules,
/// apply the resulting registry updates, and hand notifications to the
/// gateway as detached best-effort tasks.
#[derive(Clone)]
pub struct IngestService {
    pool: PgPool,
    notifier: EvolutionClient,
    door_channels: HashMap<i32, DoorChannel>,
    cooldown: Duration,
}

impl IngestService {
    pub fn new(
        pool: PgPool,
        notifier: EvolutionClient,
        door_channels: HashMap<i32, DoorChannel>,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            pool,
            notifier,
            door_channels,
            cooldown: Duration::minutes(cooldown_minutes),
        }
    }

    pub async fn process(&self, input: ReadingInput) -> Result<(), AppError> {
        let sensor = self
            .fetch_sensor(&input.sensor_id)
            .await?
            .ok_or(AppError::SensorNotFound)?;

        // Which payload channel this sensor reads, if any.
        let door_bit = sensor
            .door_pin
            .and_then(|pin| self.door_channels.get(&pin).copied())
            .map(|channel| match channel {
                DoorChannel::First => input.door_bits[0],
                DoorChannel::Second => input.door_bits[1],
            });

        // Measurement first. Everything after this point is state upkeep and
        // best-effort notification; the reading itself is already durable.
        sqlx::query(
            "INSERT INTO measurements (sensor_id, owner_id, temperature_c, voltage_v, door_open, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&sensor.hardware_id)
        .bind(sensor.owner_id)
        .bind(input.temperature_c)
        .bind(input.voltage_v)
        .bind(door_bit.unwrap_or(false))
        .bind(input.timestamp)
        .execute(&self.pool)
        .await?;

        let now = Utc::now();
        let decision =
            decision::evaluate(&sensor, door_bit, input.temperature_c, now, self.cooldown);
        debug!(
            sensor_id = %sensor.hardware_id,
            door = ?decision.door,
            clear_ack = decision.clear_ack,
            alert = ?decision.alert,
            "Reading evaluated"
        );

        self.apply_door(&sensor, decision.door, now).await?;

        if decision.clear_ack {
            sqlx::query("UPDATE sensors SET is_acknowledged = FALSE WHERE hardware_id = $1")
                .bind(&sensor.hardware_id)
                .execute(&self.pool)
                .await?;
        }

        if let Some(kind) = decision.alert {
            self.dispatch_threshold_alert(&sensor, kind, input.temperature_c, now)
                .await?;
        }

        Ok(())
    }

    async fn fetch_sensor(&self, hardware_id: &str) -> Result<Option<SensorWithOwner>, AppError> {
        let sensor = sqlx::query_as::<_, SensorWithOwner>(
            "SELECT s.hardware_id, s.friendly_name, s.min_threshold, s.max_threshold, \
                    s.door_pin, s.is_door_open, s.door_opened_at, s.is_acknowledged, \
                    s.last_alert_sent, s.owner_id, \
                    u.whatsapp, u.whatsapp_alerts, u.use_door_sensors \
             FROM sensors s \
             JOIN users u ON u.id = s.owner_id \
             WHERE s.hardware_id = $1",
        )
        .bind(hardware_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sensor)
    }

    async fn apply_door(
        &self,
        sensor: &SensorWithOwner,
        action: DoorAction,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        match action {
            DoorAction::None => {}
            DoorAction::Opened => {
                sqlx::query(
                    "UPDATE sensors SET is_door_open = TRUE, door_opened_at = $2 \
                     WHERE hardware_id = $1",
                )
                .bind(&sensor.hardware_id)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            DoorAction::StillOpen => {
                // Anchor stays put; nothing to write.
            }
            DoorAction::ReAlert => {
                sqlx::query(
                    "UPDATE sensors SET is_door_open = TRUE, door_opened_at = $2 \
                     WHERE hardware_id = $1",
                )
                .bind(&sensor.hardware_id)
                .bind(now)
                .execute(&self.pool)
                .await?;

                info!(sensor_id = %sensor.hardware_id, "Door open past window, notifying");
                self.notifier.send_text_detached(
                    sensor.whatsapp.clone(),
                    format!(
                        "🚪 *PUERTA ABIERTA:* \"{}\" lleva +2 min abierta.",
                        sensor.friendly_name
                    ),
                );
            }
            DoorAction::Closed => {
                sqlx::query(
                    "UPDATE sensors SET is_door_open = FALSE, door_opened_at = NULL \
                     WHERE hardware_id = $1",
                )
                .bind(&sensor.hardware_id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Claim the cooldown window with a single conditional update, then
    /// dispatch. Concurrent readings race on the same row; only the one
    /// whose update matches sends the alert.
    async fn dispatch_threshold_alert(
        &self,
        sensor: &SensorWithOwner,
        kind: decision::AlertKind,
        temperature_c: f64,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let cutoff = now - self.cooldown;
        let claimed = sqlx::query_scalar::<_, Uuid>(
            "UPDATE sensors SET last_alert_sent = $2 \
             WHERE hardware_id = $1 \
               AND (last_alert_sent IS NULL OR last_alert_sent < $3) \
             RETURNING id",
        )
        .bind(&sensor.hardware_id)
        .bind(now)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            info!(
                sensor_id = %sensor.hardware_id,
                kind = kind.label(),
                temperature_c,
                "Threshold alert dispatched"
            );
            self.notifier.send_alert_detached(
                sensor.whatsapp.clone(),
                sensor.friendly_name.clone(),
                temperature_c,
                kind,
            );
        } else {
            debug!(sensor_id = %sensor.hardware_id, "Cooldown claimed elsewhere, skipping alert");
        }
        Ok(())
    }
}
