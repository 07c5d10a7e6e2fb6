pub mod models;

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

use crate::{config::Config, ingest::decision::AlertKind};

use self::models::SendTextRequest;

/// Client for the Evolution WhatsApp gateway.
///
/// All sends are best-effort: the gateway being down, misconfigured, or
/// absent entirely must never fail the caller's request. When the gateway
/// is not configured, sends are skipped with a warning.
#[derive(Debug, Clone)]
pub struct EvolutionClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    gateway: Option<Gateway>,
}

#[derive(Debug)]
struct Gateway {
    base_url: String,
    api_key: String,
    instance: String,
}

impl EvolutionClient {
    pub fn new(config: &Config) -> Self {
        let gateway = match (
            config.evolution_url.clone(),
            config.evolution_api_key.clone(),
            config.evolution_instance.clone(),
        ) {
            (Some(base_url), Some(api_key), Some(instance)) => {
                Some(Gateway { base_url, api_key, instance })
            }
            _ => None,
        };

        Self {
            inner: Arc::new(Inner { http: Client::new(), gateway }),
        }
    }

    /// Send a plain text message to a WhatsApp number.
    pub async fn send_text(&self, number: &str, text: &str) -> Result<()> {
        let Some(gateway) = &self.inner.gateway else {
            warn!("Evolution API not configured; skipping WhatsApp send");
            return Ok(());
        };

        let url = format!("{}/message/sendText/{}", gateway.base_url, gateway.instance);
        debug!(number = %number, url = %url, "Sending WhatsApp message");

        self.inner
            .http
            .post(&url)
            .header("apikey", &gateway.api_key)
            .json(&SendTextRequest { number, text })
            .send()
            .await
            .context("Evolution sendText request failed")?
            .error_for_status()
            .context("Evolution sendText returned error status")?;

        Ok(())
    }

    /// Format and send a threshold alert with the interactive reply menu.
    pub async fn send_alert(
        &self,
        number: &str,
        sensor_name: &str,
        temperature_c: f64,
        kind: AlertKind,
    ) -> Result<()> {
        self.send_text(number, &format_alert(sensor_name, temperature_c, kind))
            .await
    }

    /// Fire-and-forget variant of [`send_text`](Self::send_text). Delivery
    /// failures are logged in the spawned task and never reach the caller.
    pub fn send_text_detached(&self, number: String, text: String) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_text(&number, &text).await {
                warn!(error = %e, "WhatsApp send failed");
            }
        });
    }

    /// Fire-and-forget variant of [`send_alert`](Self::send_alert).
    pub fn send_alert_detached(
        &self,
        number: String,
        sensor_name: String,
        temperature_c: f64,
        kind: AlertKind,
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_alert(&number, &sensor_name, temperature_c, kind).await {
                warn!(error = %e, "WhatsApp alert send failed");
            }
        });
    }
}

/// Build the threshold-alert message body, including the numeric reply menu
/// the webhook understands.
pub(crate) fn format_alert(sensor_name: &str, temperature_c: f64, kind: AlertKind) -> String {
    format!(
        "🚨 *ALERTA DE TEMPERATURA {tipo}*\n\n\
         📍 *Equipo:* {sensor_name}\n\
         🌡️ *Temperatura:* {temperature_c:.2}°C\n\n\
         ⚠️ _Límite superado {emoji}_\n\n\
         *Responde con un número:*\n\
         1️⃣ - ✅ *Recibido* (Silenciar)\n\
         2️⃣ - 📊 *Ver Historial*\n\
         3️⃣ - 📋 *Estado General*",
        tipo = kind.label(),
        emoji = kind.emoji(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_message_contains_kind_label_and_temperature() {
        let msg = format_alert("Heladera 1", 12.345, AlertKind::High);
        assert!(msg.contains("ALERTA DE TEMPERATURA ALTA"));
        assert!(msg.contains("*Equipo:* Heladera 1"));
        assert!(msg.contains("12.35°C"));
        assert!(msg.contains("🔥"));
    }

    #[test]
    fn low_alert_uses_cold_emoji() {
        let msg = format_alert("Freezer", -3.0, AlertKind::Low);
        assert!(msg.contains("ALERTA DE TEMPERATURA BAJA"));
        assert!(msg.contains("-3.00°C"));
        assert!(msg.contains("❄️"));
    }

    #[test]
    fn alert_message_lists_reply_menu() {
        let msg = format_alert("Heladera 1", 12.0, AlertKind::High);
        for option in ["1️⃣", "2️⃣", "3️⃣"] {
            assert!(msg.contains(option));
        }
    }
}
