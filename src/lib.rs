pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod device;
pub mod evolution;
pub mod ingest;
pub mod webhook;

use std::collections::HashMap;

use chrono::Duration;
use sqlx::PgPool;

use crate::{
    auth::TokenSigner,
    config::{Config, DoorChannel},
    device::DeviceStatusCell,
    evolution::EvolutionClient,
    ingest::IngestService,
    webhook::ReplyService,
};

/// Everything the HTTP layer needs, built once at startup and cloned per
/// request. All members are cheap to clone (pools, `Arc`s, small values).
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub tokens: TokenSigner,
    pub device: DeviceStatusCell,
    pub ingest: IngestService,
    pub replies: ReplyService,
    pub door_channels: HashMap<i32, DoorChannel>,
    pub allowed_hardware_ids: Vec<String>,
    pub device_api_key: Option<String>,
    pub device_offline: Duration,
}

impl AppState {
    pub fn new(config: &Config, pool: PgPool) -> Self {
        let notifier = EvolutionClient::new(config);
        Self {
            tokens: TokenSigner::new(&config.auth_secret),
            device: DeviceStatusCell::new(),
            ingest: IngestService::new(
                pool.clone(),
                notifier.clone(),
                config.door_channels.clone(),
                config.alert_cooldown_minutes,
            ),
            replies: ReplyService::new(pool.clone(), notifier),
            door_channels: config.door_channels.clone(),
            allowed_hardware_ids: config.allowed_hardware_ids.clone(),
            device_api_key: config.device_api_key.clone(),
            device_offline: Duration::seconds(config.device_offline_secs),
            pool,
        }
    }
}
