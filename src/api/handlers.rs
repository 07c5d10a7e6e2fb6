use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::warn;
use utoipa::OpenApi;

use super::{
    dto::{
        AuthResponse, DeviceSensorDto, HistoryParams, IngestRequest, LatestSensorDto,
        LoginRequest, MeasurementDto, MessageResponse, ProfileResponse, ProfileUpdateRequest,
        RegisterRequest, SensorUpsertRequest,
    },
    errors::AppError,
};
use crate::{
    auth::{self, AuthUser, DeviceGate},
    db::models::User,
    device::{DeviceStatus, DeviceStatusUpdate},
    evolution::models::WebhookEnvelope,
    AppState,
};

const HISTORY_DEFAULT_LIMIT: i64 = 50;
const HISTORY_MAX_LIMIT: i64 = 500;

// ---------------------------------------------------------------------------
// Device endpoints
// ---------------------------------------------------------------------------

/// Ingest one reading pushed by the ESP32.
///
/// The measurement is the only mandatory outcome: once it is durable the
/// call reports success, whatever happens to downstream notifications.
#[utoipa::path(
    post,
    path = "/api/data",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Measurement persisted", body = MessageResponse),
        (status = 400, description = "Missing or non-numeric required fields"),
        (status = 404, description = "Unknown hardware id"),
    ),
    tag = "device"
)]
pub async fn ingest_measurement(
    State(state): State<AppState>,
    _gate: DeviceGate,
    Json(req): Json<IngestRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let reading = req.into_reading(Utc::now())?;
    state.ingest.process(reading).await?;
    Ok(Json(MessageResponse::ok()))
}

/// Wiring for every enabled sensor, polled by the firmware at boot.
#[utoipa::path(
    get,
    path = "/api/device/config",
    responses(
        (status = 200, description = "Enabled sensors' pin assignments", body = Vec<DeviceSensorDto>),
    ),
    tag = "device"
)]
pub async fn device_config(
    State(state): State<AppState>,
    _gate: DeviceGate,
) -> Result<Json<Vec<DeviceSensorDto>>, AppError> {
    let rows = sqlx::query_as::<_, DeviceSensorDto>(
        "SELECT hardware_id, pin, door_pin FROM sensors WHERE enabled = TRUE ORDER BY hardware_id",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

/// Heartbeat pushed periodically by the device.
#[utoipa::path(
    post,
    path = "/api/device/status",
    request_body = DeviceStatusUpdate,
    responses((status = 200, description = "Heartbeat recorded", body = MessageResponse)),
    tag = "device"
)]
pub async fn update_device_status(
    State(state): State<AppState>,
    _gate: DeviceGate,
    Json(update): Json<DeviceStatusUpdate>,
) -> Json<MessageResponse> {
    state.device.apply(update, Utc::now()).await;
    Json(MessageResponse::ok())
}

/// Last known device status, with staleness applied on read.
#[utoipa::path(
    get,
    path = "/api/device/status",
    responses((status = 200, description = "Device status snapshot", body = DeviceStatus)),
    tag = "device"
)]
pub async fn get_device_status(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<DeviceStatus> {
    Json(state.device.snapshot(Utc::now(), state.device_offline).await)
}

// ---------------------------------------------------------------------------
// Sensor endpoints (client-facing)
// ---------------------------------------------------------------------------

/// Every enabled sensor the caller owns, with its latest measurement.
#[utoipa::path(
    get,
    path = "/api/sensors/latest",
    responses(
        (status = 200, description = "Latest reading per owned sensor", body = Vec<LatestSensorDto>),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "sensors"
)]
pub async fn sensors_latest(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<LatestSensorDto>>, AppError> {
    let rows = sqlx::query_as::<_, LatestSensorDto>(
        "SELECT s.hardware_id, s.friendly_name, s.min_threshold, s.max_threshold, \
                s.is_door_open, m.temperature_c, m.voltage_v, m.timestamp \
         FROM sensors s \
         LEFT JOIN (SELECT DISTINCT ON (sensor_id) \
                        sensor_id, temperature_c, voltage_v, timestamp \
                    FROM measurements \
                    ORDER BY sensor_id, timestamp DESC) m \
                ON m.sensor_id = s.hardware_id \
         WHERE s.owner_id = $1 AND s.enabled = TRUE \
         ORDER BY s.friendly_name",
    )
    .bind(user.id)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

/// Recent measurements for one owned sensor, newest first.
#[utoipa::path(
    get,
    path = "/api/sensors/history",
    params(
        ("sensorId" = String, Query, description = "Hardware id"),
        ("limit" = Option<i64>, Query, description = "Max rows (default 50)"),
    ),
    responses(
        (status = 200, description = "Measurements, newest first", body = Vec<MeasurementDto>),
        (status = 400, description = "sensorId missing"),
    ),
    tag = "sensors"
)]
pub async fn sensors_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<MeasurementDto>>, AppError> {
    let sensor_id = params
        .sensor_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidInput("sensorId is required".to_owned()))?;
    let limit = params
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .clamp(1, HISTORY_MAX_LIMIT);

    let rows = sqlx::query_as::<_, MeasurementDto>(
        "SELECT sensor_id, temperature_c, voltage_v, door_open, timestamp \
         FROM measurements WHERE sensor_id = $1 AND owner_id = $2 \
         ORDER BY timestamp DESC LIMIT $3",
    )
    .bind(&sensor_id)
    .bind(user.id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

/// Create or update a sensor config, keyed by hardware id.
#[utoipa::path(
    post,
    path = "/api/sensors/config",
    request_body = SensorUpsertRequest,
    responses(
        (status = 200, description = "Stored sensor config", body = MessageResponse),
        (status = 400, description = "Missing fields, unmapped door pin, or disallowed hardware id"),
        (status = 409, description = "Hardware id owned by another account"),
    ),
    tag = "sensors"
)]
pub async fn upsert_sensor(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SensorUpsertRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let (Some(hardware_id), Some(friendly_name), Some(pin)) = (
        req.hardware_id.filter(|s| !s.is_empty()),
        req.friendly_name.filter(|s| !s.is_empty()),
        req.pin,
    ) else {
        return Err(AppError::InvalidInput(
            "hardwareId, friendlyName and pin are required".to_owned(),
        ));
    };

    if !state.allowed_hardware_ids.is_empty()
        && !state.allowed_hardware_ids.iter().any(|id| id == &hardware_id)
    {
        return Err(AppError::InvalidInput("hardware id not allowed".to_owned()));
    }

    // Reject door pins the channel mapping doesn't know; a sensor wired to
    // an unmapped pin would silently never transition door state.
    if let Some(door_pin) = req.door_pin {
        if !state.door_channels.contains_key(&door_pin) {
            return Err(AppError::InvalidInput(format!(
                "door pin {door_pin} has no payload channel mapping"
            )));
        }
    }

    let stored = sqlx::query_scalar::<_, uuid::Uuid>(
        "INSERT INTO sensors (hardware_id, friendly_name, min_threshold, max_threshold, \
                              voltage_threshold, pin, door_pin, enabled, owner_id) \
         VALUES ($1, $2, COALESCE($3, 0.0), COALESCE($4, 10.0), COALESCE($5, 4.2), $6, $7, TRUE, $8) \
         ON CONFLICT (hardware_id) DO UPDATE SET \
             friendly_name = EXCLUDED.friendly_name, \
             min_threshold = COALESCE($3, sensors.min_threshold), \
             max_threshold = COALESCE($4, sensors.max_threshold), \
             voltage_threshold = COALESCE($5, sensors.voltage_threshold), \
             pin = EXCLUDED.pin, \
             door_pin = EXCLUDED.door_pin, \
             enabled = TRUE, \
             updated_at = now() \
         WHERE sensors.owner_id = EXCLUDED.owner_id \
         RETURNING id",
    )
    .bind(&hardware_id)
    .bind(&friendly_name)
    .bind(req.min_threshold)
    .bind(req.max_threshold)
    .bind(req.voltage_threshold)
    .bind(pin)
    .bind(req.door_pin)
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?;

    if stored.is_none() {
        return Err(AppError::Conflict(
            "hardware id already registered to another account".to_owned(),
        ));
    }
    Ok(Json(MessageResponse::ok()))
}

/// Delete an owned sensor config; its measurements cascade away with it.
#[utoipa::path(
    delete,
    path = "/api/sensors/{hardware_id}",
    params(("hardware_id" = String, Path, description = "Hardware id")),
    responses((status = 200, description = "Deleted (or nothing to delete)", body = MessageResponse)),
    tag = "sensors"
)]
pub async fn delete_sensor(
    State(state): State<AppState>,
    user: AuthUser,
    Path(hardware_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    sqlx::query("DELETE FROM sensors WHERE hardware_id = $1 AND owner_id = $2")
        .bind(&hardware_id)
        .bind(user.id)
        .execute(&state.pool)
        .await?;
    Ok(Json(MessageResponse { message: "deleted".to_owned() }))
}

/// The hardware-id allow-list configured for this deployment.
#[utoipa::path(
    get,
    path = "/api/sensors/ids",
    responses((status = 200, description = "Allowed hardware ids", body = Vec<String>)),
    tag = "sensors"
)]
pub async fn hardware_ids(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<Vec<String>> {
    Json(state.allowed_hardware_ids.clone())
}

// ---------------------------------------------------------------------------
// Auth endpoints
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Missing fields"),
        (status = 409, description = "Username taken"),
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let (Some(username), Some(password), Some(whatsapp)) = (
        req.username.filter(|s| !s.is_empty()),
        req.password.filter(|s| !s.is_empty()),
        req.whatsapp.filter(|s| !s.is_empty()),
    ) else {
        return Err(AppError::InvalidInput(
            "username, password and whatsapp are required".to_owned(),
        ));
    };

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE username = $1")
        .bind(&username)
        .fetch_one(&state.pool)
        .await?;
    if exists > 0 {
        return Err(AppError::Conflict("username already exists".to_owned()));
    }

    let password_hash = auth::hash_password(&password)?;
    let user_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "INSERT INTO users (username, password_hash, whatsapp, whatsapp_alerts, use_door_sensors) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(&username)
    .bind(&password_hash)
    .bind(&whatsapp)
    .bind(req.whatsapp_alerts)
    .bind(req.use_door_sensors)
    .fetch_one(&state.pool)
    .await?;

    let token = state.tokens.issue(user_id, &username);
    Ok((StatusCode::CREATED, Json(AuthResponse { token, username })))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(AppError::InvalidInput("incomplete credentials".to_owned()));
    };

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, whatsapp, whatsapp_alerts, use_door_sensors \
         FROM users WHERE username = $1",
    )
    .bind(&username)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::Unauthorized("invalid credentials".to_owned()))?;

    if !auth::verify_password(&password, &user.password_hash) {
        return Err(AppError::Unauthorized("invalid credentials".to_owned()));
    }

    let token = state.tokens.issue(user.id, &user.username);
    Ok(Json(AuthResponse { token, username: user.username }))
}

#[utoipa::path(
    get,
    path = "/api/auth/profile",
    responses(
        (status = 200, description = "Profile without credential material", body = ProfileResponse),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "auth"
)]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = sqlx::query_as::<_, ProfileResponse>(
        "SELECT username, whatsapp, whatsapp_alerts, use_door_sensors FROM users WHERE id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;
    Ok(Json(profile))
}

#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "WhatsApp contact missing"),
        (status = 401, description = "Old password does not match"),
    ),
    tag = "auth"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let whatsapp = req
        .whatsapp
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidInput("whatsapp is required".to_owned()))?;

    let current = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, whatsapp, whatsapp_alerts, use_door_sensors \
         FROM users WHERE id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

    // Password change is opt-in and gated on the current password.
    let password_hash = match req.new_password.as_deref().map(str::trim) {
        Some(new_password) if !new_password.is_empty() => {
            let old = req.old_password.as_deref().unwrap_or("");
            if !auth::verify_password(old, &current.password_hash) {
                return Err(AppError::Unauthorized("current password is incorrect".to_owned()));
            }
            auth::hash_password(new_password)?
        }
        _ => current.password_hash.clone(),
    };

    let profile = sqlx::query_as::<_, ProfileResponse>(
        "UPDATE users SET whatsapp = $2, password_hash = $3, \
             whatsapp_alerts = COALESCE($4, whatsapp_alerts), \
             use_door_sensors = COALESCE($5, use_door_sensors) \
         WHERE id = $1 \
         RETURNING username, whatsapp, whatsapp_alerts, use_door_sensors",
    )
    .bind(user.id)
    .bind(&whatsapp)
    .bind(&password_hash)
    .bind(req.whatsapp_alerts)
    .bind(req.use_door_sensors)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(profile))
}

/// Delete the account; sensors and measurements cascade away with it.
#[utoipa::path(
    delete,
    path = "/api/auth/profile",
    responses((status = 200, description = "Account deleted", body = MessageResponse)),
    tag = "auth"
)]
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(&state.pool)
        .await?;
    Ok(Json(MessageResponse { message: "account deleted".to_owned() }))
}

// ---------------------------------------------------------------------------
// WhatsApp webhook
// ---------------------------------------------------------------------------

/// Inbound gateway events. Always acknowledged with 200 — a failing menu
/// action must not make the gateway retry the delivery.
#[utoipa::path(
    post,
    path = "/api/webhook/whatsapp",
    responses((status = 200, description = "Acknowledged")),
    tag = "webhook"
)]
pub async fn whatsapp_webhook(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> StatusCode {
    if let Some((from, text)) = envelope.sender_and_text() {
        if let Err(e) = state.replies.handle(&from, &text).await {
            warn!(error = %e, "Webhook reply handling failed");
        }
    }
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy")),
    tag = "system"
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        ingest_measurement,
        device_config,
        update_device_status,
        get_device_status,
        sensors_latest,
        sensors_history,
        upsert_sensor,
        delete_sensor,
        hardware_ids,
        register,
        login,
        get_profile,
        update_profile,
        delete_account,
        whatsapp_webhook,
        health,
    ),
    components(schemas(
        IngestRequest,
        DeviceSensorDto,
        DeviceStatus,
        DeviceStatusUpdate,
        LatestSensorDto,
        MeasurementDto,
        SensorUpsertRequest,
        RegisterRequest,
        LoginRequest,
        AuthResponse,
        ProfileResponse,
        ProfileUpdateRequest,
        MessageResponse,
    )),
    tags(
        (name = "device", description = "Firmware-facing endpoints"),
        (name = "sensors", description = "Sensor config and readings"),
        (name = "auth", description = "Accounts and tokens"),
        (name = "webhook", description = "Messaging gateway callbacks"),
        (name = "system", description = "System endpoints"),
    ),
    info(
        title = "ColdWatch Backend API",
        version = "0.1.0",
        description = "REST API for cold-chain sensor telemetry and alerting"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
