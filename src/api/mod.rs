pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::AppState;
use handlers::ApiDoc;

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/api/data", post(handlers::ingest_measurement))
        .route("/api/device/config", get(handlers::device_config))
        .route(
            "/api/device/status",
            post(handlers::update_device_status).get(handlers::get_device_status),
        )
        .route("/api/sensors/latest", get(handlers::sensors_latest))
        .route("/api/sensors/history", get(handlers::sensors_history))
        .route("/api/sensors/config", post(handlers::upsert_sensor))
        .route("/api/sensors/ids", get(handlers::hardware_ids))
        .route("/api/sensors/{hardware_id}", delete(handlers::delete_sensor))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route(
            "/api/auth/profile",
            get(handlers::get_profile)
                .put(handlers::update_profile)
                .delete(handlers::delete_account),
        )
        .route("/api/webhook/whatsapp", post(handlers::whatsapp_webhook))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
