use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub active_forms: usize,
    pub uptime_secs: u64,
    pub version: &'static str,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let database = ctx.core.with_conn(crate::db::healthcheck).is_ok();

    Ok(Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        active_forms: ctx.core.engine.active_sessions(),
        uptime_secs: ctx.core.uptime_secs(),
        version: crate::config::APP_VERSION,
    }))
}
