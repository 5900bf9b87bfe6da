use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::ApiContext;
use crate::models::UserId;

/// `GET /api/states`: the keyed snapshot
/// (`state:<key>`, `user_state:<id>`, `incr_value`).
pub async fn snapshot(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = ctx.core.states.snapshot()?;
    Ok(Json(serde_json::Value::Object(snapshot.to_keyed())))
}

/// `GET /api/states/:state_key`: ids of users currently in the state.
pub async fn members(
    State(ctx): State<ApiContext>,
    Path(state_key): Path<String>,
) -> Result<Json<Vec<UserId>>, ApiError> {
    let members = ctx.core.states.members(&state_key)?;
    if members.is_empty() && ctx.core.registry.resolve(&state_key).is_err() {
        return Err(ApiError::NotFound(format!("Unknown state key: {state_key}")));
    }
    Ok(Json(members))
}
