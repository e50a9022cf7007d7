use axum::{Extension, Json, extract::State, http::StatusCode};

use abode_types::api::{Claims, RegisterPushTokenRequest};

use crate::auth::AppState;
use crate::error::{ApiResult, blocking};

pub async fn register_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterPushTokenRequest>,
) -> ApiResult<StatusCode> {
    let engine = state.engine.clone();
    blocking(move || Ok(engine.register_push_token(&claims.sub, req.platform, &req.token)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}
