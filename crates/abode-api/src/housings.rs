use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use abode_types::HousingId;
use abode_types::api::{Claims, CreateHousingRequest, CreateHousingResponse};
use abode_types::models::Housing;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, blocking};

/// Registers a housing owned by the caller, so visits can resolve their host.
pub async fn create_housing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateHousingRequest>,
) -> ApiResult<impl IntoResponse> {
    let title = req.title.trim().to_string();
    let address = req.address.trim().to_string();
    if title.is_empty() || address.is_empty() {
        return Err(ApiError::bad_request("title and address are required"));
    }
    let external_key = req
        .external_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    let housing = Housing {
        id: HousingId::new(),
        owner_id: claims.sub,
        title,
        address,
        external_key,
    };

    let db = state.db.clone();
    let id = housing.id;
    blocking(move || {
        if let Some(key) = &housing.external_key {
            if db.get_housing_by_external_key(key)?.is_some() {
                return Err(ApiError::conflict("external key already registered"));
            }
        }
        db.insert_housing(&housing)?;
        info!("Housing {} registered by {}", housing.id, housing.owner_id);
        Ok(())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(CreateHousingResponse { id })))
}
