use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use abode_engine::NewVisit;
use abode_types::api::{Claims, CreateVisitRequest, LinkReviewRequest, TransitionVisitRequest};
use abode_types::events::GatewayEvent;
use abode_types::models::Visit;
use abode_types::{HousingRef, UserId, VisitId};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, blocking};

pub async fn create_visit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateVisitRequest>,
) -> ApiResult<impl IntoResponse> {
    let housing = HousingRef::parse(&req.housing)
        .ok_or_else(|| ApiError::bad_request("housing is required"))?;

    let engine = state.engine.clone();
    let visit = blocking(move || {
        Ok(engine.visits.create_visit(NewVisit {
            housing,
            requester_id: claims.sub,
            scheduled_at: req.scheduled_at,
            notes: req.notes,
            contact_phone: req.contact_phone,
            documents: req.documents,
        })?)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(visit)))
}

pub async fn get_visit(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Visit>> {
    let engine = state.engine.clone();
    let visit = blocking(move || Ok(engine.visits.get_visit(&VisitId::from_uuid(visit_id), &claims.sub)?)).await?;
    Ok(Json(visit))
}

pub async fn transition_visit(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TransitionVisitRequest>,
) -> ApiResult<Json<Visit>> {
    let visit = state
        .engine
        .visits
        .transition_visit(&VisitId::from_uuid(visit_id), &claims.sub, req.role, req.status)
        .await?;

    announce(&state, &visit, claims.sub).await;
    Ok(Json(visit))
}

pub async fn validate_visit(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Visit>> {
    let visit = state
        .engine
        .visits
        .validate_visit(&VisitId::from_uuid(visit_id), &claims.sub)
        .await?;

    announce(&state, &visit, claims.sub).await;
    Ok(Json(visit))
}

pub async fn link_review(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LinkReviewRequest>,
) -> ApiResult<Json<Visit>> {
    let engine = state.engine.clone();
    let visit = blocking(move || {
        Ok(engine
            .visits
            .link_review(&VisitId::from_uuid(visit_id), &claims.sub, &req.review_id)?)
    })
    .await?;
    Ok(Json(visit))
}

/// Pushes a `VisitUpdate` to both parties' open gateway connections.
async fn announce(state: &AppState, visit: &Visit, actor_id: UserId) {
    let engine = state.engine.clone();
    let owned = visit.clone();
    let host = blocking(move || Ok(engine.chat.authorizer().resolve_host(&owned)))
        .await
        .ok()
        .flatten();
    let event = GatewayEvent::VisitUpdate {
        visit_id: visit.id,
        status: visit.status,
        actor_id,
    };
    for user in std::iter::once(visit.requester_id).chain(host) {
        state.sessions.send_to_user(user, event.clone()).await;
    }
}
