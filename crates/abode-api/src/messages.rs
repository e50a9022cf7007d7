use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use abode_types::api::{Claims, MarkReadResponse, SendMessageRequest};
use abode_types::events::GatewayEvent;
use abode_types::models::Message;
use abode_types::VisitId;

use crate::auth::AppState;
use crate::error::{ApiResult, blocking};

pub async fn send_message(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let sent = state
        .engine
        .chat
        .send_message(&VisitId::from_uuid(visit_id), &claims.sub, req.content, req.attachments)
        .await?;

    if let Some(receiver) = sent.message.receiver_id.or(sent.notified) {
        state
            .sessions
            .send_to_user(
                receiver,
                GatewayEvent::MessageCreate {
                    message: sent.message.clone(),
                },
            )
            .await;
    }

    Ok((StatusCode::CREATED, Json(sent.message)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Message>>> {
    let engine = state.engine.clone();
    let messages = blocking(move || {
        Ok(engine
            .chat
            .list_messages(&VisitId::from_uuid(visit_id), &claims.sub)?)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MarkReadResponse>> {
    let visit_id = VisitId::from_uuid(visit_id);
    let engine = state.engine.clone();
    let reader = claims.sub;
    let receipt = blocking(move || Ok(engine.chat.mark_read(&visit_id, &reader)?)).await?;

    if receipt.updated > 0 {
        if let Some(counterparty) = receipt.counterparty {
            state
                .sessions
                .send_to_user(
                    counterparty,
                    GatewayEvent::MessagesRead {
                        visit_id,
                        reader_id: reader,
                    },
                )
                .await;
        }
    }

    Ok(Json(MarkReadResponse {
        updated: receipt.updated,
    }))
}
