use axum::{Json, extract::State};
use serde::Serialize;

use abode_engine::DispatchReport;

use crate::auth::AppState;
use crate::error::ApiResult;

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    /// False when a periodic pass was already running; nothing was done.
    pub ran: bool,
    pub report: DispatchReport,
}

/// On-demand dispatch pass. Safe to call any time: delivered items are never resent.
pub async fn dispatch_now(State(state): State<AppState>) -> ApiResult<Json<DispatchResponse>> {
    let response = match state.engine.dispatch_due_reminders().await {
        Some(report) => DispatchResponse { ran: true, report },
        None => DispatchResponse {
            ran: false,
            report: DispatchReport::default(),
        },
    };
    Ok(Json(response))
}
