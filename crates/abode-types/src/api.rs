use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{HousingId, UserId};
use crate::models::{ActorRole, Platform, VisitStatus};

// -- JWT Claims --

/// JWT claims shared across abode-api (REST middleware) and abode-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
}

// -- Housings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateHousingRequest {
    pub title: String,
    pub address: String,
    #[serde(default)]
    pub external_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateHousingResponse {
    pub id: HousingId,
}

// -- Visits --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateVisitRequest {
    /// Internal housing id or external listing key.
    pub housing: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionVisitRequest {
    pub role: ActorRole,
    pub status: VisitStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkReviewRequest {
    pub review_id: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

// -- Push --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterPushTokenRequest {
    pub platform: Platform,
    pub token: String,
}
