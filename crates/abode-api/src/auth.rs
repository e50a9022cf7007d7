use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;

use abode_db::Database;
use abode_engine::Engine;
use abode_gateway::SessionTable;
use abode_types::UserId;
use abode_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::{ApiError, ApiResult, blocking};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: Arc<Engine>,
    pub sessions: SessionTable,
    pub jwt_secret: String,
}

const TOKEN_LIFETIME_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::bad_request("username must be 3 to 32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }
    let display_name = match req.display_name.trim() {
        "" => username.clone(),
        name => name.to_string(),
    };
    let contact = req
        .contact
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let user_id = UserId::new();
    let db = state.db.clone();
    let name = username.clone();
    blocking(move || {
        if db.get_user_by_username(&name)?.is_some() {
            return Err(ApiError::conflict("username already taken"));
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))?
            .to_string();

        db.create_user(&user_id, &name, &password_hash, &display_name, contact.as_deref())?;
        Ok(())
    })
    .await?;

    info!("Registered user {} ({})", username, user_id);
    let token = create_token(&state.jwt_secret, user_id, &username)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let db = state.db.clone();
    let (user_id, username) = blocking(move || {
        let user = db
            .get_user_by_username(req.username.trim())?
            .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|_| ApiError::internal("stored password hash is unreadable"))?;
        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::unauthorized("invalid credentials"))?;

        let user_id: UserId = user
            .id
            .parse()
            .map_err(|_| ApiError::internal("stored user id is malformed"))?;
        Ok((user_id, user.username))
    })
    .await?;

    let token = create_token(&state.jwt_secret, user_id, &username)?;
    Ok(Json(LoginResponse {
        user_id,
        username,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: UserId, username: &str) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("token signing failed: {e}")))
}
