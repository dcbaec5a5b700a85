use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use super::{
    dto::{
        ActivationRequest, ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterRequest,
        RegisteredUser, TokenPair,
    },
    extractors::{AppJson, AuthUser, RequireLevel},
    repo_types::{User, ADMIN_LEVEL},
    services,
};
use crate::{error::AppError, state::AppState};

pub fn token_routes() -> Router<AppState> {
    Router::new()
        .route("/tokens/authentication", post(login))
        .route("/tokens/refresh", post(refresh))
        .route("/tokens/activate", put(activate))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/me", get(get_me))
        .route("/users/me/password", put(change_password))
        .route("/users/:id", get(get_user).delete(delete_user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisteredUser>), AppError> {
    let registered = services::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

#[instrument(skip(state, payload))]
pub async fn activate(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ActivationRequest>,
) -> Result<StatusCode, AppError> {
    services::activate(&state, &payload.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<(StatusCode, Json<TokenPair>), AppError> {
    let pair = services::login(&state, &payload.email, &payload.password).await?;
    Ok((StatusCode::CREATED, Json(pair)))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> Result<(StatusCode, Json<TokenPair>), AppError> {
    let pair = services::refresh(&state, &payload.refresh_token).await?;
    Ok((StatusCode::CREATED, Json(pair)))
}

#[instrument(skip_all)]
pub async fn get_me(auth: AuthUser) -> Json<User> {
    Json(auth.user)
}

#[instrument(skip(state, auth, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    services::change_password(&state, auth, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    _admin: RequireLevel<{ ADMIN_LEVEL }>,
    Path(id): Path<i64>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get_by_id(id).await?))
}

#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: RequireLevel<{ ADMIN_LEVEL }>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.users.delete(id).await?;
    info!(user_id = id, by = admin.0.user.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
