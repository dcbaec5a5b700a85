use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use tracing::{error, warn};

use super::claims::Claims;
use super::jwt::TokenError;
use super::repo_types::{StoreError, User};
use crate::{error::AppError, state::AppState};

/// Identity resolved by the authorization chain: verified access-token
/// claims plus the live user record they name.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

/// JSON request body whose rejection is reported as a 400 `{"error": ..}`
/// instead of axum's plain-text response.
#[derive(Debug)]
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(AppJson(value))
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(header: Option<&str>) -> Result<&str, AppError> {
    let value = header.ok_or(AppError::MissingToken)?;
    if !value.starts_with("Bearer ") {
        return Err(AppError::MissingToken);
    }
    let parts: Vec<&str> = value.split("Bearer ").collect();
    match parts.as_slice() {
        [_, token] if !token.is_empty() && !token.contains(char::is_whitespace) => Ok(*token),
        _ => Err(AppError::MissingToken),
    }
}

pub fn require_level(auth: &AuthUser, level: i64) -> Result<(), AppError> {
    if auth.user.role.level < level {
        warn!(
            user_id = auth.user.id,
            level = auth.user.role.level,
            required = level,
            "insufficient role level"
        );
        return Err(AppError::Forbidden);
    }
    Ok(())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        let token = bearer_token(header).map_err(|e| {
            warn!("missing or malformed bearer token");
            e
        })?;

        let claims = state.tokens.verify_access(token).map_err(|e| {
            match &e {
                TokenError::Expired => warn!("expired access token"),
                TokenError::ClaimsMissing(claim) => warn!(%claim, "access token missing claim"),
                TokenError::Invalid => warn!("invalid access token"),
                TokenError::Signing(_) | TokenError::TtlOutOfRange => {
                    error!(error = %e, "unexpected token error")
                }
            }
            AppError::from(e)
        })?;

        let user = match state.users.get_by_id(claims.sub).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                warn!(user_id = claims.sub, "token subject no longer exists");
                return Err(AppError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(AuthUser { user, claims })
    }
}

/// Authenticated identity whose role level is at least `LEVEL`. Use in a
/// handler signature to gate that route only.
#[derive(Debug, Clone)]
pub struct RequireLevel<const LEVEL: i64>(pub AuthUser);

#[async_trait]
impl<const LEVEL: i64> FromRequestParts<AppState> for RequireLevel<LEVEL> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        require_level(&auth, LEVEL)?;
        Ok(RequireLevel(auth))
    }
}
