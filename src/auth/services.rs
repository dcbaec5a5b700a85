use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use super::dto::{RegisterRequest, RegisteredUser, TokenPair};
use super::extractors::AuthUser;
use super::invitations::generate_token;
use super::repo_types::{NewUser, StoreError, User, DEFAULT_ROLE_ID};
use crate::{error::AppError, mail::USER_INVITATION_TEMPLATE, state::AppState};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if !(8..=72).contains(&len) {
        return Err(AppError::BadRequest(
            "password must be between 8 and 72 characters".into(),
        ));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), AppError> {
    let len = username.trim().chars().count();
    if !(3..=50).contains(&len) {
        return Err(AppError::BadRequest(
            "username must be between 3 and 50 characters".into(),
        ));
    }
    Ok(())
}

/// Creates an unactivated account with an invitation and mails the token in
/// the background. Mail failures never fail registration.
pub async fn register(state: &AppState, payload: RegisterRequest) -> Result<RegisteredUser, AppError> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::BadRequest("invalid email".into()));
    }
    validate_username(&payload.username)?;
    validate_password(&payload.password)?;

    let password = state.hasher.hash(&payload.password)?;
    let new_user = NewUser {
        role_id: DEFAULT_ROLE_ID,
        username: payload.username.trim().to_string(),
        email,
        password,
    };

    let token = generate_token();
    let user = match state.invitations.create_and_invite(new_user, &token).await {
        Ok(u) => u,
        Err(StoreError::Conflict) => {
            warn!("email already registered");
            return Err(AppError::Conflict);
        }
        Err(e) => return Err(e.into()),
    };

    let mailer = state.mailer.clone();
    let recipient = user.email.clone();
    let data = json!({ "activationToken": token });
    tokio::spawn(async move {
        match mailer.send(&recipient, USER_INVITATION_TEMPLATE, &data).await {
            Ok(()) => info!(email = %recipient, "invitation email sent"),
            Err(e) => error!(error = ?e, email = %recipient, "sending invitation email failed"),
        }
    });

    info!(user_id = user.id, email = %user.email, "user registered");
    Ok(RegisteredUser { user, token })
}

pub async fn activate(state: &AppState, token: &str) -> Result<(), AppError> {
    state.invitations.activate(token).await?;
    Ok(())
}

/// Unknown email, wrong password and inactive account are indistinguishable.
pub async fn login(state: &AppState, email: &str, password: &str) -> Result<TokenPair, AppError> {
    let email = normalize_email(email);
    let user = state
        .users
        .verify_credentials(&state.hasher, &email, password)
        .await?;
    if !user.activated {
        warn!(user_id = user.id, "login before activation");
        return Err(AppError::Unauthorized);
    }

    let pair = state.tokens.issue_pair(user.id, &user.email)?;
    if let Err(e) = state.users.record_login(user.id, OffsetDateTime::now_utc()).await {
        warn!(error = %e, user_id = user.id, "recording last login failed");
    }
    info!(user_id = user.id, "user logged in");
    Ok(pair)
}

/// Exchanges a refresh token for a new pair. The subject must still exist.
pub async fn refresh(state: &AppState, refresh_token: &str) -> Result<TokenPair, AppError> {
    let claims = state.tokens.verify_refresh(refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::from(e)
    })?;
    let user: User = match state.users.get_by_id(claims.sub).await {
        Ok(u) => u,
        Err(StoreError::NotFound) => {
            warn!(user_id = claims.sub, "refresh for deleted user");
            return Err(AppError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };
    let pair = state.tokens.issue_pair(user.id, &user.email)?;
    info!(user_id = user.id, "tokens refreshed");
    Ok(pair)
}

pub async fn change_password(
    state: &AppState,
    auth: AuthUser,
    current: &str,
    new: &str,
) -> Result<(), AppError> {
    let mut user = auth.user;
    state.hasher.verify(&user.password, current).map_err(|e| {
        warn!(user_id = user.id, "password change with wrong current password");
        AppError::from(e)
    })?;
    validate_password(new)?;
    user.password = state.hasher.hash(new)?;
    state.users.update(&user).await?;
    info!(user_id = user.id, "password changed");
    Ok(())
}
