use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;

use super::password::{HashedPassword, PasswordError};

/// Role id handed to self-registered accounts.
pub const DEFAULT_ROLE_ID: i64 = 1;

/// Minimum role level for administrative routes.
pub const ADMIN_LEVEL: i64 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("invalid credentials")]
    Unauthorized,
    #[error("database operation timed out")]
    Timeout,
    #[error(transparent)]
    Hashing(#[from] PasswordError),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict
            }
            other => StoreError::Database(other),
        }
    }
}

/// Authorization level; higher is more privileged.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub level: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub role_id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: HashedPassword,
    pub activated: bool,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

/// Account data accepted at registration. Always starts unactivated.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub role_id: i64,
    pub username: String,
    pub email: String,
    pub password: HashedPassword,
}

/// Flat row for `users JOIN roles`.
#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub role_id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
    pub created_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
    pub role_name: String,
    pub role_level: i64,
    pub role_description: Option<String>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            role_id: r.role_id,
            username: r.username,
            email: r.email,
            password: HashedPassword::from_stored(r.password_hash),
            activated: r.activated,
            role: Role {
                id: r.role_id,
                name: r.role_name,
                level: r.role_level,
                description: r.role_description,
            },
            created_at: r.created_at,
            last_login: r.last_login,
        }
    }
}
