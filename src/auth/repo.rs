use std::{future::Future, time::Duration};

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::warn;

use super::password::{CredentialHasher, PasswordError};
use super::repo_types::{NewUser, StoreError, User, UserRow};

/// Persistence for accounts and their invitations.
///
/// `get_by_id` is the single identity-resolution entry point used by the
/// authorization chain; `verify_credentials` is the single credential check
/// used by login.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    /// Persists username, email, credential and activation. Activation is
    /// monotonic: an update can set it but never clear it.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<(), StoreError>;

    /// Inserts the user and its invitation in one transaction.
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<User, StoreError>;

    /// Consumes the unexpired invitation matching `token_hash`, activating its
    /// owner. Returns the owner's id.
    async fn activate(&self, token_hash: &str, now: OffsetDateTime) -> Result<i64, StoreError>;

    /// Unknown email and wrong password both come back as `Unauthorized`.
    async fn verify_credentials(
        &self,
        hasher: &CredentialHasher,
        email: &str,
        password: &str,
    ) -> Result<User, StoreError> {
        let user = match self.get_by_email(email).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                warn!(%email, "login unknown email");
                return Err(StoreError::Unauthorized);
            }
            Err(e) => return Err(e),
        };
        match hasher.verify(&user.password, password) {
            Ok(()) => Ok(user),
            Err(PasswordError::Mismatch) => {
                warn!(user_id = user.id, "login invalid password");
                Err(StoreError::Unauthorized)
            }
            Err(e) => Err(e.into()),
        }
    }
}

const SELECT_USER: &str = r#"
    SELECT u.id, u.role_id, u.username, u.email, u.password_hash, u.activated,
           u.created_at, u.last_login,
           r.name AS role_name, r.level AS role_level, r.description AS role_description
    FROM users u
    INNER JOIN roles r ON r.id = u.role_id
"#;

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
    timeout: Duration,
}

impl PgUserRepository {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Runs `fut` under the per-query timeout. A transaction still open when
    /// the timer fires is dropped, which rolls it back.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(timeout = ?self.timeout, "database operation timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.bounded(async {
            let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.id = $1"))
                .bind(id)
                .fetch_one(&self.db)
                .await?;
            Ok(row.into())
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.bounded(async {
            let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.email = $1"))
                .bind(email)
                .fetch_one(&self.db)
                .await?;
            Ok(row.into())
        })
        .await
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        self.bounded(async {
            let mut tx = self.db.begin().await?;
            let id = insert_user_tx(&mut tx, &user).await?;
            let created = fetch_user_tx(&mut tx, id).await?;
            tx.commit().await?;
            Ok(created)
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        self.bounded(async {
            let res = sqlx::query(
                r#"
                UPDATE users
                SET username = $2, email = $3, password_hash = $4, activated = activated OR $5
                WHERE id = $1
                "#,
            )
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.password.as_str())
            .bind(user.activated)
            .execute(&self.db)
            .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.bounded(async {
            // Invitations go with the user (ON DELETE CASCADE).
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.db)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<(), StoreError> {
        self.bounded(async {
            let res = sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.db)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<User, StoreError> {
        self.bounded(async {
            let mut tx = self.db.begin().await?;
            let id = insert_user_tx(&mut tx, &user).await?;
            save_invitation_tx(&mut tx, id, token_hash, expires_at).await?;
            let created = fetch_user_tx(&mut tx, id).await?;
            tx.commit().await?;
            Ok(created)
        })
        .await
    }

    async fn activate(&self, token_hash: &str, now: OffsetDateTime) -> Result<i64, StoreError> {
        self.bounded(async {
            let mut tx = self.db.begin().await?;
            let (user_id, _activated) = find_invitation_by_hash_tx(&mut tx, token_hash, now).await?;
            set_activated_tx(&mut tx, user_id).await?;
            delete_invitation_tx(&mut tx, user_id).await?;
            tx.commit().await?;
            Ok(user_id)
        })
        .await
    }
}

// ---- Transaction-scoped statements ----

async fn insert_user_tx(
    tx: &mut Transaction<'_, Postgres>,
    user: &NewUser,
) -> Result<i64, StoreError> {
    let (id,) = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO users (role_id, username, email, password_hash)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user.role_id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(user.password.as_str())
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn fetch_user_tx(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<User, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.id = $1"))
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.into())
}

/// Stores a hashed invitation token, replacing any earlier one for the user.
async fn save_invitation_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    token_hash: &str,
    expires_at: OffsetDateTime,
) -> Result<(), StoreError> {
    delete_invitation_tx(tx, user_id).await?;
    sqlx::query(
        r#"
        INSERT INTO user_invitations (user_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Locks the matching invitation so that a concurrent activation of the same
/// token waits and then finds nothing.
async fn find_invitation_by_hash_tx(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &str,
    now: OffsetDateTime,
) -> Result<(i64, bool), StoreError> {
    let row = sqlx::query_as::<_, (i64, bool)>(
        r#"
        SELECT u.id, u.activated
        FROM users u
        INNER JOIN user_invitations i ON i.user_id = u.id
        WHERE i.token_hash = $1 AND i.expires_at > $2
        FOR UPDATE
        "#,
    )
    .bind(token_hash)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

async fn set_activated_tx(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> Result<(), StoreError> {
    let res = sqlx::query("UPDATE users SET activated = TRUE WHERE id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

async fn delete_invitation_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
