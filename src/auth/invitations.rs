use std::sync::Arc;

use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use super::repo::UserRepository;
use super::repo_types::{NewUser, StoreError, User};

/// Fresh plaintext invitation token: 32 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex SHA-256 of the plaintext token; the only form ever persisted.
pub fn hash_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// Ties account creation to a hashed, time-bounded invitation and consumes
/// invitations on activation.
#[derive(Clone)]
pub struct InvitationManager {
    users: Arc<dyn UserRepository>,
    ttl: Duration,
}

impl InvitationManager {
    pub fn new(users: Arc<dyn UserRepository>, ttl: Duration) -> Self {
        Self { users, ttl }
    }

    pub async fn create_and_invite(
        &self,
        user: NewUser,
        plaintext_token: &str,
    ) -> Result<User, StoreError> {
        let expires_at = OffsetDateTime::now_utc() + self.ttl;
        let created = self
            .users
            .create_and_invite(user, &hash_token(plaintext_token), expires_at)
            .await?;
        info!(user_id = created.id, %expires_at, "invitation issued");
        Ok(created)
    }

    /// Expired and unknown tokens both yield `NotFound`.
    pub async fn activate(&self, plaintext_token: &str) -> Result<i64, StoreError> {
        match self
            .users
            .activate(&hash_token(plaintext_token), OffsetDateTime::now_utc())
            .await
        {
            Ok(user_id) => {
                info!(user_id, "account activated");
                Ok(user_id)
            }
            Err(StoreError::NotFound) => {
                warn!("activation with unknown or expired token");
                Err(StoreError::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}
