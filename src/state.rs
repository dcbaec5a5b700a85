use std::sync::Arc;
use std::time::Duration;

use crate::auth::invitations::InvitationManager;
use crate::auth::jwt::TokenService;
use crate::auth::password::CredentialHasher;
use crate::auth::repo::{PgUserRepository, UserRepository};
use crate::config::AppConfig;
use crate::db;
use crate::mail::{LogMailer, Mailer, RetryingMailer};

/// Shared, read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<TokenService>,
    pub hasher: CredentialHasher,
    pub invitations: InvitationManager,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        let users = Arc::new(PgUserRepository::new(pool, config.query_timeout()))
            as Arc<dyn UserRepository>;
        let mailer = Arc::new(RetryingMailer::new(
            LogMailer::new(config.mail.sender.clone()),
            config.mail.retries,
            Duration::from_millis(500),
        )) as Arc<dyn Mailer>;

        Self::from_parts(config, users, mailer)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepository>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenService::new(&config.jwt));
        let hasher = CredentialHasher::new(&config.hasher)?;
        let invitations = InvitationManager::new(users.clone(), config.invitation_ttl());
        Ok(Self {
            config,
            users,
            tokens,
            hasher,
            invitations,
            mailer,
        })
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state; returns the concrete repository and mailer so tests
    /// can inspect and steer them.
    pub(crate) fn fake() -> (
        Self,
        Arc<crate::auth::memory::MemoryUserRepository>,
        Arc<crate::mail::testing::RecordingMailer>,
    ) {
        let repo = Arc::new(crate::auth::memory::MemoryUserRepository::new());
        let mailer = Arc::new(crate::mail::testing::RecordingMailer::default());
        let state = Self::from_parts(
            Arc::new(crate::config::test_config()),
            repo.clone(),
            mailer.clone(),
        )
        .expect("test state");
        (state, repo, mailer)
    }
}
