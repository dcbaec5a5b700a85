//! In-memory `UserRepository` for tests. Multi-step operations validate every
//! step before touching shared state, so a failing step leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::repo::UserRepository;
use super::repo_types::{NewUser, Role, StoreError, User};

struct Invitation {
    token_hash: String,
    expires_at: OffsetDateTime,
}

struct Inner {
    roles: HashMap<i64, Role>,
    users: BTreeMap<i64, User>,
    invitations: HashMap<i64, Invitation>,
    next_id: i64,
}

pub struct MemoryUserRepository {
    inner: Mutex<Inner>,
    fail_invitation_writes: AtomicBool,
}

fn seed_roles() -> HashMap<i64, Role> {
    [(1, "user", "Regular account"), (2, "moderator", "Moderates content"), (3, "admin", "Full access")]
        .into_iter()
        .map(|(level, name, desc)| {
            (
                level,
                Role {
                    id: level,
                    name: name.into(),
                    level,
                    description: Some(desc.into()),
                },
            )
        })
        .collect()
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                roles: seed_roles(),
                users: BTreeMap::new(),
                invitations: HashMap::new(),
                next_id: 1,
            }),
            fail_invitation_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent invitation insert fail.
    pub fn fail_invitation_writes(&self, fail: bool) {
        self.fail_invitation_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn user_count(&self) -> usize {
        self.inner.lock().await.users.len()
    }

    pub async fn invitation_count(&self) -> usize {
        self.inner.lock().await.invitations.len()
    }

    pub async fn stored_token_hash(&self, user_id: i64) -> Option<String> {
        self.inner
            .lock()
            .await
            .invitations
            .get(&user_id)
            .map(|i| i.token_hash.clone())
    }

    pub async fn set_role(&self, user_id: i64, role_id: i64) {
        let mut inner = self.inner.lock().await;
        let role = inner.roles.get(&role_id).cloned().expect("seeded role");
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.role_id = role_id;
            user.role = role;
        }
    }

    fn build_user(inner: &Inner, user: NewUser) -> Result<User, StoreError> {
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict);
        }
        let role = inner
            .roles
            .get(&user.role_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        Ok(User {
            id: inner.next_id,
            role_id: user.role_id,
            username: user.username,
            email: user.email,
            password: user.password,
            activated: false,
            role,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        })
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.inner
            .lock()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.inner
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let created = Self::build_user(&inner, user)?;
        inner.next_id += 1;
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::Conflict);
        }
        let stored = inner.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        stored.username = user.username.clone();
        stored.email = user.email.clone();
        stored.password = user.password.clone();
        stored.activated = stored.activated || user.activated;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.users.remove(&id).ok_or(StoreError::NotFound)?;
        inner.invitations.remove(&id);
        Ok(())
    }

    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let created = Self::build_user(&inner, user)?;
        if self.fail_invitation_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "invitation insert rejected".into(),
            )));
        }
        inner.next_id += 1;
        inner.users.insert(created.id, created.clone());
        inner.invitations.insert(
            created.id,
            Invitation {
                token_hash: token_hash.to_string(),
                expires_at,
            },
        );
        Ok(created)
    }

    async fn activate(&self, token_hash: &str, now: OffsetDateTime) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        let user_id = inner
            .invitations
            .iter()
            .find(|(_, inv)| inv.token_hash == token_hash && inv.expires_at > now)
            .map(|(id, _)| *id)
            .ok_or(StoreError::NotFound)?;
        let user = inner.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.activated = true;
        inner.invitations.remove(&user_id);
        Ok(user_id)
    }
}
