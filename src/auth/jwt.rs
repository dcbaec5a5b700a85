use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, RawClaims, TokenKind};
use super::dto::TokenPair;
use crate::config::JwtConfig;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("missing claim: {0}")]
    ClaimsMissing(&'static str),
    #[error("token lifetime out of range")]
    TtlOutOfRange,
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Negative minutes clamp to zero.
fn minutes(m: i64) -> Duration {
    Duration::from_secs(u64::try_from(m).unwrap_or(0).saturating_mul(60))
}

/// Issues and verifies HS256 tokens. Holds only the shared secret and the
/// configured lifetimes, so it is safe to share across requests.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry and issuer are checked by hand after decoding so that each
        // failure maps to its own error kind.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
            issuer: cfg.issuer.clone(),
            access_ttl: minutes(cfg.ttl_minutes),
            refresh_ttl: minutes(cfg.refresh_ttl_minutes),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn sign(
        &self,
        user_id: i64,
        email: Option<&str>,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(secs))
            .ok_or(TokenError::TtlOutOfRange)?;
        let claims = Claims {
            jti: Uuid::now_v7().to_string(),
            iss: self.issuer.clone(),
            sub: user_id,
            email: email.map(str::to_owned),
            iat: now,
            exp,
            kind,
        };
        let token =
            encode(&Header::new(ALGORITHM), &claims, &self.encoding).map_err(TokenError::Signing)?;
        debug!(user_id, kind = ?kind, jti = %claims.jti, "jwt signed");
        Ok(token)
    }

    pub fn issue_access_token(
        &self,
        user_id: i64,
        email: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.sign(user_id, Some(email), TokenKind::Access, ttl)
    }

    pub fn issue_refresh_token(&self, user_id: i64, ttl: Duration) -> Result<String, TokenError> {
        self.sign(user_id, None, TokenKind::Refresh, ttl)
    }

    /// Access + refresh pair with the configured lifetimes.
    pub fn issue_pair(&self, user_id: i64, email: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(user_id, email, self.access_ttl)?,
            refresh_token: self.issue_refresh_token(user_id, self.refresh_ttl)?,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub(crate) fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let data = decode::<RawClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "jwt decode failed");
            TokenError::Invalid
        })?;
        let claims = data.claims.into_claims().map_err(TokenError::ClaimsMissing)?;
        if claims.iss != self.issuer {
            return Err(TokenError::Invalid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        debug!(user_id = claims.sub, kind = ?claims.kind, "jwt verified");
        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenKind::Refresh)
    }

    fn verify_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use serde_json::json;

    fn make_service(secret: &str, issuer: &str) -> TokenService {
        let mut cfg = test_config().jwt;
        cfg.secret = secret.into();
        cfg.issuer = issuer.into();
        TokenService::new(&cfg)
    }

    fn sign_raw(payload: serde_json::Value, alg: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(alg),
            &payload,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("encode")
    }

    #[test]
    fn sign_and_verify_access_token() {
        let svc = make_service("dev-secret", "test-issuer");
        let token = svc
            .issue_access_token(42, "alice@example.com", Duration::from_secs(60))
            .expect("sign access");
        let claims = svc.verify_access(&token).expect("verify token");
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 60);
        assert!(Uuid::parse_str(&claims.jti).is_ok());
    }

    #[test]
    fn refresh_token_has_no_email_and_refresh_kind() {
        let svc = make_service("dev-secret", "iss");
        let token = svc.issue_refresh_token(7, Duration::from_secs(600)).unwrap();
        let claims = svc.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, None);
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let svc = make_service("dev-secret", "iss");
        let pair = svc.issue_pair(1, "a@b.io").unwrap();
        assert!(matches!(svc.verify_refresh(&pair.access_token), Err(TokenError::Invalid)));
        assert!(matches!(svc.verify_access(&pair.refresh_token), Err(TokenError::Invalid)));
    }

    #[test]
    fn pair_uses_configured_lifetimes() {
        let svc = make_service("dev-secret", "iss");
        let pair = svc.issue_pair(1, "a@b.io").unwrap();
        let access = svc.verify(&pair.access_token).unwrap();
        let refresh = svc.verify(&pair.refresh_token).unwrap();
        assert_eq!((access.exp - access.iat) as u64, svc.access_ttl().as_secs());
        assert_eq!((refresh.exp - refresh.iat) as u64, svc.refresh_ttl().as_secs());
        assert!(svc.refresh_ttl() > svc.access_ttl());
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn expiry_boundary() {
        let svc = make_service("dev-secret", "iss");
        let token = svc
            .issue_access_token(42, "x@y.io", Duration::from_secs(30))
            .unwrap();
        let issued = svc.verify(&token).unwrap().iat;
        assert!(svc.verify_at(&token, issued + 29).is_ok());
        assert!(matches!(svc.verify_at(&token, issued + 30), Err(TokenError::Expired)));
        assert!(matches!(svc.verify_at(&token, issued + 3600), Err(TokenError::Expired)));
    }

    #[test]
    fn zero_ttl_token_is_already_expired() {
        let svc = make_service("dev-secret", "iss");
        let token = svc.issue_access_token(42, "x@y.io", Duration::ZERO).unwrap();
        assert!(matches!(svc.verify(&token), Err(TokenError::Expired)));
    }

    #[tokio::test]
    async fn short_lived_token_expires_after_waiting() {
        let svc = make_service("dev-secret", "iss");
        let token = svc
            .issue_access_token(42, "x@y.io", Duration::from_secs(1))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(svc.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn rejects_other_algorithms() {
        let svc = make_service("dev-secret", "iss");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let payload = json!({
            "jti": "x", "iss": "iss", "sub": 42, "iat": now, "exp": now + 600, "kind": "access"
        });
        for alg in [Algorithm::HS384, Algorithm::HS512] {
            let token = sign_raw(payload.clone(), alg, "dev-secret");
            assert!(matches!(svc.verify(&token), Err(TokenError::Invalid)));
        }
        // Sanity: the same payload under HS256 is accepted.
        let token = sign_raw(payload, Algorithm::HS256, "dev-secret");
        assert!(svc.verify(&token).is_ok());
    }

    #[test]
    fn rejects_unsigned_token() {
        let svc = make_service("dev-secret", "iss");
        // {"alg":"none","typ":"JWT"}.{"sub":42,...}.
        let token = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.\
                     eyJqdGkiOiJ4IiwiaXNzIjoiaXNzIiwic3ViIjo0MiwiaWF0IjoxLCJleHAiOjk5OTk5OTk5OTksImtpbmQiOiJhY2Nlc3MifQ.";
        assert!(matches!(svc.verify(token), Err(TokenError::Invalid)));
    }

    #[test]
    fn rejects_wrong_secret_and_wrong_issuer() {
        let good = make_service("same-secret", "good-iss");
        let other_secret = make_service("other-secret", "good-iss");
        let other_issuer = make_service("same-secret", "bad-iss");
        let token = good.issue_access_token(1, "a@b.io", Duration::from_secs(60)).unwrap();
        assert!(matches!(other_secret.verify(&token), Err(TokenError::Invalid)));
        assert!(matches!(other_issuer.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn rejects_tampered_and_malformed_tokens() {
        let svc = make_service("dev-secret", "iss");
        let mine = svc.issue_access_token(1, "a@b.io", Duration::from_secs(60)).unwrap();
        let admin = svc.issue_access_token(99, "root@b.io", Duration::from_secs(60)).unwrap();
        // Admin's payload under my signature.
        let mine_parts: Vec<&str> = mine.split('.').collect();
        let admin_parts: Vec<&str> = admin.split('.').collect();
        let spliced = format!("{}.{}.{}", mine_parts[0], admin_parts[1], mine_parts[2]);
        assert!(matches!(svc.verify(&spliced), Err(TokenError::Invalid)));
        assert!(matches!(svc.verify("garbage"), Err(TokenError::Invalid)));
        assert!(matches!(svc.verify(""), Err(TokenError::Invalid)));
    }

    #[test]
    fn missing_subject_is_reported() {
        let svc = make_service("dev-secret", "iss");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = sign_raw(
            json!({ "jti": "x", "iss": "iss", "iat": now, "exp": now + 600, "kind": "access" }),
            Algorithm::HS256,
            "dev-secret",
        );
        assert!(matches!(svc.verify(&token), Err(TokenError::ClaimsMissing("sub"))));
    }

    #[test]
    fn missing_expiry_is_reported() {
        let svc = make_service("dev-secret", "iss");
        let token = sign_raw(
            json!({ "jti": "x", "iss": "iss", "sub": 1, "iat": 1, "kind": "access" }),
            Algorithm::HS256,
            "dev-secret",
        );
        assert!(matches!(svc.verify(&token), Err(TokenError::ClaimsMissing("exp"))));
    }

    #[test]
    fn oversized_ttl_is_rejected_not_wrapped() {
        let svc = make_service("dev-secret", "test-issuer");
        for ttl in [Duration::from_secs(i64::MAX as u64), Duration::MAX] {
            assert!(matches!(
                svc.issue_access_token(1, "a@example.com", ttl),
                Err(TokenError::TtlOutOfRange)
            ));
        }
        let year = Duration::from_secs(365 * 24 * 3600);
        let token = svc.issue_refresh_token(1, year).unwrap();
        assert!(svc.verify_refresh(&token).is_ok());
    }

    #[test]
    fn unvalidated_lifetimes_do_not_overflow() {
        let mut cfg = test_config().jwt;
        cfg.ttl_minutes = -5;
        cfg.refresh_ttl_minutes = i64::MAX;
        let svc = TokenService::new(&cfg);
        assert_eq!(svc.access_ttl(), Duration::ZERO);
        assert_eq!(svc.refresh_ttl(), Duration::from_secs(u64::MAX));
    }
}
