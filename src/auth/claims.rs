use serde::{Deserialize, Serialize};

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT payload as signed and as handed to downstream code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub jti: String, // token id, for audit trails
    pub iss: String,
    pub sub: i64, // user ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub kind: TokenKind,
}

/// Shape used when decoding: every field optional so that a missing claim is
/// reported by name instead of as a generic parse failure.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    pub jti: Option<String>,
    pub iss: Option<String>,
    pub sub: Option<i64>,
    pub email: Option<String>,
    pub iat: Option<i64>,
    pub exp: Option<i64>,
    pub kind: Option<TokenKind>,
}

impl RawClaims {
    pub(crate) fn into_claims(self) -> Result<Claims, &'static str> {
        Ok(Claims {
            jti: self.jti.ok_or("jti")?,
            iss: self.iss.ok_or("iss")?,
            sub: self.sub.ok_or("sub")?,
            email: self.email,
            iat: self.iat.ok_or("iat")?,
            exp: self.exp.ok_or("exp")?,
            kind: self.kind.ok_or("kind")?,
        })
    }
}
