use crate::error::TokenRejection;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Which operations accept a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set carried by every session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    // Registered claims
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,

    pub user_id: Uuid,
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    #[serde(rename = "tokenType")]
    pub kind: TokenKind,
}

impl Claims {
    pub fn new(
        issuer: impl Into<String>,
        user_id: Uuid,
        session_id: Uuid,
        tenant_id: Uuid,
        kind: TokenKind,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        Claims {
            iss: issuer.into(),
            sub: user_id.to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
            user_id,
            session_id,
            tenant_id,
            kind,
        }
    }

    /// Reject the token unless it is of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenRejection::WrongKind`] on mismatch.
    pub fn require_kind(&self, kind: TokenKind) -> Result<(), TokenRejection> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(TokenRejection::WrongKind)
        }
    }

    /// `exp` as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp()
    }

    pub fn is_valid_at(&self, timestamp: i64) -> bool {
        timestamp >= self.iat && timestamp < self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: TokenKind) -> Claims {
        Claims::new(
            "identity-service",
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            kind,
            Duration::from_secs(900),
        )
    }

    #[test]
    fn test_claims_creation() {
        let claims = sample(TokenKind::Access);

        assert_eq!(claims.iss, "identity-service");
        assert_eq!(claims.sub, claims.user_id.to_string());
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(!claims.is_expired());
        assert!(claims.is_valid_at(claims.iat));
        assert!(!claims.is_valid_at(claims.exp));
    }

    #[test]
    fn test_wire_names() {
        let claims = sample(TokenKind::Refresh);
        let json = serde_json::to_value(&claims).unwrap();

        assert_eq!(json["tokenType"], "refresh");
        assert_eq!(json["userId"], claims.user_id.to_string());
        assert_eq!(json["sessionId"], claims.session_id.to_string());
        assert_eq!(json["tenantId"], claims.tenant_id.to_string());
        assert!(json.get("exp").is_some());
        assert!(json.get("jti").is_some());
    }

    #[test]
    fn test_refresh_is_not_access() {
        let refresh = sample(TokenKind::Refresh);
        assert_eq!(
            refresh.require_kind(TokenKind::Access),
            Err(TokenRejection::WrongKind)
        );
        assert!(refresh.require_kind(TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_expires_at_matches_exp() {
        let claims = sample(TokenKind::Access);
        assert_eq!(claims.expires_at().timestamp(), claims.exp);
    }
}
