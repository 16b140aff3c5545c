//! Token issuance and verification on top of the [`KeyManager`].

use crate::error::{AuthError, TokenRejection};
use crate::jwt::claims::{Claims, TokenKind};
use crate::keys::KeyManager;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Signs and parses session tokens. Holds no key material of its own.
#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<KeyManager>,
    issuer: String,
}

impl TokenCodec {
    pub fn new(keys: Arc<KeyManager>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Build and sign a token for the given identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyState`] if signing fails.
    pub fn issue(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        tenant_id: Uuid,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let claims = Claims::new(self.issuer.clone(), user_id, session_id, tenant_id, kind, ttl);
        self.sign(&claims)
    }

    /// Sign a prepared claim set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyState`] if signing fails.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let token = self.keys.sign_token(claims)?;
        metrics::record_token_issued(claims.kind.as_str());
        Ok(token)
    }

    /// Verify signature, expiry and issuer.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenRejection`] for the first failed check.
    pub fn parse(&self, token: &str) -> Result<Claims, TokenRejection> {
        let result = self.keys.verify_token::<Claims>(token).and_then(|claims| {
            if claims.iss == self.issuer {
                Ok(claims)
            } else {
                Err(TokenRejection::Malformed)
            }
        });

        match &result {
            Ok(_) => metrics::record_token_verification("valid", ""),
            Err(rejection) => {
                debug!(reason = %rejection, "Token rejected");
                metrics::record_token_verification("invalid", rejection.as_str());
            }
        }
        result
    }

    /// [`TokenCodec::parse`] and require a token kind.
    ///
    /// # Errors
    ///
    /// Returns [`TokenRejection::WrongKind`] for the wrong kind, otherwise
    /// whatever `parse` returns.
    pub fn parse_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenRejection> {
        let claims = self.parse(token)?;
        claims.require_kind(kind)?;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeySettings;
    use once_cell::sync::Lazy;

    static KEYS: Lazy<Arc<KeyManager>> =
        Lazy::new(|| Arc::new(KeyManager::new(KeySettings::default()).unwrap()));

    fn codec() -> TokenCodec {
        TokenCodec::new(Arc::clone(&KEYS), "identity-service")
    }

    #[test]
    fn test_issue_and_parse() {
        let codec = codec();
        let (user, session, tenant) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let token = codec
            .issue(user, session, tenant, TokenKind::Access, Duration::from_secs(60))
            .unwrap();
        let claims = codec.parse(&token).unwrap();

        assert_eq!(claims.user_id, user);
        assert_eq!(claims.session_id, session);
        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn test_refresh_rejected_where_access_required() {
        let codec = codec();
        let token = codec
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Refresh,
                Duration::from_secs(60),
            )
            .unwrap();

        assert_eq!(
            codec.parse_kind(&token, TokenKind::Access),
            Err(TokenRejection::WrongKind)
        );
        assert!(codec.parse_kind(&token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let other = TokenCodec::new(Arc::clone(&KEYS), "someone-else");
        let token = other
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Access,
                Duration::from_secs(60),
            )
            .unwrap();

        assert_eq!(codec().parse(&token), Err(TokenRejection::Malformed));
    }

    #[test]
    fn test_tampered_payload_fails_signature() {
        let codec = codec();
        let token = codec
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                TokenKind::Access,
                Duration::from_secs(60),
            )
            .unwrap();

        let forged_claims = Claims::new(
            "identity-service",
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            TokenKind::Access,
            Duration::from_secs(60),
        );
        let forged_payload = {
            use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap())
        };

        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(codec.parse(&forged), Err(TokenRejection::SignatureInvalid));
    }
}
