//! Single-use, time-boxed challenge exchange.
//!
//! After an OAuth callback the server stores a challenge for the resolved
//! (user, tenant) and sends its id and verifier through the browser
//! redirect. The frontend posts both back; a matching verifier on an
//! unused, unexpired challenge yields a session. Both opaque values are
//! server-generated, so anyone who sees the redirect can redeem it once.

use crate::error::AuthError;
use crate::metrics;
use crate::pkce::generator::OpaqueGenerator;
use crate::pkce::model::PkceChallenge;
use crate::session::{RequestMeta, Session, SessionService};
use crate::storage::ChallengeStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub struct PkceChallengeService {
    store: Arc<dyn ChallengeStore>,
    sessions: Arc<SessionService>,
    ttl: Duration,
}

impl PkceChallengeService {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        sessions: Arc<SessionService>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            ttl,
        }
    }

    /// Persist a fresh unused challenge for (user, tenant).
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] if the record cannot be persisted.
    pub async fn create_challenge(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<PkceChallenge, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AuthError::config(format!("challenge ttl: {}", e)))?;

        let challenge = PkceChallenge {
            id: Uuid::new_v4(),
            code_challenge: OpaqueGenerator::generate(),
            code_verifier: OpaqueGenerator::generate(),
            user_id,
            tenant_id,
            expires_at: now + ttl,
            created_at: now,
            used: false,
        };

        self.store.insert(&challenge).await?;
        metrics::record_pkce_operation("create", "success");
        info!(
            challenge_id = %challenge.id,
            user_id = %user_id,
            tenant_id = %tenant_id,
            "Created PKCE challenge"
        );
        Ok(challenge)
    }

    /// The challenge if it is still redeemable.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeInvalid`] if it is missing, used or expired.
    pub async fn get_challenge(&self, id: Uuid) -> Result<PkceChallenge, AuthError> {
        self.store
            .get_active(id, Utc::now())
            .await?
            .ok_or(AuthError::ChallengeInvalid)
    }

    /// Spend the challenge. Succeeds for exactly one caller.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeInvalid`] if it was already spent or expired.
    pub async fn mark_used(&self, id: Uuid) -> Result<(), AuthError> {
        if self.store.mark_used(id, Utc::now()).await? {
            Ok(())
        } else {
            Err(AuthError::ChallengeInvalid)
        }
    }

    /// Exchange `(id, verifier)` for a session.
    ///
    /// The challenge is spent before the session is minted, so a concurrent
    /// second redemption loses the compare-and-set even if it passed the
    /// fetch. A failure after that point leaves the challenge spent.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeInvalid`] for a missing, used or expired
    /// challenge, [`AuthError::VerifierMismatch`] for a wrong verifier,
    /// [`AuthError::Unauthorized`] if the user no longer exists.
    pub async fn redeem(
        &self,
        id: Uuid,
        verifier: &str,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        let result = self.redeem_inner(id, verifier, meta).await;
        let status = match &result {
            Ok(_) => "success",
            Err(AuthError::VerifierMismatch) => "verifier_mismatch",
            Err(AuthError::ChallengeInvalid) => "invalid",
            Err(_) => "error",
        };
        metrics::record_pkce_operation("redeem", status);
        result
    }

    async fn redeem_inner(
        &self,
        id: Uuid,
        verifier: &str,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        let challenge = self.get_challenge(id).await?;

        if !OpaqueGenerator::verify(verifier, &challenge.code_verifier) {
            warn!(challenge_id = %id, "PKCE verifier mismatch");
            metrics::record_security_event("PKCE_VERIFIER_MISMATCH");
            return Err(AuthError::VerifierMismatch);
        }

        if let Err(e) = self.mark_used(id).await {
            warn!(challenge_id = %id, "PKCE challenge redeemed concurrently");
            metrics::record_security_event("PKCE_REPLAY");
            return Err(e);
        }

        let user = self
            .sessions
            .directory()
            .get_user_by_id(challenge.user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let session = self
            .sessions
            .create_session(&user, challenge.tenant_id, meta)
            .await?;

        info!(
            challenge_id = %id,
            session_id = %session.id,
            user_id = %user.id,
            "Redeemed PKCE challenge"
        );
        Ok(session)
    }

    /// Drop expired challenges. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] on persistence failure.
    pub async fn prune_expired(&self) -> Result<usize, AuthError> {
        Ok(self.store.prune_expired(Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySettings, TokenSettings};
    use crate::directory::{InMemoryDirectory, TenantKind, User};
    use crate::jwt::TokenCodec;
    use crate::keys::KeyManager;
    use crate::storage::{InMemoryChallengeStore, InMemorySessionStore};
    use once_cell::sync::Lazy;

    static KEYS: Lazy<Arc<KeyManager>> =
        Lazy::new(|| Arc::new(KeyManager::new(KeySettings::default()).unwrap()));

    fn service(ttl: Duration) -> (PkceChallengeService, Arc<InMemoryDirectory>, User, Uuid) {
        let directory = Arc::new(InMemoryDirectory::new());
        let user = directory.add_user("ada@example.com", "Ada");
        let tenant = directory.add_tenant("ada", TenantKind::Personal);
        directory.grant(user.id, tenant.id, &["owner"]);

        let sessions = Arc::new(SessionService::new(
            TokenCodec::new(Arc::clone(&KEYS), "identity-service"),
            Arc::new(InMemorySessionStore::new()),
            directory.clone(),
            &TokenSettings::default(),
        ));
        let service =
            PkceChallengeService::new(Arc::new(InMemoryChallengeStore::new()), sessions, ttl);
        (service, directory, user, tenant.id)
    }

    #[tokio::test]
    async fn test_redeem_issues_session_for_challenge_tenant() {
        let (service, _, user, tenant_id) = service(Duration::from_secs(300));
        let challenge = service.create_challenge(user.id, tenant_id).await.unwrap();
        assert_ne!(challenge.code_challenge, challenge.code_verifier);

        let session = service
            .redeem(challenge.id, &challenge.code_verifier, RequestMeta::default())
            .await
            .unwrap();

        assert_eq!(session.user_id, user.id);
        assert_eq!(session.tenant_id, tenant_id);
    }

    #[tokio::test]
    async fn test_wrong_verifier_does_not_spend_challenge() {
        let (service, _, user, tenant_id) = service(Duration::from_secs(300));
        let challenge = service.create_challenge(user.id, tenant_id).await.unwrap();

        let err = service
            .redeem(challenge.id, "guess", RequestMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::VerifierMismatch));

        assert!(service
            .redeem(challenge.id, &challenge.code_verifier, RequestMeta::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_second_redeem_is_invalid() {
        let (service, _, user, tenant_id) = service(Duration::from_secs(300));
        let challenge = service.create_challenge(user.id, tenant_id).await.unwrap();

        service
            .redeem(challenge.id, &challenge.code_verifier, RequestMeta::default())
            .await
            .unwrap();
        let err = service
            .redeem(challenge.id, &challenge.code_verifier, RequestMeta::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ChallengeInvalid));
        assert!(matches!(
            service.get_challenge(challenge.id).await,
            Err(AuthError::ChallengeInvalid)
        ));
    }

    #[tokio::test]
    async fn test_unknown_challenge_is_invalid() {
        let (service, _, _, _) = service(Duration::from_secs(300));
        let err = service
            .redeem(Uuid::new_v4(), "anything", RequestMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ChallengeInvalid));
    }

    #[tokio::test]
    async fn test_removed_user_cannot_redeem() {
        let (service, directory, user, tenant_id) = service(Duration::from_secs(300));
        let challenge = service.create_challenge(user.id, tenant_id).await.unwrap();
        directory.remove_user(user.id);

        let err = service
            .redeem(challenge.id, &challenge.code_verifier, RequestMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn test_prune_removes_expired() {
        let (service, _, user, tenant_id) = service(Duration::from_millis(20));
        service.create_challenge(user.id, tenant_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.prune_expired().await.unwrap(), 1);
    }
}
