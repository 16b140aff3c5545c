//! The session authority as seen by the rest of the product.
//!
//! Wires the key manager, codec, session and challenge services and the
//! request gateway together, and owns the background tasks that keep them
//! healthy.

use crate::config::Config;
use crate::directory::{self, User, UserDirectory};
use crate::error::AuthError;
use crate::gateway::{AuthContext, AuthGateway};
use crate::jwt::TokenCodec;
use crate::keys::{Jwks, KeyManager, KeyRotator, RotationHealth, RotationStatus};
use crate::pkce::{PkceChallenge, PkceChallengeService};
use crate::session::{RequestMeta, Session, SessionService};
use crate::shutdown::ShutdownCoordinator;
use crate::storage::{ChallengeStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Redirect target handed to the browser after an OAuth callback.
#[derive(Debug, Clone)]
pub struct OAuthHandoff {
    pub challenge_id: Uuid,
    pub tenant_slug: String,
    pub redirect_url: Url,
}

pub struct SessionAuthority {
    keys: Arc<KeyManager>,
    rotation: Arc<RotationHealth>,
    sessions: Arc<SessionService>,
    challenges: Arc<PkceChallengeService>,
    gateway: AuthGateway,
    frontend_url: Url,
}

impl SessionAuthority {
    pub fn new(
        config: &Config,
        keys: Arc<KeyManager>,
        session_store: Arc<dyn SessionStore>,
        challenge_store: Arc<dyn ChallengeStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let codec = TokenCodec::new(Arc::clone(&keys), config.tokens.issuer.clone());
        let sessions = Arc::new(SessionService::new(
            codec,
            session_store,
            directory,
            &config.tokens,
        ));
        let challenges = Arc::new(PkceChallengeService::new(
            challenge_store,
            Arc::clone(&sessions),
            config.tokens.challenge_ttl,
        ));

        Self {
            keys,
            rotation: Arc::new(RotationHealth::new()),
            gateway: AuthGateway::new(Arc::clone(&sessions)),
            sessions,
            challenges,
            frontend_url: config.frontend_url.clone(),
        }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    pub fn challenges(&self) -> &Arc<PkceChallengeService> {
        &self.challenges
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    fn directory(&self) -> &dyn UserDirectory {
        self.sessions.directory().as_ref()
    }

    /// Issue a session after confirming the user's grant for `tenant_id`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] without a grant.
    pub async fn issue_session_for_user(
        &self,
        user: &User,
        tenant_id: Uuid,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        let access = directory::require_grant(self.directory(), user.id, tenant_id).await?;
        self.sessions.create_session(&access.user, tenant_id, meta).await
    }

    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] for any unusable refresh token.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.sessions.refresh(refresh_token).await
    }

    /// # Errors
    ///
    /// See [`SessionService::validate`].
    pub async fn validate_access_token(&self, access_token: &str) -> Result<Session, AuthError> {
        self.sessions.validate(access_token).await
    }

    /// Authenticate a request by its `Authorization` header.
    ///
    /// # Errors
    ///
    /// See [`AuthGateway::authenticate`].
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        self.gateway.authenticate(authorization).await
    }

    /// Move the caller to another tenant they hold a grant for.
    ///
    /// # Errors
    ///
    /// Token failures from validation, [`AuthError::Unauthorized`] without a grant.
    pub async fn switch_tenant(
        &self,
        access_token: &str,
        tenant_id: Uuid,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        self.sessions.validate(access_token).await?;
        let claims = self.sessions.access_claims(access_token)?;
        self.sessions.switch_tenant(&claims, tenant_id, meta).await
    }

    /// # Errors
    ///
    /// See [`SessionService::logout`].
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        self.sessions.logout(access_token).await
    }

    /// Sessions of the caller.
    ///
    /// # Errors
    ///
    /// Token failures from validation.
    pub async fn list_sessions(&self, access_token: &str) -> Result<Vec<Session>, AuthError> {
        let session = self.sessions.validate(access_token).await?;
        self.sessions.list(session.user_id).await
    }

    /// Revoke one of the caller's sessions.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] if the session belongs to someone else.
    pub async fn revoke_session(
        &self,
        access_token: &str,
        session_id: Uuid,
    ) -> Result<(), AuthError> {
        self.sessions.validate(access_token).await?;
        let claims = self.sessions.access_claims(access_token)?;
        self.sessions.revoke_owned(&claims, session_id).await
    }

    /// Revoke every session of the caller except the current one.
    ///
    /// # Errors
    ///
    /// Token failures from validation.
    pub async fn revoke_other_sessions(&self, access_token: &str) -> Result<usize, AuthError> {
        let session = self.sessions.validate(access_token).await?;
        self.sessions.revoke_all(session.user_id, session.id).await
    }

    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] if the user holds no grant for `tenant_id`.
    pub async fn create_pkce_challenge(
        &self,
        user: &User,
        tenant_id: Uuid,
    ) -> Result<PkceChallenge, AuthError> {
        directory::require_grant(self.directory(), user.id, tenant_id).await?;
        self.challenges.create_challenge(user.id, tenant_id).await
    }

    /// # Errors
    ///
    /// See [`PkceChallengeService::redeem`].
    pub async fn redeem_pkce_challenge(
        &self,
        challenge_id: Uuid,
        verifier: &str,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        self.challenges.redeem(challenge_id, verifier, meta).await
    }

    /// Create a challenge for the user's personal tenant and the frontend
    /// callback URL that carries it.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] if the user has no personal tenant,
    /// [`AuthError::Config`] if the frontend URL cannot take a path.
    pub async fn begin_oauth_handoff(&self, user_id: Uuid) -> Result<OAuthHandoff, AuthError> {
        let tenant = directory::personal_tenant(self.directory(), user_id).await?;
        let challenge = self.challenges.create_challenge(user_id, tenant.id).await?;

        let mut redirect_url = self.frontend_url.clone();
        redirect_url
            .path_segments_mut()
            .map_err(|()| AuthError::config("FRONTEND_URL cannot be a base URL"))?
            .pop_if_empty()
            .push(&tenant.slug)
            .push("callback");
        redirect_url
            .query_pairs_mut()
            .append_pair("code", &challenge.id.to_string())
            .append_pair("codeVerifier", &challenge.code_verifier);

        Ok(OAuthHandoff {
            challenge_id: challenge.id,
            tenant_slug: tenant.slug,
            redirect_url,
        })
    }

    /// # Errors
    ///
    /// [`AuthError::Internal`] if encoding fails.
    pub fn current_public_key_pem(&self) -> Result<String, AuthError> {
        self.keys.current_public_key_pem()
    }

    pub fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }

    pub fn rotation_status(&self) -> RotationStatus {
        self.rotation.snapshot()
    }

    /// Start key rotation and session and challenge pruning under `coordinator`.
    pub fn spawn_background_tasks(
        &self,
        coordinator: &mut ShutdownCoordinator,
        prune_interval: Duration,
    ) {
        let rotator = KeyRotator::new(Arc::clone(&self.keys), Arc::clone(&self.rotation));
        coordinator.spawn("key-rotation", rotator.run());

        let challenges = Arc::clone(&self.challenges);
        coordinator.spawn("challenge-prune", async move {
            let mut ticker = tokio::time::interval(prune_interval);
            loop {
                ticker.tick().await;
                match challenges.prune_expired().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Pruned expired PKCE challenges"),
                    Err(e) => warn!(error = %e, "Failed to prune PKCE challenges"),
                }
            }
        });

        let sessions = Arc::clone(&self.sessions);
        coordinator.spawn("session-prune", async move {
            let mut ticker = tokio::time::interval(prune_interval);
            loop {
                ticker.tick().await;
                match sessions.prune_expired().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Pruned expired sessions"),
                    Err(e) => warn!(error = %e, "Failed to prune sessions"),
                }
            }
        });
    }
}
