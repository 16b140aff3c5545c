//! Session lifecycle: create, validate, refresh, switch tenant, revoke.
//!
//! A session is bound to one (user, tenant) pair and owns exactly one
//! access token and one refresh token. Refresh replaces the session with a
//! brand-new one; the old id and both of its tokens stop working.

use crate::config::TokenSettings;
use crate::directory::{self, User, UserDirectory};
use crate::error::{AuthError, TokenRejection};
use crate::jwt::{Claims, TokenCodec, TokenKind};
use crate::metrics;
use crate::session::model::{RequestMeta, Session};
use crate::storage::SessionStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn tokens_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

pub struct SessionService {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn UserDirectory>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionService {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn UserDirectory>,
        settings: &TokenSettings,
    ) -> Self {
        Self {
            codec,
            store,
            directory,
            access_ttl: settings.access_token_ttl,
            refresh_ttl: settings.refresh_token_ttl,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    /// Mint and persist a session for `user` in `tenant_id`.
    ///
    /// No grant check happens here; callers that accept a tenant from the
    /// outside go through [`SessionService::switch_tenant`] or check with
    /// [`directory::require_grant`] first.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyState`] if signing fails or
    /// [`AuthError::Store`] if the session cannot be persisted.
    pub async fn create_session(
        &self,
        user: &User,
        tenant_id: Uuid,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        let issuer = self.codec.issuer();
        let session_id = Uuid::new_v4();

        let claims = |kind, ttl| Claims::new(issuer, user.id, session_id, tenant_id, kind, ttl);
        let access = claims(TokenKind::Access, self.access_ttl);
        let refresh = claims(TokenKind::Refresh, self.refresh_ttl);
        let now = Utc::now();

        let session = Session {
            id: session_id,
            user_id: user.id,
            tenant_id,
            access_token: self.codec.sign(&access)?,
            refresh_token: self.codec.sign(&refresh)?,
            expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
            created_at: now,
            last_used_at: now,
            ip_address: meta.ip_address,
            user_agent: meta.user_agent,
        };

        if let Err(e) = self.store.insert(&session).await {
            metrics::record_session_operation("create", "error");
            return Err(e.into());
        }

        metrics::record_session_operation("create", "success");
        info!(
            session_id = %session.id,
            user_id = %user.id,
            tenant_id = %tenant_id,
            "Created session"
        );
        Ok(session)
    }

    /// Verify an access token against its stored session and mark the
    /// session used. This is the only access-token check in the crate.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenInvalid`] if the token fails verification or is not
    /// an access token, [`AuthError::Unauthorized`] if the session is gone or
    /// no longer holds this token, [`AuthError::SessionExpired`] past expiry.
    pub async fn validate(&self, access_token: &str) -> Result<Session, AuthError> {
        let claims = self.codec.parse_kind(access_token, TokenKind::Access)?;

        let mut session = self
            .store
            .get(claims.session_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if session.user_id != claims.user_id
            || session.tenant_id != claims.tenant_id
            || !tokens_match(access_token, &session.access_token)
        {
            warn!(session_id = %session.id, "Access token does not belong to its session");
            metrics::record_security_event("SESSION_TOKEN_MISMATCH");
            return Err(AuthError::Unauthorized);
        }

        let now = Utc::now();
        if session.is_expired_at(now) {
            return Err(AuthError::SessionExpired);
        }

        if !self.store.touch(session.id, now).await? {
            return Err(AuthError::Unauthorized);
        }
        session.last_used_at = now;
        Ok(session)
    }

    /// Exchange a refresh token for a new session in the same tenant.
    ///
    /// The old session is removed before the new one is minted, so the same
    /// refresh token cannot be spent twice.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] for any verification failure;
    /// [`AuthError::Store`] if persistence fails.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let result = self.refresh_inner(refresh_token).await;
        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::record_session_operation("refresh", status);
        result
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let claims = self
            .codec
            .parse_kind(refresh_token, TokenKind::Refresh)
            .map_err(|rejection| {
                debug!(reason = %rejection, "Refresh token rejected");
                AuthError::Unauthorized
            })?;

        let Some(old) = self.store.take(claims.session_id).await? else {
            warn!(
                session_id = %claims.session_id,
                user_id = %claims.user_id,
                "Refresh token for missing session, possible replay"
            );
            metrics::record_security_event("REFRESH_REPLAY");
            return Err(AuthError::Unauthorized);
        };

        // A mismatch means the stored session was issued a different token;
        // the taken session stays revoked.
        if old.user_id != claims.user_id
            || old.tenant_id != claims.tenant_id
            || !tokens_match(refresh_token, &old.refresh_token)
        {
            warn!(
                session_id = %old.id,
                user_id = %old.user_id,
                "Refresh token mismatch, session revoked"
            );
            metrics::record_security_event("REFRESH_TOKEN_MISMATCH");
            return Err(AuthError::Unauthorized);
        }

        let user = self
            .directory
            .get_user_by_id(old.user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let meta = RequestMeta {
            ip_address: old.ip_address,
            user_agent: old.user_agent,
        };
        let session = self.create_session(&user, old.tenant_id, meta).await?;

        info!(
            old_session_id = %old.id,
            session_id = %session.id,
            user_id = %user.id,
            "Refreshed session"
        );
        Ok(session)
    }

    /// Issue a session for another tenant the caller holds a grant for.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] if the user has no grant for `tenant_id`.
    pub async fn switch_tenant(
        &self,
        current: &Claims,
        tenant_id: Uuid,
        meta: RequestMeta,
    ) -> Result<Session, AuthError> {
        current
            .require_kind(TokenKind::Access)
            .map_err(AuthError::TokenInvalid)?;

        let access =
            directory::require_grant(self.directory.as_ref(), current.user_id, tenant_id).await?;
        let session = self.create_session(&access.user, tenant_id, meta).await?;

        info!(
            user_id = %current.user_id,
            from_tenant = %current.tenant_id,
            to_tenant = %tenant_id,
            "Switched tenant"
        );
        Ok(session)
    }

    /// Delete one session. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] on persistence failure.
    pub async fn revoke(&self, session_id: Uuid) -> Result<bool, AuthError> {
        let removed = self.store.delete(session_id).await?;
        if removed {
            metrics::record_session_operation("revoke", "success");
            info!(session_id = %session_id, "Revoked session");
        }
        Ok(removed)
    }

    /// Delete a session on behalf of `caller`, who must own it.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] if the session is missing or belongs to
    /// another user.
    pub async fn revoke_owned(&self, caller: &Claims, session_id: Uuid) -> Result<(), AuthError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if session.user_id != caller.user_id {
            warn!(
                user_id = %caller.user_id,
                session_id = %session_id,
                "Attempt to revoke another user's session"
            );
            metrics::record_security_event("FOREIGN_SESSION_REVOKE");
            return Err(AuthError::Unauthorized);
        }

        self.revoke(session_id).await?;
        Ok(())
    }

    /// Delete every session of `user_id` except `current_session_id`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] on persistence failure.
    pub async fn revoke_all(
        &self,
        user_id: Uuid,
        current_session_id: Uuid,
    ) -> Result<usize, AuthError> {
        let removed = self
            .store
            .delete_for_user_except(user_id, Some(current_session_id))
            .await?;

        metrics::record_session_operation("revoke_all", "success");
        info!(user_id = %user_id, removed, "Revoked other sessions");
        Ok(removed)
    }

    /// Revoke the session an access token belongs to.
    ///
    /// # Errors
    ///
    /// Whatever [`SessionService::validate`] returns for the token.
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let session = self.validate(access_token).await?;
        self.revoke(session.id).await?;
        Ok(())
    }

    /// Sessions of a user, newest first.
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] on persistence failure.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        Ok(self.store.list_for_user(user_id).await?)
    }

    /// Drop sessions that can no longer be refreshed.
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] on persistence failure.
    pub async fn prune_expired(&self) -> Result<usize, AuthError> {
        Ok(self.store.prune_expired(Utc::now()).await?)
    }

    /// Parse an access token without touching the store.
    ///
    /// Only for callers that need claims of a token already accepted by
    /// [`SessionService::validate`].
    ///
    /// # Errors
    ///
    /// The codec's [`TokenRejection`].
    pub fn access_claims(&self, access_token: &str) -> Result<Claims, TokenRejection> {
        self.codec.parse_kind(access_token, TokenKind::Access)
    }
}
