//! Request-time verification for protected operations.
//!
//! Every protected call goes: bearer extraction, then
//! [`SessionService::validate`] (signature, kind, expiry, stored session,
//! `last_used_at` touch), then the tenant grant check. Key state is only
//! read on this path.

use crate::directory::{self, Tenant, TenantGrant, User};
use crate::error::{AuthError, TokenRejection};
use crate::metrics;
use crate::session::{Session, SessionService};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const BEARER_PREFIX: &str = "Bearer ";

/// Pull the token out of an `Authorization` header value.
///
/// # Errors
///
/// [`AuthError::Unauthorized`] when the header is absent,
/// [`TokenRejection::Malformed`] when it is not a non-empty bearer token.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::Unauthorized)?;

    let scheme = header.get(..BEARER_PREFIX.len());
    let token = match scheme {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER_PREFIX) => {
            header[BEARER_PREFIX.len()..].trim()
        }
        _ => return Err(AuthError::TokenInvalid(TokenRejection::Malformed)),
    };
    if token.is_empty() {
        return Err(AuthError::TokenInvalid(TokenRejection::Malformed));
    }
    Ok(token)
}

/// Identity resolved for an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub tenant: Tenant,
    pub grants: Vec<TenantGrant>,
    pub session: Session,
}

impl AuthContext {
    /// Require the request to be bound to `tenant_id`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] for any other tenant.
    pub fn ensure_tenant(&self, tenant_id: Uuid) -> Result<(), AuthError> {
        if self.tenant.id == tenant_id {
            Ok(())
        } else {
            metrics::record_security_event("CROSS_TENANT_ACCESS");
            Err(AuthError::Unauthorized)
        }
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.grants
            .iter()
            .filter(move |g| g.tenant_id == self.tenant.id)
            .flat_map(|g| g.roles.iter().map(String::as_str))
    }
}

pub struct AuthGateway {
    sessions: Arc<SessionService>,
}

impl AuthGateway {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }

    /// Authenticate a request from its `Authorization` header.
    ///
    /// # Errors
    ///
    /// Any credential failure; see [`AuthError::is_credential_failure`].
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        let result = self.authenticate_inner(authorization).await;
        if let Err(e) = &result {
            debug!(code = e.code(), "Request rejected");
        }
        result
    }

    async fn authenticate_inner(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        let token = extract_bearer(authorization)?;
        let session = self.sessions.validate(token).await?;

        let access = directory::require_grant(
            self.sessions.directory().as_ref(),
            session.user_id,
            session.tenant_id,
        )
        .await?;

        Ok(AuthContext {
            user: access.user,
            tenant: access.tenant,
            grants: access.grants,
            session,
        })
    }

    /// Run `operation` only if the request authenticates.
    ///
    /// # Errors
    ///
    /// The authentication failure, or whatever `operation` returns.
    pub async fn protect<F, Fut, T>(
        &self,
        authorization: Option<&str>,
        operation: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let context = self.authenticate(authorization).await?;
        operation(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(extract_bearer(Some("bearer abc")).unwrap(), "abc");
    }

    #[test]
    fn test_extract_bearer_rejects_other_shapes() {
        assert!(matches!(extract_bearer(None), Err(AuthError::Unauthorized)));
        for header in ["", "Bearer", "Bearer   ", "Basic dXNlcjpwYXNz", "abc.def.ghi"] {
            assert!(
                matches!(
                    extract_bearer(Some(header)),
                    Err(AuthError::TokenInvalid(TokenRejection::Malformed))
                ),
                "accepted {:?}",
                header
            );
        }
    }
}
