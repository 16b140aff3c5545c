//! Users, tenants and tenant grants as seen by the core.
//!
//! The directory itself is an external collaborator; the core only reads it.
//! [`require_grant`] is the one place tenant membership is decided, used by
//! both the request gateway and tenant switching.

use crate::error::{AuthError, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantKind {
    Personal,
    Team,
    Enterprise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kind: TenantKind,
}

/// A recorded right of a user to act within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantGrant {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_user_tenant_grants(&self, user_id: Uuid) -> Result<Vec<TenantGrant>, StoreError>;

    async fn get_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;
}

/// Identity resolved for a (user, tenant) pair that passed the grant check.
#[derive(Debug, Clone)]
pub struct TenantAccess {
    pub user: User,
    pub tenant: Tenant,
    pub grants: Vec<TenantGrant>,
}

/// Load the user and confirm a grant for `tenant_id`.
///
/// # Errors
///
/// [`AuthError::Unauthorized`] if the user or tenant is unknown or the user
/// holds no grant for the tenant; [`AuthError::Store`] on directory failure.
pub async fn require_grant(
    directory: &dyn UserDirectory,
    user_id: Uuid,
    tenant_id: Uuid,
) -> Result<TenantAccess, AuthError> {
    let user = directory
        .get_user_by_id(user_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    let grants = directory.get_user_tenant_grants(user_id).await?;
    if !grants.iter().any(|g| g.tenant_id == tenant_id) {
        warn!(user_id = %user_id, tenant_id = %tenant_id, "No grant for requested tenant");
        return Err(AuthError::Unauthorized);
    }

    let tenant = directory
        .get_tenant_by_id(tenant_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    Ok(TenantAccess {
        user,
        tenant,
        grants,
    })
}

/// The personal tenant among the user's grants.
///
/// # Errors
///
/// [`AuthError::Unauthorized`] if the user has none.
pub async fn personal_tenant(
    directory: &dyn UserDirectory,
    user_id: Uuid,
) -> Result<Tenant, AuthError> {
    for grant in directory.get_user_tenant_grants(user_id).await? {
        if let Some(tenant) = directory.get_tenant_by_id(grant.tenant_id).await? {
            if tenant.kind == TenantKind::Personal {
                return Ok(tenant);
            }
        }
    }
    Err(AuthError::Unauthorized)
}

/// Directory held in memory; for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<Uuid, User>>,
    tenants: RwLock<HashMap<Uuid, Tenant>>,
    grants: RwLock<Vec<TenantGrant>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, email: impl Into<String>, name: impl Into<String>) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.into(),
            name: name.into(),
        };
        self.users.write().insert(user.id, user.clone());
        user
    }

    pub fn remove_user(&self, user_id: Uuid) {
        self.users.write().remove(&user_id);
        self.grants.write().retain(|g| g.user_id != user_id);
    }

    pub fn add_tenant(&self, slug: impl Into<String>, kind: TenantKind) -> Tenant {
        let slug = slug.into();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: slug.clone(),
            slug,
            kind,
        };
        self.tenants.write().insert(tenant.id, tenant.clone());
        tenant
    }

    pub fn grant(&self, user_id: Uuid, tenant_id: Uuid, roles: &[&str]) {
        self.grants.write().push(TenantGrant {
            user_id,
            tenant_id,
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            permissions: Vec::new(),
        });
    }

    pub fn revoke_grant(&self, user_id: Uuid, tenant_id: Uuid) {
        self.grants
            .write()
            .retain(|g| !(g.user_id == user_id && g.tenant_id == tenant_id));
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn get_user_tenant_grants(&self, user_id: Uuid) -> Result<Vec<TenantGrant>, StoreError> {
        Ok(self
            .grants
            .read()
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.tenants.read().get(&id).cloned())
    }
}
