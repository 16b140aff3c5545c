//! Persistence collaborators for sessions and PKCE challenges.
//!
//! Both stores are traits so the core can run against memory in tests and
//! Redis in deployment. The guarantees the services rely on:
//!
//! - [`SessionStore::insert`] fails with [`StoreError::Conflict`] on a duplicate id.
//! - [`SessionStore::take`] removes and returns a session atomically, so two
//!   concurrent refreshes cannot both obtain it.
//! - [`ChallengeStore::mark_used`] is a compare-and-set on the `used` flag;
//!   exactly one caller sees `true`.

pub mod memory;
pub mod redis;

use crate::error::StoreError;
use crate::pkce::PkceChallenge;
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::{InMemoryChallengeStore, InMemorySessionStore};
pub use self::redis::{RedisChallengeStore, RedisSessionStore};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    async fn insert(&self, session: &Session) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Set `last_used_at`. Returns false if the session is gone.
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Remove and return the session in one step.
    async fn take(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Returns true if a session was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError>;

    /// Remove every session of `user_id` except `keep`. Returns the count removed.
    async fn delete_for_user_except(
        &self,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<usize, StoreError>;

    /// Drop sessions whose refresh window closed before `now`. Returns the count removed.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn insert(&self, challenge: &PkceChallenge) -> Result<(), StoreError>;

    /// The challenge if it is unused and unexpired at `now`.
    async fn get_active(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PkceChallenge>, StoreError>;

    /// Flip `used` from false to true if the challenge is still unexpired
    /// at `now`. Only the first caller gets `true`.
    async fn mark_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Drop expired records. Returns the count removed.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
