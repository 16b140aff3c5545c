//! In-process stores for tests and single-node deployments without Redis.

use super::{ChallengeStore, SessionStore};
use crate::error::StoreError;
use crate::pkce::PkceChallenge;
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {}", session.id)));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.sessions.write().get_mut(&id) {
            Some(session) => {
                session.last_used_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.write().remove(&id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.sessions.write().remove(&id).is_some())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_for_user_except(
        &self,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, s| s.user_id != user_id || Some(*id) == keep);
        Ok(before - sessions.len())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_refreshable_at(now));
        Ok(before - sessions.len())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryChallengeStore {
    challenges: Mutex<HashMap<Uuid, PkceChallenge>>,
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.challenges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.lock().is_empty()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn insert(&self, challenge: &PkceChallenge) -> Result<(), StoreError> {
        let mut challenges = self.challenges.lock();
        if challenges.contains_key(&challenge.id) {
            return Err(StoreError::Conflict(format!("challenge {}", challenge.id)));
        }
        challenges.insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn get_active(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PkceChallenge>, StoreError> {
        Ok(self
            .challenges
            .lock()
            .get(&id)
            .filter(|c| c.is_redeemable_at(now))
            .cloned())
    }

    async fn mark_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.challenges.lock().get_mut(&id) {
            Some(challenge) if challenge.is_redeemable_at(now) => {
                challenge.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut challenges = self.challenges.lock();
        let before = challenges.len();
        challenges.retain(|_, c| !c.is_expired_at(now));
        Ok(before - challenges.len())
    }
}
