//! Redis-backed stores.
//!
//! Sessions live as JSON under `session:{id}` with a per-user index set
//! `user_sessions:{user_id}`. Challenges are hashes under `pkce:{id}` with a
//! `record` field and a `used` flag; the flag is flipped by a Lua script so
//! concurrent redemptions cannot both succeed. Records expire with their
//! own TTL. The index set lives as long as the newest session it lists.

use super::{ChallengeStore, SessionStore};
use crate::error::StoreError;
use crate::pkce::PkceChallenge;
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

// Never shortens the index TTL; PTTL is -1 right after the first SADD.
const INDEX_SESSION_SCRIPT: &str = r"
redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if redis.call('PTTL', KEYS[1]) < ttl then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
";

const INSERT_CHALLENGE_SCRIPT: &str = r"
if redis.call('HSETNX', KEYS[1], 'record', ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'used', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
";

const MARK_USED_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'used') == '0' then
    redis.call('HSET', KEYS[1], 'used', '1')
    return 1
end
return 0
";

async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(redis_url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// Milliseconds until `until`, at least one so the key is never persistent.
fn ttl_millis(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((until - now).num_milliseconds()).unwrap_or(0).max(1)
}

fn session_key(id: Uuid) -> String {
    format!("session:{}", id)
}

fn user_sessions_key(user_id: Uuid) -> String {
    format!("user_sessions:{}", user_id)
}

fn challenge_key(id: Uuid) -> String {
    format!("pkce:{}", id)
}

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    index: redis::Script,
}

impl RedisSessionStore {
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if Redis cannot be reached.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_connection(connect(redis_url).await?))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            index: redis::Script::new(INDEX_SESSION_SCRIPT),
        }
    }

    async fn load(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(session_key(id)).await?;
        value
            .map(|v| serde_json::from_str(&v).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(session)?;
        let ttl = ttl_millis(session.refresh_expires_at, Utc::now());

        let created: Option<String> = redis::cmd("SET")
            .arg(session_key(session.id))
            .arg(&value)
            .arg("NX")
            .arg("PX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            return Err(StoreError::Conflict(format!("session {}", session.id)));
        }

        let _: i64 = self
            .index
            .key(user_sessions_key(session.user_id))
            .arg(session.id.to_string())
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        self.load(id).await
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(mut session) = self.load(id).await? else {
            return Ok(false);
        };
        session.last_used_at = at;

        // XX: a session taken by a concurrent refresh stays gone.
        let mut conn = self.conn.clone();
        let updated: Option<String> = redis::cmd("SET")
            .arg(session_key(id))
            .arg(serde_json::to_string(&session)?)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(updated.is_some())
    }

    async fn take(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(session_key(id))
            .query_async(&mut conn)
            .await?;

        let Some(value) = value else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&value)?;
        conn.srem::<_, _, ()>(user_sessions_key(session.user_id), id.to_string())
            .await?;
        Ok(Some(session))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.take(id).await?.is_some())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let index = user_sessions_key(user_id);
        let ids: Vec<String> = conn.smembers(&index).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for raw in ids {
            let loaded = match Uuid::parse_str(&raw) {
                Ok(id) => self.load(id).await?,
                Err(_) => None,
            };
            match loaded {
                Some(session) => sessions.push(session),
                // Expired by TTL; drop the stale index entry.
                None => conn.srem::<_, _, ()>(&index, &raw).await?,
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_for_user_except(
        &self,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<usize, StoreError> {
        let mut removed = 0;
        for session in self.list_for_user(user_id).await? {
            if Some(session.id) == keep {
                continue;
            }
            if self.take(session.id).await?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn prune_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        // Sessions and their index sets expire on their own.
        Ok(0)
    }
}

#[derive(Clone)]
pub struct RedisChallengeStore {
    conn: ConnectionManager,
    insert: redis::Script,
    mark_used: redis::Script,
}

impl RedisChallengeStore {
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if Redis cannot be reached.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_connection(connect(redis_url).await?))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            insert: redis::Script::new(INSERT_CHALLENGE_SCRIPT),
            mark_used: redis::Script::new(MARK_USED_SCRIPT),
        }
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn insert(&self, challenge: &PkceChallenge) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let record = serde_json::to_string(challenge)?;
        let used = if challenge.used { "1" } else { "0" };

        // Record, flag and TTL land together or not at all.
        let created: i64 = self
            .insert
            .key(challenge_key(challenge.id))
            .arg(record)
            .arg(used)
            .arg(ttl_millis(challenge.expires_at, Utc::now()))
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(StoreError::Conflict(format!("challenge {}", challenge.id)));
        }
        Ok(())
    }

    async fn get_active(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PkceChallenge>, StoreError> {
        let mut conn = self.conn.clone();
        let (record, used): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(challenge_key(id))
            .arg("record")
            .arg("used")
            .query_async(&mut conn)
            .await?;

        let (Some(record), Some(used)) = (record, used) else {
            return Ok(None);
        };
        let mut challenge: PkceChallenge = serde_json::from_str(&record)?;
        challenge.used = used != "0";

        Ok(challenge.is_redeemable_at(now).then_some(challenge))
    }

    async fn mark_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        // Key TTL tracks expires_at; re-check for the sub-millisecond window.
        if self.get_active(id, now).await?.is_none() {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let flipped: i64 = self
            .mark_used
            .key(challenge_key(id))
            .invoke_async(&mut conn)
            .await?;
        Ok(flipped == 1)
    }

    async fn prune_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        // Keys expire on their own.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(session_key(id), format!("session:{}", id));
        assert_eq!(user_sessions_key(id), format!("user_sessions:{}", id));
        assert_eq!(challenge_key(id), format!("pkce:{}", id));
    }

    #[test]
    fn test_ttl_never_zero() {
        let now = Utc::now();
        assert_eq!(ttl_millis(now - Duration::seconds(5), now), 1);
        assert_eq!(ttl_millis(now + Duration::seconds(2), now), 2000);
    }
}
