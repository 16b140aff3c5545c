//! Redis store tests. These need a live server:
//!
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_store_tests -- --ignored`

use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;
use session_authority::pkce::PkceChallenge;
use session_authority::session::Session;
use session_authority::storage::{
    ChallengeStore, RedisChallengeStore, RedisSessionStore, SessionStore,
};
use session_authority::StoreError;
use uuid::Uuid;

async fn connection() -> ConnectionManager {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(url).unwrap();
    ConnectionManager::new(client).await.unwrap()
}

async fn pttl(conn: &mut ConnectionManager, key: &str) -> i64 {
    redis::cmd("PTTL").arg(key).query_async(conn).await.unwrap()
}

fn session(user_id: Uuid, refresh_ttl: Duration) -> Session {
    let now = Utc::now();
    Session {
        id: Uuid::new_v4(),
        user_id,
        tenant_id: Uuid::new_v4(),
        access_token: "a".to_string(),
        refresh_token: "r".to_string(),
        expires_at: now + Duration::minutes(1),
        refresh_expires_at: now + refresh_ttl,
        created_at: now,
        last_used_at: now,
        ip_address: None,
        user_agent: None,
    }
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_session_index_expires_with_newest_session() {
    let mut conn = connection().await;
    let store = RedisSessionStore::from_connection(conn.clone());
    let user = Uuid::new_v4();
    let index = format!("user_sessions:{}", user);

    store.insert(&session(user, Duration::seconds(60))).await.unwrap();
    let first = pttl(&mut conn, &index).await;
    assert!(first > 0 && first <= 60_000, "pttl {}", first);

    store.insert(&session(user, Duration::seconds(600))).await.unwrap();
    let extended = pttl(&mut conn, &index).await;
    assert!(extended > 60_000, "pttl {}", extended);

    // A shorter-lived session must not pull the index TTL back in.
    store.insert(&session(user, Duration::seconds(30))).await.unwrap();
    assert!(pttl(&mut conn, &index).await > 60_000);

    assert_eq!(store.list_for_user(user).await.unwrap().len(), 3);
    store.delete_for_user_except(user, None).await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_challenge_insert_sets_ttl_atomically() {
    let mut conn = connection().await;
    let store = RedisChallengeStore::from_connection(conn.clone());
    let now = Utc::now();
    let challenge = PkceChallenge {
        id: Uuid::new_v4(),
        code_challenge: "c".to_string(),
        code_verifier: "v".to_string(),
        user_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        expires_at: now + Duration::seconds(30),
        created_at: now,
        used: false,
    };
    let key = format!("pkce:{}", challenge.id);

    store.insert(&challenge).await.unwrap();
    let ttl = pttl(&mut conn, &key).await;
    assert!(ttl > 0 && ttl <= 30_000, "pttl {}", ttl);

    let err = store.insert(&challenge).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let now = Utc::now();
    assert!(store.get_active(challenge.id, now).await.unwrap().is_some());
    assert!(store.mark_used(challenge.id, now).await.unwrap());
    assert!(!store.mark_used(challenge.id, now).await.unwrap());
}
