use anyhow::Context;
use session_authority::directory::{InMemoryDirectory, UserDirectory};
use session_authority::keys::KeyManager;
use session_authority::shutdown::{wait_for_signal, ShutdownCoordinator};
use session_authority::storage::{
    ChallengeStore, InMemoryChallengeStore, InMemorySessionStore, RedisChallengeStore,
    RedisSessionStore, SessionStore,
};
use session_authority::tracing_config::{init_tracing, TracingConfig};
use session_authority::{Config, SessionAuthority};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const CHALLENGE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_tracing(&TracingConfig::from_config(&config)).context("initializing tracing")?;

    info!("Starting session authority");

    let key_settings = config.keys.clone();
    let keys = tokio::task::spawn_blocking(move || KeyManager::new(key_settings))
        .await
        .context("key generation task")?
        .context("generating initial signing key")?;
    let keys = Arc::new(keys);

    let (sessions, challenges): (Arc<dyn SessionStore>, Arc<dyn ChallengeStore>) =
        match &config.redis_url {
            Some(url) => {
                info!("Using Redis session and challenge stores");
                (
                    Arc::new(RedisSessionStore::new(url).await?),
                    Arc::new(RedisChallengeStore::new(url).await?),
                )
            }
            None => {
                info!("REDIS_URL not set, using in-memory stores");
                (
                    Arc::new(InMemorySessionStore::new()),
                    Arc::new(InMemoryChallengeStore::new()),
                )
            }
        };

    // Users and tenants are owned by the surrounding product; an empty
    // in-memory directory stands in when the authority runs on its own.
    let directory: Arc<dyn UserDirectory> = Arc::new(InMemoryDirectory::new());

    let authority = SessionAuthority::new(&config, keys, sessions, challenges, directory);

    let jwks = authority.jwks().to_json().context("serializing JWKS")?;
    info!(
        kid = %authority.keys().current_key_id(),
        rotation_interval_secs = config.keys.rotation_interval.as_secs(),
        retained_previous = config.keys.retained_previous,
        jwks = %jwks,
        "Signing keys ready"
    );

    let mut coordinator = ShutdownCoordinator::new();
    authority.spawn_background_tasks(&mut coordinator, CHALLENGE_PRUNE_INTERVAL);

    wait_for_signal().await.context("installing signal handlers")?;
    coordinator.shutdown(config.shutdown_timeout).await;

    Ok(())
}
