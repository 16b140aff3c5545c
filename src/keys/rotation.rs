//! Background key rotation.
//!
//! A single task rotates the signing key on a fixed interval. A failed
//! attempt is recorded and skipped; the next tick tries again. The task
//! runs until the owning [`crate::shutdown::ShutdownCoordinator`] cancels it.

use crate::error::AuthError;
use crate::keys::manager::KeyManager;
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Snapshot of rotation outcomes for health checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub rotations: u64,
}

impl RotationStatus {
    /// Healthy until `max_consecutive_failures` attempts in a row have failed.
    #[must_use]
    pub fn is_healthy(&self, max_consecutive_failures: u32) -> bool {
        self.consecutive_failures < max_consecutive_failures
    }
}

/// Shared record of rotation attempts.
#[derive(Debug, Default)]
pub struct RotationHealth {
    status: Mutex<RotationStatus>,
}

impl RotationHealth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        let mut status = self.status.lock();
        status.last_success = Some(at);
        status.consecutive_failures = 0;
        status.rotations += 1;
        drop(status);

        metrics::record_key_rotation("success");
        metrics::record_rotation_success_at(at.timestamp());
    }

    pub fn record_failure(&self, at: DateTime<Utc>, err: &AuthError) {
        let mut status = self.status.lock();
        status.last_failure = Some(at);
        status.last_error = Some(err.to_string());
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        drop(status);

        metrics::record_key_rotation("failure");
    }

    #[must_use]
    pub fn snapshot(&self) -> RotationStatus {
        self.status.lock().clone()
    }
}

/// Drives periodic rotation of a [`KeyManager`].
pub struct KeyRotator {
    manager: Arc<KeyManager>,
    health: Arc<RotationHealth>,
    interval: Duration,
}

impl KeyRotator {
    /// Rotate `manager` on its configured interval.
    #[must_use]
    pub fn new(manager: Arc<KeyManager>, health: Arc<RotationHealth>) -> Self {
        let interval = manager.settings().rotation_interval;
        Self {
            manager,
            health,
            interval,
        }
    }

    /// Override the tick period.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn health(&self) -> Arc<RotationHealth> {
        Arc::clone(&self.health)
    }

    /// Run one rotation: generate off the async runtime, install, sweep.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyGeneration`] if generation fails or the
    /// blocking task panics. Key state is unchanged on error.
    pub async fn rotate_once(&self) -> Result<String, AuthError> {
        let manager = Arc::clone(&self.manager);
        let result = tokio::task::spawn_blocking(move || manager.generate_key_pair())
            .await
            .map_err(|e| AuthError::key_generation(format!("generation task failed: {}", e)))
            .and_then(|generated| generated);

        let now = Utc::now();
        match result {
            Ok(pair) => {
                let kid = self.manager.install(pair);
                self.manager.sweep_expired(now);
                self.health.record_success(now);
                Ok(kid)
            }
            Err(e) => {
                self.health.record_failure(now, &e);
                Err(e)
            }
        }
    }

    /// Tick forever. The first rotation happens one interval after start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Key rotation task started");

        loop {
            ticker.tick().await;

            match self.rotate_once().await {
                Ok(kid) => info!(kid = %kid, "Rotated signing key"),
                Err(e) => {
                    let failures = self.health.snapshot().consecutive_failures;
                    error!(
                        error = %e,
                        consecutive_failures = failures,
                        "Key rotation failed, keeping current key"
                    );
                }
            }
        }
    }
}
