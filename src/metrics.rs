//! Prometheus metrics for the session authority.
//!
//! Provides counters and gauges for token issuance, verification outcomes,
//! key rotation health and session/challenge lifecycle.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_int_gauge, CounterVec, Gauge, IntGauge,
};

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_authority_tokens_issued_total",
        "Total number of tokens issued",
        &["token_type"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Token verification outcomes.
pub static TOKEN_VERIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_authority_token_verifications_total",
        "Total number of token verifications",
        &["status", "reason"]
    )
    .expect("Failed to register token_verifications metric")
});

/// Key rotation attempts.
pub static KEY_ROTATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_authority_key_rotations_total",
        "Total number of signing key rotation attempts",
        &["status"]
    )
    .expect("Failed to register key_rotations metric")
});

/// Keys currently verifiable by kid.
pub static RETAINED_KEYS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "session_authority_retained_keys",
        "Number of signing keys currently verifiable"
    )
    .expect("Failed to register retained_keys metric")
});

/// Unix time of the last successful rotation.
pub static LAST_ROTATION_SUCCESS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "session_authority_last_rotation_success_timestamp_seconds",
        "Unix timestamp of the last successful key rotation"
    )
    .expect("Failed to register last_rotation_success metric")
});

/// Session lifecycle operations.
pub static SESSION_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_authority_session_operations_total",
        "Total number of session operations",
        &["operation", "status"]
    )
    .expect("Failed to register session_operations metric")
});

/// PKCE challenge operations.
pub static PKCE_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_authority_pkce_operations_total",
        "Total number of PKCE challenge operations",
        &["operation", "status"]
    )
    .expect("Failed to register pkce_operations metric")
});

/// Security events counter.
pub static SECURITY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_authority_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Record a token issuance.
pub fn record_token_issued(token_type: &str) {
    TOKENS_ISSUED.with_label_values(&[token_type]).inc();
}

/// Record a verification outcome; `reason` is empty on success.
pub fn record_token_verification(status: &str, reason: &str) {
    TOKEN_VERIFICATIONS
        .with_label_values(&[status, reason])
        .inc();
}

/// Record a rotation attempt.
pub fn record_key_rotation(status: &str) {
    KEY_ROTATIONS.with_label_values(&[status]).inc();
}

/// Record a successful rotation at `unix_seconds`.
pub fn record_rotation_success_at(unix_seconds: i64) {
    LAST_ROTATION_SUCCESS.set(unix_seconds as f64);
}

/// Update the retained key gauge.
pub fn set_retained_keys(count: usize) {
    RETAINED_KEYS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Record a session operation.
pub fn record_session_operation(operation: &str, status: &str) {
    SESSION_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a PKCE operation.
pub fn record_pkce_operation(operation: &str, status: &str) {
    PKCE_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}
