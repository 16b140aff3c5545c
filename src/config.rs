//! Centralized configuration for the session authority.
//!
//! All configuration is loaded from environment variables and validated
//! at startup.

use crate::error::AuthError;
use std::env;
use std::time::Duration;
use url::Url;

/// Smallest RSA modulus the signer accepts for RS256.
pub const MIN_KEY_BITS: usize = 2048;

/// Signing key lifecycle settings.
#[derive(Debug, Clone)]
pub struct KeySettings {
    /// Modulus size of generated RSA keys
    pub key_bits: usize,
    /// Period between rotations; keys expire after twice this
    pub rotation_interval: Duration,
    /// How many superseded keys stay verifiable
    pub retained_previous: usize,
    /// Leeway applied to `exp` checks
    pub clock_skew: Duration,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            key_bits: MIN_KEY_BITS,
            rotation_interval: Duration::from_secs(24 * 60 * 60),
            retained_previous: 1,
            clock_skew: Duration::ZERO,
        }
    }
}

/// Token, session and challenge lifetimes.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Value of the `iss` claim
    pub issuer: String,
    /// Access token TTL
    pub access_token_ttl: Duration,
    /// Refresh token TTL
    pub refresh_token_ttl: Duration,
    /// PKCE challenge TTL
    pub challenge_ttl: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "identity-service".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            challenge_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Session authority configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key lifecycle
    pub keys: KeySettings,
    /// Token lifetimes
    pub tokens: TokenSettings,
    /// Frontend base URL for the OAuth handoff redirect
    pub frontend_url: Url,
    /// Redis connection string; in-memory stores when absent
    pub redis_url: Option<String>,
    /// Log filter directive
    pub log_level: String,
    /// Emit JSON logs
    pub log_json: bool,
    /// Grace period for background tasks on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keys: KeySettings::default(),
            tokens: TokenSettings::default(),
            frontend_url: Url::parse("http://localhost:3000").expect("static URL is valid"),
            redis_url: None,
            log_level: "info".to_string(),
            log_json: false,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparsable, or if the
    /// resulting configuration fails [`Config::validate`].
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();

        let keys = KeySettings {
            key_bits: parse_env("KEY_SIZE_BITS", MIN_KEY_BITS)?,
            rotation_interval: Duration::from_secs(parse_env("KEY_ROTATION_INTERVAL", 86_400)?),
            retained_previous: parse_env("KEY_RETAINED_PREVIOUS", 1)?,
            clock_skew: Duration::from_secs(parse_env("TOKEN_CLOCK_SKEW", 0)?),
        };

        let tokens = TokenSettings {
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "identity-service".to_string()),
            access_token_ttl: Duration::from_secs(parse_env("ACCESS_TOKEN_TTL", 900)?),
            refresh_token_ttl: Duration::from_secs(parse_env("REFRESH_TOKEN_TTL", 604_800)?),
            challenge_ttl: Duration::from_secs(parse_env("PKCE_CHALLENGE_TTL", 300)?),
        };

        let frontend_url = env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let frontend_url = Url::parse(&frontend_url)
            .map_err(|e| AuthError::config(format!("Invalid FRONTEND_URL: {}", e)))?;

        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        let config = Self {
            keys,
            tokens,
            frontend_url,
            redis_url,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: parse_env("LOG_JSON", false)?,
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT", 10)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the crate relies on.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending setting.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.keys.key_bits < MIN_KEY_BITS {
            return Err(AuthError::config(format!(
                "KEY_SIZE_BITS must be at least {}, got {}",
                MIN_KEY_BITS, self.keys.key_bits
            )));
        }
        if self.keys.rotation_interval.is_zero() {
            return Err(AuthError::config("KEY_ROTATION_INTERVAL must be positive"));
        }
        if self.keys.retained_previous == 0 {
            return Err(AuthError::config("KEY_RETAINED_PREVIOUS must be at least 1"));
        }

        let ttls = [
            ("ACCESS_TOKEN_TTL", self.tokens.access_token_ttl),
            ("REFRESH_TOKEN_TTL", self.tokens.refresh_token_ttl),
            ("PKCE_CHALLENGE_TTL", self.tokens.challenge_ttl),
        ];
        for (name, ttl) in ttls {
            if ttl.is_zero() {
                return Err(AuthError::config(format!("{} must be positive", name)));
            }
        }

        if self.tokens.issuer.trim().is_empty() {
            return Err(AuthError::config("JWT_ISSUER must not be empty"));
        }

        Ok(())
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AuthError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| AuthError::config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
