//! Signing key manager with rotation and a bounded ring of retained keys.
//!
//! Key state is a small immutable ring (`current` plus up to
//! `retained_previous` superseded keys) behind a reader/writer lock. Readers
//! clone an `Arc<KeyPair>` out of the lock and sign or verify outside it.
//! Rotation generates the new pair before taking the write lock, so the
//! exclusive section is a pointer swap.

use crate::config::KeySettings;
use crate::error::{AuthError, TokenRejection};
use crate::keys::jwks::{Jwk, Jwks};
use crate::keys::pair::KeyPair;
use crate::metrics;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use parking_lot::RwLock;
use rsa::RsaPublicKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The only accepted signing algorithm.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

struct KeyRing {
    current: Arc<KeyPair>,
    /// Most recently superseded first.
    previous: VecDeque<Arc<KeyPair>>,
}

impl KeyRing {
    fn len(&self) -> usize {
        1 + self.previous.len()
    }
}

/// Owns the signing key lifecycle.
pub struct KeyManager {
    ring: RwLock<KeyRing>,
    settings: KeySettings,
}

impl KeyManager {
    /// Create a manager and generate its first key synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyGeneration`] if the initial key cannot be
    /// generated; this is fatal at startup.
    pub fn new(settings: KeySettings) -> Result<Self, AuthError> {
        let initial = KeyPair::generate(settings.key_bits, key_lifetime(&settings))?;
        info!(kid = %initial.kid(), bits = settings.key_bits, "Generated initial signing key");
        Ok(Self::with_initial_key(settings, initial))
    }

    /// Create a manager around an already generated key.
    #[must_use]
    pub fn with_initial_key(settings: KeySettings, initial: KeyPair) -> Self {
        metrics::set_retained_keys(1);
        Self {
            ring: RwLock::new(KeyRing {
                current: Arc::new(initial),
                previous: VecDeque::new(),
            }),
            settings,
        }
    }

    /// Key lifecycle settings.
    #[must_use]
    pub fn settings(&self) -> &KeySettings {
        &self.settings
    }

    /// Generate a pair with this manager's size and lifetime, without installing it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyGeneration`] on RNG or encoding failure.
    pub fn generate_key_pair(&self) -> Result<KeyPair, AuthError> {
        KeyPair::generate(self.settings.key_bits, key_lifetime(&self.settings))
    }

    /// Identifier of the key used for new signatures.
    #[must_use]
    pub fn current_key_id(&self) -> String {
        self.ring.read().current.kid().to_string()
    }

    /// Public key used to verify new signatures.
    #[must_use]
    pub fn current_public_key(&self) -> RsaPublicKey {
        self.ring.read().current.public_key().clone()
    }

    /// SubjectPublicKeyInfo PEM of the current public key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if encoding fails.
    pub fn current_public_key_pem(&self) -> Result<String, AuthError> {
        self.current().public_key_pem()
    }

    /// Look up a retained, unexpired key by kid.
    ///
    /// `None` means the token cannot be verified and must be treated as an
    /// authentication failure.
    #[must_use]
    pub fn key_by_id(&self, kid: &str) -> Option<Arc<KeyPair>> {
        let now = Utc::now();
        let ring = self.ring.read();

        if ring.current.kid() == kid {
            return Some(Arc::clone(&ring.current));
        }

        ring.previous
            .iter()
            .find(|key| key.kid() == kid && !key.is_expired_at(now))
            .cloned()
    }

    /// Kids currently verifiable, current first.
    #[must_use]
    pub fn retained_key_ids(&self) -> Vec<String> {
        let ring = self.ring.read();
        std::iter::once(&ring.current)
            .chain(ring.previous.iter())
            .map(|key| key.kid().to_string())
            .collect()
    }

    /// Generate a new key and make it current.
    ///
    /// Blocks the calling thread for the duration of RSA generation; async
    /// callers should go through [`crate::keys::rotation::KeyRotator`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyGeneration`]; key state is unchanged.
    pub fn rotate(&self) -> Result<String, AuthError> {
        let pair = self.generate_key_pair()?;
        Ok(self.install(pair))
    }

    /// Make `pair` current, demoting the old current key into the ring.
    ///
    /// Keys beyond `retained_previous` fall off the end and are no longer
    /// verifiable. Returns the new kid.
    pub fn install(&self, pair: KeyPair) -> String {
        let kid = pair.kid().to_string();
        let next = Arc::new(pair);

        let (retired, retained) = {
            let mut ring = self.ring.write();
            let demoted = std::mem::replace(&mut ring.current, next);
            ring.previous.push_front(demoted);

            let mut retired = Vec::new();
            while ring.previous.len() > self.settings.retained_previous {
                if let Some(key) = ring.previous.pop_back() {
                    retired.push(key.kid().to_string());
                }
            }
            (retired, ring.len())
        };

        metrics::set_retained_keys(retained);
        info!(kid = %kid, retained, retired = ?retired, "Installed new signing key");
        kid
    }

    /// Drop superseded keys whose own expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let (removed, retained) = {
            let mut ring = self.ring.write();
            let before = ring.previous.len();
            ring.previous.retain(|key| !key.is_expired_at(now));
            (before - ring.previous.len(), ring.len())
        };

        if removed > 0 {
            metrics::set_retained_keys(retained);
            debug!(removed, retained, "Swept expired signing keys");
        }
        removed
    }

    /// JWKS of every retained key, current first.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let ring = self.ring.read();
        std::iter::once(&ring.current)
            .chain(ring.previous.iter())
            .map(|key| Jwk::from_rsa(key.kid(), key.public_key()))
            .collect()
    }

    /// Sign `claims` with the current key, stamping its kid in the header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyState`] if the signer rejects the key.
    pub fn sign_token<C: Serialize>(&self, claims: &C) -> Result<String, AuthError> {
        let key = self.current();

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(key.kid().to_string());

        encode(&header, claims, key.encoding_key())
            .map_err(|e| AuthError::InvalidKeyState(e.to_string()))
    }

    /// Verify a token signed by any retained key.
    ///
    /// Reads the kid from the unverified header, resolves the key, then
    /// checks signature and expiry with that key. Anything but RS256 is
    /// rejected before key lookup.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenRejection`] for the first failed check.
    pub fn verify_token<C: DeserializeOwned>(&self, token: &str) -> Result<C, TokenRejection> {
        let header = decode_header(token).map_err(|_| TokenRejection::Malformed)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenRejection::Malformed);
        }

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(TokenRejection::UnknownKey)?;
        let key = self.key_by_id(&kid).ok_or(TokenRejection::UnknownKey)?;

        decode_rs256(token, key.decoding_key(), self.settings.clock_skew)
    }

    fn current(&self) -> Arc<KeyPair> {
        Arc::clone(&self.ring.read().current)
    }
}

/// Keys outlive one rotation interval so tokens signed just before a
/// rotation stay verifiable.
fn key_lifetime(settings: &KeySettings) -> Duration {
    settings.rotation_interval.saturating_mul(2)
}

pub(crate) fn decode_rs256<C: DeserializeOwned>(
    token: &str,
    key: &DecodingKey,
    leeway: Duration,
) -> Result<C, TokenRejection> {
    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.leeway = leeway.as_secs();
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    decode::<C>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            ErrorKind::InvalidSignature => TokenRejection::SignatureInvalid,
            _ => TokenRejection::Malformed,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn claims(ttl: i64) -> TestClaims {
        TestClaims {
            sub: "user-123".to_string(),
            exp: Utc::now().timestamp() + ttl,
        }
    }

    // RSA generation dominates test time; build a few pairs once and install them.
    static SPARE_KEYS: Lazy<Vec<KeyPair>> = Lazy::new(|| {
        (0..4)
            .map(|_| KeyPair::generate(2048, Duration::from_secs(3600)).unwrap())
            .collect()
    });

    fn manager_with_retention(retained_previous: usize) -> KeyManager {
        let settings = KeySettings {
            retained_previous,
            ..KeySettings::default()
        };
        KeyManager::with_initial_key(settings, SPARE_KEYS[0].clone())
    }

    #[test]
    fn test_sign_stamps_current_kid() {
        let manager = manager_with_retention(1);
        let token = manager.sign_token(&claims(60)).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(SPARE_KEYS[0].kid()));
    }

    #[test]
    fn test_verify_round_trip() {
        let manager = manager_with_retention(1);
        let original = claims(60);
        let token = manager.sign_token(&original).unwrap();

        let decoded: TestClaims = manager.verify_token(&token).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_install_keeps_one_previous_by_default() {
        let manager = manager_with_retention(1);
        let first = manager.current_key_id();

        manager.install(SPARE_KEYS[1].clone());
        assert!(manager.key_by_id(&first).is_some());

        manager.install(SPARE_KEYS[2].clone());
        assert!(manager.key_by_id(&first).is_none());
        assert_eq!(manager.retained_key_ids().len(), 2);
    }

    #[test]
    fn test_larger_retention_keeps_more_keys() {
        let manager = manager_with_retention(3);
        let first = manager.current_key_id();

        manager.install(SPARE_KEYS[1].clone());
        manager.install(SPARE_KEYS[2].clone());
        manager.install(SPARE_KEYS[3].clone());

        assert!(manager.key_by_id(&first).is_some());
        assert_eq!(manager.retained_key_ids().len(), 4);
        assert_eq!(manager.retained_key_ids()[0], SPARE_KEYS[3].kid());
    }

    #[test]
    fn test_sweep_drops_expired_previous_keys() {
        let manager = manager_with_retention(3);
        let first = manager.current_key_id();
        manager.install(SPARE_KEYS[1].clone());

        let removed = manager.sweep_expired(Utc::now() + chrono::Duration::hours(2));
        assert_eq!(removed, 1);
        assert!(manager.key_by_id(&first).is_none());
        assert_eq!(manager.current_key_id(), SPARE_KEYS[1].kid());
    }

    #[test]
    fn test_unknown_kid_is_rejected() {
        let manager = manager_with_retention(1);
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("not-a-key".to_string());
        let token = encode(&header, &claims(60), SPARE_KEYS[1].encoding_key()).unwrap();

        let result: Result<TestClaims, _> = manager.verify_token(&token);
        assert_eq!(result.unwrap_err(), TokenRejection::UnknownKey);
    }

    #[test]
    fn test_missing_kid_is_rejected() {
        let manager = manager_with_retention(1);
        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, &claims(60), SPARE_KEYS[0].encoding_key()).unwrap();

        let result: Result<TestClaims, _> = manager.verify_token(&token);
        assert_eq!(result.unwrap_err(), TokenRejection::UnknownKey);
    }

    #[test]
    fn test_forged_kid_fails_signature() {
        let manager = manager_with_retention(1);
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(manager.current_key_id());
        let token = encode(&header, &claims(60), SPARE_KEYS[1].encoding_key()).unwrap();

        let result: Result<TestClaims, _> = manager.verify_token(&token);
        assert_eq!(result.unwrap_err(), TokenRejection::SignatureInvalid);
    }

    #[test]
    fn test_hmac_token_is_rejected() {
        let manager = manager_with_retention(1);
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(manager.current_key_id());
        let key = jsonwebtoken::EncodingKey::from_secret(b"attacker-chosen-secret");
        let token = encode(&header, &claims(60), &key).unwrap();

        let result: Result<TestClaims, _> = manager.verify_token(&token);
        assert_eq!(result.unwrap_err(), TokenRejection::Malformed);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let manager = manager_with_retention(1);
        let token = manager.sign_token(&claims(-120)).unwrap();

        let result: Result<TestClaims, _> = manager.verify_token(&token);
        assert_eq!(result.unwrap_err(), TokenRejection::Expired);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let manager = manager_with_retention(1);
        let result: Result<TestClaims, _> = manager.verify_token("not.a.jwt");
        assert_eq!(result.unwrap_err(), TokenRejection::Malformed);
    }

    #[test]
    fn test_jwks_lists_retained_keys() {
        let manager = manager_with_retention(1);
        manager.install(SPARE_KEYS[1].clone());

        let jwks = manager.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, SPARE_KEYS[1].kid());
        assert!(jwks.find(SPARE_KEYS[0].kid()).is_some());
    }
}
