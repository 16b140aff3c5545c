//! RSA signing key pairs and public key exchange.

use crate::error::{AuthError, TokenRejection};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

/// PEM label for SubjectPublicKeyInfo.
pub const SPKI_PEM_TAG: &str = "PUBLIC KEY";
/// PEM label for PKCS#1 public keys.
pub const PKCS1_PEM_TAG: &str = "RSA PUBLIC KEY";

/// A signing key pair and its lifetime.
///
/// Private material only exists as the prepared [`EncodingKey`] and never
/// leaves the crate.
#[derive(Clone)]
pub struct KeyPair {
    kid: String,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl KeyPair {
    /// Generate a fresh RSA key pair with a random kid.
    ///
    /// `lifetime` sets `expires_at` relative to now. This is CPU heavy;
    /// call it from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyGeneration`] if the RNG or encoding fails.
    pub fn generate(bits: usize, lifetime: Duration) -> Result<Self, AuthError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| AuthError::key_generation(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_der = private_key
            .to_pkcs1_der()
            .map_err(|e| AuthError::key_generation(format!("private key encoding: {}", e)))?;
        let public_der = public_key
            .to_pkcs1_der()
            .map_err(|e| AuthError::key_generation(format!("public key encoding: {}", e)))?;

        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|e| AuthError::key_generation(format!("key lifetime: {}", e)))?;
        let created_at = Utc::now();

        Ok(Self {
            kid: generate_key_id(),
            encoding_key: EncodingKey::from_rsa_der(private_der.as_bytes()),
            decoding_key: DecodingKey::from_rsa_der(public_der.as_bytes()),
            public_key,
            created_at,
            expires_at: created_at + lifetime,
        })
    }

    /// Key identifier carried in the token header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public half of the pair.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// When the pair was generated.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the pair stops being verifiable.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True once `now` has reached `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// SubjectPublicKeyInfo PEM of the public key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if encoding fails.
    pub fn public_key_pem(&self) -> Result<String, AuthError> {
        export_public_key_pem(&self.public_key)
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// 128 random bits, base64url without padding.
#[must_use]
pub fn generate_key_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Encode a public key as SubjectPublicKeyInfo PEM.
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if encoding fails.
pub fn export_public_key_pem(key: &RsaPublicKey) -> Result<String, AuthError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| AuthError::internal(format!("public key PEM encoding: {}", e)))
}

/// Decode a PEM public key shared by another key authority.
///
/// Accepts `PUBLIC KEY` (SPKI) and `RSA PUBLIC KEY` blocks. Older peers
/// wrote SPKI bytes under the `RSA PUBLIC KEY` label, so both encodings are
/// tried regardless of the label.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the input is not an RSA public key.
pub fn import_public_key_pem(input: &str) -> Result<RsaPublicKey, AuthError> {
    let block = pem::parse(input)
        .map_err(|e| AuthError::config(format!("invalid public key PEM: {}", e)))?;

    if block.tag() != SPKI_PEM_TAG && block.tag() != PKCS1_PEM_TAG {
        return Err(AuthError::config(format!(
            "unexpected PEM block {}",
            block.tag()
        )));
    }

    RsaPublicKey::from_public_key_der(block.contents())
        .or_else(|_| RsaPublicKey::from_pkcs1_der(block.contents()))
        .map_err(|e| AuthError::config(format!("invalid RSA public key: {}", e)))
}

/// Verification-only key for services that receive the public key out of band.
#[derive(Clone)]
pub struct VerifyingKey {
    public_key: RsaPublicKey,
    decoding_key: DecodingKey,
    leeway: Duration,
}

impl VerifyingKey {
    /// Build from a PEM block produced by [`export_public_key_pem`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the PEM cannot be decoded.
    pub fn from_pem(input: &str) -> Result<Self, AuthError> {
        let public_key = import_public_key_pem(input)?;
        let der = public_key
            .to_pkcs1_der()
            .map_err(|e| AuthError::config(format!("invalid RSA public key: {}", e)))?;

        Ok(Self {
            decoding_key: DecodingKey::from_rsa_der(der.as_bytes()),
            public_key,
            leeway: Duration::ZERO,
        })
    }

    /// Allow this much clock skew on `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The imported public key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Verify an RS256 token signed by the matching private key.
    ///
    /// The `kid` header is ignored; the caller already chose the key.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenRejection`] describing the failed check.
    pub fn verify<C: DeserializeOwned>(&self, token: &str) -> Result<C, TokenRejection> {
        super::manager::decode_rs256(token, &self.decoding_key, self.leeway)
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static PAIR: Lazy<KeyPair> =
        Lazy::new(|| KeyPair::generate(2048, Duration::from_secs(3600)).unwrap());

    #[test]
    fn test_generated_pair_metadata() {
        assert_eq!(PAIR.kid().len(), 22);
        assert!(PAIR.expires_at() > PAIR.created_at());
        assert!(!PAIR.is_expired_at(Utc::now()));
        assert!(PAIR.is_expired_at(PAIR.expires_at()));
    }

    #[test]
    fn test_key_ids_are_unique() {
        let a = generate_key_id();
        let b = generate_key_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_pem_export_import_preserves_key() {
        let pem = PAIR.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let imported = import_public_key_pem(&pem).unwrap();
        assert_eq!(&imported, PAIR.public_key());
    }

    #[test]
    fn test_import_accepts_spki_under_rsa_label() {
        let spki = PAIR.public_key().to_public_key_der().unwrap();
        let legacy = pem::encode(&pem::Pem::new(PKCS1_PEM_TAG, spki.as_bytes().to_vec()));

        let imported = import_public_key_pem(&legacy).unwrap();
        assert_eq!(&imported, PAIR.public_key());
    }

    #[test]
    fn test_import_accepts_pkcs1() {
        let pkcs1 = PAIR.public_key().to_pkcs1_der().unwrap();
        let block = pem::encode(&pem::Pem::new(PKCS1_PEM_TAG, pkcs1.as_bytes().to_vec()));

        assert!(import_public_key_pem(&block).is_ok());
    }

    #[test]
    fn test_import_rejects_other_blocks() {
        let block = pem::encode(&pem::Pem::new("CERTIFICATE", vec![1, 2, 3]));
        assert!(import_public_key_pem(&block).is_err());
        assert!(import_public_key_pem("not pem at all").is_err());
    }
}
