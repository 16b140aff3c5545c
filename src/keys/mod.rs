//! Signing key lifecycle: generation, rotation, lookup and publication.

pub mod jwks;
pub mod manager;
pub mod pair;
pub mod rotation;

pub use jwks::{Jwk, Jwks};
pub use manager::{KeyManager, SIGNING_ALGORITHM};
pub use pair::{export_public_key_pem, import_public_key_pem, KeyPair, VerifyingKey};
pub use rotation::{KeyRotator, RotationHealth, RotationStatus};
