use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Random opaque strings for challenge records.
pub struct OpaqueGenerator;

impl OpaqueGenerator {
    /// 256 random bits, base64url without padding.
    pub fn generate() -> String {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut bytes[..]);
        URL_SAFE_NO_PAD.encode(&bytes[..])
    }

    /// Constant-time comparison of a presented verifier with the stored one.
    pub fn verify(presented: &str, stored: &str) -> bool {
        presented.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}
