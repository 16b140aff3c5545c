//! Error types for the session authority.
//!
//! Every credential failure (bad token, expired session, spent challenge,
//! wrong verifier, missing tenant grant) keeps its precise variant for logs
//! and metrics but renders the same public message, so a caller cannot tell
//! an expired token from a forged one.

use thiserror::Error;

/// Generic message returned to callers for any credential failure.
pub const INVALID_CREDENTIALS: &str = "invalid credentials or token";

/// Why a token was rejected by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a compact JWS, bad base64/JSON, missing claims or wrong algorithm
    Malformed,
    /// The `exp` claim is in the past
    Expired,
    /// Signature does not verify against the key named by `kid`
    SignatureInvalid,
    /// `kid` is absent or names a key that is no longer retained
    UnknownKey,
    /// Token kind does not match the operation (refresh where access is required)
    WrongKind,
}

impl TokenRejection {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::SignatureInvalid => "signature_invalid",
            Self::UnknownKey => "unknown_key",
            Self::WrongKind => "wrong_kind",
        }
    }
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the session and challenge persistence collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or returned an I/O error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A record with the same identifier already exists
    #[error("Record already exists: {0}")]
    Conflict(String),

    /// Stored record could not be encoded or decoded
    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Crate-wide error.
#[derive(Error, Debug)]
pub enum AuthError {
    /// RSA key generation or encoding failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material was rejected by the signer; should be unreachable
    #[error("Invalid key state: {0}")]
    InvalidKeyState(String),

    /// Token failed decoding, signature, expiry, key lookup or kind checks
    #[error("Token invalid: {0}")]
    TokenInvalid(TokenRejection),

    /// Session exists but is past its expiry
    #[error("Session expired")]
    SessionExpired,

    /// Challenge is missing, expired or already used
    #[error("Challenge invalid")]
    ChallengeInvalid,

    /// Supplied code verifier does not match the stored one
    #[error("Code verifier mismatch")]
    VerifierMismatch,

    /// Missing session, user or tenant grant
    #[error("Unauthorized")]
    Unauthorized,

    /// Persistence collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        AuthError::Config(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        AuthError::Internal(msg.into())
    }

    /// Create a key generation error.
    #[must_use]
    pub fn key_generation(msg: impl Into<String>) -> Self {
        AuthError::KeyGeneration(msg.into())
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            AuthError::KeyGeneration(_) => "KEY_GENERATION_ERROR",
            AuthError::InvalidKeyState(_) => "INVALID_KEY_STATE",
            AuthError::TokenInvalid(_) => "TOKEN_INVALID",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::ChallengeInvalid => "CHALLENGE_INVALID",
            AuthError::VerifierMismatch => "VERIFIER_MISMATCH",
            AuthError::Unauthorized => "UNAUTHORIZED",
            AuthError::Store(_) => "STORE_ERROR",
            AuthError::Config(_) => "CONFIG_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures caused by the caller's credentials.
    #[must_use]
    pub const fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::TokenInvalid(_)
                | AuthError::SessionExpired
                | AuthError::ChallengeInvalid
                | AuthError::VerifierMismatch
                | AuthError::Unauthorized
        )
    }

    /// Only backend unavailability is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Store(StoreError::Unavailable(_)))
    }

    /// Message safe to hand back to an unauthenticated caller.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        if self.is_credential_failure() {
            INVALID_CREDENTIALS
        } else {
            "internal error"
        }
    }
}

impl From<TokenRejection> for AuthError {
    fn from(rejection: TokenRejection) -> Self {
        AuthError::TokenInvalid(rejection)
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_failures_share_public_message() {
        let failures = [
            AuthError::TokenInvalid(TokenRejection::Expired),
            AuthError::TokenInvalid(TokenRejection::SignatureInvalid),
            AuthError::TokenInvalid(TokenRejection::UnknownKey),
            AuthError::SessionExpired,
            AuthError::ChallengeInvalid,
            AuthError::VerifierMismatch,
            AuthError::Unauthorized,
        ];

        for err in &failures {
            assert!(err.is_credential_failure());
            assert_eq!(err.public_message(), INVALID_CREDENTIALS);
        }
    }

    #[test]
    fn test_internal_errors_do_not_leak_detail() {
        let err = AuthError::internal("redis at 10.0.0.4 refused");
        assert_eq!(err.public_message(), "internal error");
        assert!(!err.is_credential_failure());
    }

    #[test]
    fn test_retryable_only_for_unavailable_store() {
        assert!(AuthError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!AuthError::Store(StoreError::Conflict("dup".into())).is_retryable());
        assert!(!AuthError::Unauthorized.is_retryable());
    }

    #[test]
    fn test_rejection_converts_to_token_invalid() {
        let err: AuthError = TokenRejection::WrongKind.into();
        assert_eq!(err.code(), "TOKEN_INVALID");
        assert_eq!(err.to_string(), "Token invalid: wrong_kind");
    }
}
