//! Property-based tests for the token codec.
//!
//! Property 1: Issued tokens parse back to the same identity
//! Property 2: Any change to the signature is rejected
//! Property 3: Tokens are bound to their kind

use once_cell::sync::Lazy;
use proptest::prelude::*;
use session_authority::config::KeySettings;
use session_authority::jwt::{TokenCodec, TokenKind};
use session_authority::keys::KeyManager;
use session_authority::TokenRejection;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

static CODEC: Lazy<TokenCodec> = Lazy::new(|| {
    let keys = Arc::new(KeyManager::new(KeySettings::default()).unwrap());
    TokenCodec::new(keys, "identity-service")
});

const BASE64URL: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn arb_uuid() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

fn arb_kind() -> impl Strategy<Value = TokenKind> {
    prop_oneof![Just(TokenKind::Access), Just(TokenKind::Refresh)]
}

fn arb_ttl() -> impl Strategy<Value = Duration> {
    (60u64..=30 * 24 * 3600).prop_map(Duration::from_secs)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property 1: Issued tokens parse back to the same identity
    #[test]
    fn prop_issue_then_parse_preserves_identity(
        user_id in arb_uuid(),
        session_id in arb_uuid(),
        tenant_id in arb_uuid(),
        kind in arb_kind(),
        ttl in arb_ttl(),
    ) {
        let token = CODEC.issue(user_id, session_id, tenant_id, kind, ttl).unwrap();
        let claims = CODEC.parse(&token).unwrap();

        prop_assert_eq!(claims.user_id, user_id);
        prop_assert_eq!(claims.session_id, session_id);
        prop_assert_eq!(claims.tenant_id, tenant_id);
        prop_assert_eq!(claims.kind, kind);
        prop_assert_eq!(claims.sub, user_id.to_string());
        prop_assert_eq!(claims.exp - claims.iat, ttl.as_secs() as i64);
    }

    /// Property 2: Any change to the signature is rejected
    #[test]
    fn prop_altered_signature_is_rejected(
        tenant_id in arb_uuid(),
        position in any::<prop::sample::Index>(),
        replacement in 0usize..BASE64URL.len(),
    ) {
        let ttl = Duration::from_secs(300);
        let token = CODEC
            .issue(Uuid::new_v4(), Uuid::new_v4(), tenant_id, TokenKind::Access, ttl)
            .unwrap();

        let signature_start = token.rfind('.').unwrap() + 1;
        // The final character carries padding bits that may not affect the decoded bytes.
        let signature_len = token.len() - signature_start - 1;
        let index = signature_start + position.index(signature_len);

        let original = token.as_bytes()[index];
        let mut replacement = BASE64URL[replacement];
        if replacement == original {
            replacement = if original == b'A' { b'B' } else { b'A' };
        }

        let mut altered = token.into_bytes();
        altered[index] = replacement;
        let altered = String::from_utf8(altered).unwrap();

        prop_assert_eq!(CODEC.parse(&altered).unwrap_err(), TokenRejection::SignatureInvalid);
    }

    /// Property 3: Tokens are bound to their kind
    #[test]
    fn prop_kind_mismatch_is_rejected(kind in arb_kind(), tenant_id in arb_uuid()) {
        let token = CODEC
            .issue(Uuid::new_v4(), Uuid::new_v4(), tenant_id, kind, Duration::from_secs(300))
            .unwrap();
        let other = match kind {
            TokenKind::Access => TokenKind::Refresh,
            TokenKind::Refresh => TokenKind::Access,
        };

        prop_assert!(CODEC.parse_kind(&token, kind).is_ok());
        prop_assert_eq!(CODEC.parse_kind(&token, other).unwrap_err(), TokenRejection::WrongKind);
    }
}

#[test]
fn test_garbage_is_malformed() {
    for token in ["", "not-a-jwt", "a.b", "a.b.c", "....."] {
        assert_eq!(CODEC.parse(token).unwrap_err(), TokenRejection::Malformed, "{:?}", token);
    }
}
