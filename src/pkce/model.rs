use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Single-use record bridging an OAuth redirect to a token exchange.
///
/// Redeemable only while `used` is false and `expires_at` is in the future.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub id: Uuid,
    pub code_challenge: String,
    pub code_verifier: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
}

impl PkceChallenge {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

impl fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("tenant_id", &self.tenant_id)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("used", &self.used)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge(used: bool) -> PkceChallenge {
        let now = Utc::now();
        PkceChallenge {
            id: Uuid::new_v4(),
            code_challenge: "challenge".to_string(),
            code_verifier: "verifier".to_string(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            expires_at: now + Duration::minutes(5),
            created_at: now,
            used,
        }
    }

    #[test]
    fn test_used_or_expired_is_not_redeemable() {
        let fresh = challenge(false);
        assert!(fresh.is_redeemable_at(fresh.created_at));
        assert!(!fresh.is_redeemable_at(fresh.expires_at));
        assert!(!challenge(true).is_redeemable_at(Utc::now()));
    }

    #[test]
    fn test_debug_hides_verifier() {
        let rendered = format!("{:?}", challenge(false));
        assert!(!rendered.contains("code_verifier"));
        assert!(!rendered.contains("\"verifier\""));
    }
}
