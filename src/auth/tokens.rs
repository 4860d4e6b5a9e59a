//! Token grants and account identities

use chrono::{DateTime, Duration, Utc};

use super::ScopeSet;

/// Grants are treated as expired this long before their real expiry.
const EXPIRY_SKEW_SECS: i64 = 300;
const DEFAULT_LIFETIME_SECS: u64 = 3600;
const MAX_LIFETIME_SECS: u64 = 90 * 24 * 3600;

/// Account produced by the identity provider on successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    /// Opaque identifier (`<oid>.<tid>` for Azure AD).
    pub id: String,
    pub display_name: String,
}

/// Access token plus the metadata needed to decide whether it can be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub granted_scopes: ScopeSet,
    pub account: AccountIdentity,
}

impl TokenGrant {
    pub fn new(
        access_token: String,
        expires_in_secs: Option<u64>,
        granted_scopes: ScopeSet,
        account: AccountIdentity,
    ) -> Self {
        // AAD omits expires_in only for malformed responses; assume the
        // standard one hour lifetime.
        let secs = expires_in_secs
            .unwrap_or(DEFAULT_LIFETIME_SECS)
            .min(MAX_LIFETIME_SECS) as i64;
        Self {
            access_token,
            expires_at: Utc::now() + Duration::seconds(secs),
            granted_scopes,
            account,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Consider expired if less than 5 minutes remain at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }

    /// Whether this grant may be handed out for `scopes` right now.
    pub fn satisfies(&self, scopes: &ScopeSet) -> bool {
        !self.is_expired() && self.granted_scopes.covers(scopes)
    }
}
