//! Cached bearer credential with single-flight refresh.
//!
//! Readers share the fast path; a miss upgrades to the exclusive lock and
//! re-checks freshness before refreshing, so N concurrent misses coalesce
//! into one upstream request. The stored expiry already carries the 5-minute
//! early-refresh skew.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Refresh this long before the upstream expiry.
pub(crate) const EXPIRY_SKEW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub(crate) struct CachedToken {
    pub token: String,
    expires_at: Instant,
}

impl CachedToken {
    pub fn new(token: String, expires_in: Duration) -> Self {
        let usable = expires_in.saturating_sub(EXPIRY_SKEW);
        Self {
            token,
            expires_at: Instant::now() + usable,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Shared/exclusive cache cell. The refresh itself is performed by the
/// caller while holding the write guard, keeping this type free of any
/// transport concerns.
pub(crate) type TokenCell = RwLock<Option<CachedToken>>;

/// Fast path: return the cached token if it is still fresh.
pub(crate) async fn cached(cell: &TokenCell) -> Option<String> {
    let guard = cell.read().await;
    guard
        .as_ref()
        .filter(|cached| cached.is_fresh())
        .map(|cached| cached.token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_within_skew_is_stale() {
        let token = CachedToken::new("tok".into(), Duration::from_secs(60));
        assert!(!token.is_fresh(), "expiry inside the skew window is stale");
    }

    #[test]
    fn long_lived_token_is_fresh() {
        let token = CachedToken::new("tok".into(), Duration::from_secs(3600));
        assert!(token.is_fresh());
    }
}
