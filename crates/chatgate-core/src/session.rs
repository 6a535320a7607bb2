use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use chatgate_protocol::GatewayError;

/// Short-lived authentication credential. Replaced wholesale on refresh,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn refresh(&self) -> Result<Credential, GatewayError>;
}

pub struct SessionCache {
    auth: Arc<dyn AuthClient>,
    cached: RwLock<Option<Credential>>,
    ttl: Duration,
}

impl SessionCache {
    pub const DEFAULT_TTL: Duration = Duration::minutes(5);

    pub fn new(auth: Arc<dyn AuthClient>, ttl: Duration) -> Self {
        Self { auth, cached: RwLock::new(None), ttl }
    }

    /// Returns the cached credential while it is still valid, refreshing
    /// otherwise. `None` is not an error: it signals "proceed as anonymous".
    pub async fn credential(&self, now: OffsetDateTime) -> Option<Credential> {
        if let Some(credential) = self.cached.read().await.as_ref() {
            if now < credential.expires_at {
                return Some(credential.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(credential) = slot.as_ref() {
            if now < credential.expires_at {
                return Some(credential.clone());
            }
        }
        match self.auth.refresh().await {
            Ok(mut credential) => {
                credential.expires_at = credential.expires_at.min(now + self.ttl);
                *slot = Some(credential.clone());
                Some(credential)
            }
            Err(err) => {
                // Never retain a stale value after a failed refresh.
                warn!(error = %err, "credential refresh failed, clearing cache");
                *slot = None;
                None
            }
        }
    }

    pub async fn invalidate(&self) {
        debug!("session cache invalidated");
        *self.cached.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use time::macros::datetime;

    struct CountingAuth {
        refreshes: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl AuthClient for CountingAuth {
        async fn refresh(&self) -> Result<Credential, GatewayError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(GatewayError::AuthExpired);
            }
            Ok(Credential {
                token: format!("token-{n}"),
                expires_at: datetime!(2024-03-10 12:00:00 UTC) + Duration::hours(1),
            })
        }
    }

    fn cache(fail: bool) -> (SessionCache, Arc<CountingAuth>) {
        let auth = Arc::new(CountingAuth { refreshes: AtomicU32::new(0), fail });
        (SessionCache::new(auth.clone(), SessionCache::DEFAULT_TTL), auth)
    }

    #[tokio::test]
    async fn credential_is_cached_until_expiry() {
        let (cache, auth) = cache(false);
        let now = datetime!(2024-03-10 12:00:00 UTC);

        let first = cache.credential(now).await.unwrap();
        let again = cache.credential(now + Duration::minutes(2)).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);

        // The TTL caps the lifetime below the credential's own expiry.
        assert_eq!(first.expires_at, now + SessionCache::DEFAULT_TTL);
        let refreshed = cache.credential(now + Duration::minutes(6)).await.unwrap();
        assert_ne!(first.token, refreshed.token);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_failure_clears_cache_and_yields_none() {
        let (cache, auth) = cache(true);
        let now = datetime!(2024-03-10 12:00:00 UTC);
        assert!(cache.credential(now).await.is_none());
        assert!(cache.credential(now).await.is_none());
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let (cache, auth) = cache(false);
        let now = datetime!(2024-03-10 12:00:00 UTC);
        cache.credential(now).await.unwrap();
        cache.invalidate().await;
        cache.credential(now).await.unwrap();
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 2);
    }
}
