use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use chatgate_protocol::GatewayError;

use crate::fingerprint::FingerprintId;
use crate::ledger::LedgerBook;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous(FingerprintId),
    User(i64),
}

#[derive(Debug, Clone)]
pub struct RemoteQuota {
    pub count: u32,
    pub limit: u32,
    pub tier: String,
}

/// Remote per-user counter for the authenticated tier.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn fetch(&self, user_id: i64) -> Result<RemoteQuota, GatewayError>;
    async fn increment(&self, user_id: i64) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    /// Messages allowed before the burst window applies. Heuristic
    /// threshold carried over from production behavior; configurable.
    pub burst_threshold: u32,
    pub burst_window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 10,
            burst_threshold: 2,
            burst_window: Duration::seconds(2),
        }
    }
}

pub struct QuotaGate {
    ledger: LedgerBook,
    remote: Arc<dyn QuotaStore>,
    config: QuotaConfig,
}

impl QuotaGate {
    pub fn new(ledger: LedgerBook, remote: Arc<dyn QuotaStore>, config: QuotaConfig) -> Self {
        Self { ledger, remote, config }
    }

    /// Decides whether a request may proceed. Denials are typed errors so
    /// callers can render remaining budget and reset time.
    pub async fn authorize(
        &self,
        identity: &Identity,
        now: OffsetDateTime,
    ) -> Result<(), GatewayError> {
        match identity {
            Identity::User(user_id) => {
                let quota = self.remote.fetch(*user_id).await?;
                if quota.count >= quota.limit {
                    return Err(GatewayError::QuotaExceeded {
                        limit: quota.limit,
                        current: quota.count,
                        tier: quota.tier,
                    });
                }
                Ok(())
            }
            Identity::Anonymous(fingerprint) => {
                let ledger = self.ledger.load(fingerprint, now);
                if ledger.count >= self.config.daily_limit {
                    return Err(GatewayError::QuotaExceeded {
                        limit: self.config.daily_limit,
                        current: ledger.count,
                        tier: "anonymous".to_string(),
                    });
                }
                let elapsed = now - ledger.session_start;
                if ledger.count >= self.config.burst_threshold && elapsed < self.config.burst_window
                {
                    debug!(fingerprint = %fingerprint, count = ledger.count, "burst rule tripped");
                    return Err(GatewayError::RateLimited(
                        "too many messages in a short burst".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Called exactly once after an `authorize` success, before the stream
    /// begins, so the budget decrements regardless of later stream failure.
    pub async fn record(&self, identity: &Identity, now: OffsetDateTime) -> Result<(), GatewayError> {
        match identity {
            Identity::User(user_id) => self.remote.increment(*user_id).await,
            Identity::Anonymous(fingerprint) => {
                self.ledger.record(fingerprint, now);
                Ok(())
            }
        }
    }
}
