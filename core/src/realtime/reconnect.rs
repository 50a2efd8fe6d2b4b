/// Backoff policy for establishing the streaming connection.
/// Wraps any connector; the connection contract itself never retries.
use super::connection::{Connector, Transport};
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first one; 1 disables retrying
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 3,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// `min(initial * 2^retry, max)`
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(20));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Base delay scaled by a random factor in [0.5, 1.0]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let scale: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        self.base_delay(retry).mul_f64(scale)
    }
}

pub struct RetryingConnector<C> {
    inner: C,
    policy: ReconnectPolicy,
}

impl<C: Connector> RetryingConnector<C> {
    pub fn new(inner: C, policy: ReconnectPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C: Connector> Connector for RetryingConnector<C> {
    async fn connect(&self, identity: &Identity) -> Result<Transport> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                debug!("Retrying connection for {} in {:?}", identity.nickname(), delay);
                sleep(delay).await;
            }

            match self.inner.connect(identity).await {
                Ok(transport) => {
                    if attempt > 0 {
                        info!(
                            "Connected {} after {} attempts",
                            identity.nickname(),
                            attempt + 1
                        );
                    }
                    return Ok(transport);
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        attempts,
                        identity.nickname(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ChatError::Connection("no connection attempt made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delays_grow_and_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts: 10,
        };
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay(4), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(1000));

        for retry in 0..8 {
            let base = policy.base_delay(retry);
            let delay = policy.delay_for(retry);
            assert!(delay >= base / 2 && delay <= base, "{:?} vs {:?}", delay, base);
        }
    }

    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for Flaky {
        async fn connect(&self, _identity: &Identity) -> Result<Transport> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ChatError::Connection("refused".to_string()));
            }
            Ok(Transport::pair(4).0)
        }
    }

    fn quick(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = RetryingConnector::new(
            Flaky {
                failures: 2,
                calls: calls.clone(),
            },
            quick(3),
        );
        let identity = Identity::new("alice", None).unwrap();
        assert!(connector.connect(&identity).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = RetryingConnector::new(
            Flaky {
                failures: 5,
                calls: calls.clone(),
            },
            quick(2),
        );
        let identity = Identity::new("alice", None).unwrap();
        assert!(matches!(
            connector.connect(&identity).await,
            Err(ChatError::Connection(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
