//! [`Publisher`] – bounded-retry delivery to the broker.
//!
//! Each message gets at most `max_attempts` publish attempts with a fixed
//! delay between them.  After the last failure the message is dropped and a
//! [`BridgeError::Delivery`] is returned; there is no dead-letter queue.
//! The total time spent on one message is bounded by
//! `(max_attempts - 1) * retry_delay` plus the attempts themselves, which is
//! what keeps worker shutdown bounded.

use std::sync::Arc;
use std::time::Duration;

use busbridge_middleware::MessageBroker;
use busbridge_types::BridgeError;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Publishes text payloads with bounded retry.  Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn MessageBroker>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Publisher {
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(broker: Arc<dyn MessageBroker>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            broker,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deliver `text` to `topic`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Delivery`] once every attempt has failed; it carries the
    /// last broker error.
    pub async fn publish(&self, topic: &str, text: &str) -> Result<(), BridgeError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.broker.publish(topic, text.as_bytes()).await {
                Ok(()) => {
                    debug!(topic = %topic, payload = %text, attempt, "published");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        topic = %topic,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        error!(topic = %topic, payload = %text, "giving up on message after bounded retry");
        Err(BridgeError::Delivery {
            topic: topic.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use busbridge_types::InboundMessage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    /// Broker that fails the first `failures` publishes.
    struct FlakyBroker {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyBroker {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicU32::new(0),
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageBroker for FlakyBroker {
        async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), BridgeError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(BridgeError::Broker(format!("attempt {n} refused")))
            } else {
                Ok(())
            }
        }

        async fn subscribe(
            &self,
            _filter: &str,
        ) -> Result<broadcast::Receiver<InboundMessage>, BridgeError> {
            Err(BridgeError::Broker("not supported".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let broker = FlakyBroker::new(2);
        let publisher = Publisher::new(broker.clone(), 3, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        assert!(publisher.publish("MediaStatus", "Playing").await.is_ok());

        assert_eq!(broker.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_link_exhausts_retry_bound() {
        let broker = FlakyBroker::new(u32::MAX);
        let publisher = Publisher::new(broker.clone(), 3, Duration::from_secs(1));

        let err = publisher
            .publish("MediaStatus", "Playing")
            .await
            .expect_err("must give up");

        assert_eq!(broker.attempts(), 3);
        match err {
            BridgeError::Delivery {
                topic,
                attempts,
                last_error,
            } => {
                assert_eq!(topic, "MediaStatus");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("attempt 3"));
            }
            other => panic!("expected Delivery error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_makes_one_attempt_without_delay() {
        let broker = FlakyBroker::new(0);
        let publisher = Publisher::new(broker.clone(), 3, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        publisher.publish("t", "x").await.expect("publish");
        assert_eq!(broker.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_attempts_is_clamped_to_one() {
        let broker = FlakyBroker::new(u32::MAX);
        let publisher = Publisher::new(broker.clone(), 0, Duration::ZERO);
        assert_eq!(publisher.max_attempts(), 1);
        assert!(publisher.publish("t", "x").await.is_err());
        assert_eq!(broker.attempts(), 1);
    }
}
