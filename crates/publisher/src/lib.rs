use anyhow::Result;
use async_trait::async_trait;
use memesignal_core_types::Signal;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

mod feishu;

pub use self::feishu::FeishuPublisher;

/// A delivery sink for signals. Publishers are called sequentially by
/// the manager and must tolerate being called from one task at a time.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn type_name(&self) -> &'static str;

    async fn publish(&self, signal: &Signal) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Ordered fan-out with a per-publish deadline. One failing or slow
/// publisher never stops the rest, and the deadline bounds how long the
/// gate can stall behind a sink.
pub struct PublisherManager {
    publishers: Vec<Box<dyn Publisher>>,
    publish_timeout: Duration,
}

impl PublisherManager {
    pub fn new(publish_timeout: Duration) -> Self {
        Self {
            publishers: Vec::new(),
            publish_timeout,
        }
    }

    pub fn add_publisher(&mut self, publisher: Box<dyn Publisher>) {
        info!(publisher = publisher.type_name(), "publisher registered");
        self.publishers.push(publisher);
    }

    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }

    /// Deliver to every publisher in order; returns how many succeeded.
    pub async fn publish_all(&self, signal: &Signal) -> usize {
        let mut delivered = 0;
        for publisher in &self.publishers {
            match time::timeout(self.publish_timeout, publisher.publish(signal)).await {
                Ok(Ok(())) => {
                    info!(
                        publisher = publisher.type_name(),
                        signal_id = %signal.id,
                        token = %signal.token_address,
                        "signal published"
                    );
                    delivered += 1;
                }
                Ok(Err(error)) => {
                    warn!(
                        publisher = publisher.type_name(),
                        signal_id = %signal.id,
                        error = %error,
                        "publisher failed"
                    );
                }
                Err(_) => {
                    warn!(
                        publisher = publisher.type_name(),
                        signal_id = %signal.id,
                        timeout_ms = self.publish_timeout.as_millis() as u64,
                        "publisher deadline exceeded"
                    );
                }
            }
        }
        delivered
    }

    pub async fn close_all(&self) {
        for publisher in &self.publishers {
            if let Err(error) = publisher.close().await {
                warn!(
                    publisher = publisher.type_name(),
                    error = %error,
                    "publisher close failed"
                );
            }
        }
    }
}

/// Structured-log sink; always succeeds.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    fn type_name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, signal: &Signal) -> Result<()> {
        info!(
            signal_id = %signal.id,
            signal_type = %signal.signal_type,
            token = %signal.token_address,
            symbol = %signal.token_symbol,
            severity = signal.severity,
            confidence = signal.confidence,
            message = %signal.message,
            "trade signal"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
