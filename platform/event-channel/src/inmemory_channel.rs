//! In-memory implementation of the DeliveryChannel trait for testing and development

use crate::{AckHandle, ChannelError, ChannelResult, Delivery, DeliveryChannel};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

struct QueuedDelivery {
    id: u64,
    payload: Vec<u8>,
    attributes: HashMap<String, String>,
    attempt: u64,
}

/// DeliveryChannel implementation using in-memory queues
///
/// This implementation is suitable for:
/// - Unit and pipeline tests (no external dependencies)
/// - Local development without Docker
///
/// It honors the at-least-once contract: a nacked delivery is re-enqueued
/// after `redelivery_delay`, with its attempt count incremented. Acked
/// deliveries are gone for good. There is a single consumer; `deliveries()`
/// can only be taken once.
///
/// # Example
/// ```rust
/// use event_channel::{DeliveryChannel, InMemoryChannel};
/// use futures::StreamExt;
/// use std::collections::HashMap;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = InMemoryChannel::new();
/// channel.publish(b"hello".to_vec(), HashMap::new())?;
///
/// let mut deliveries = channel.deliveries().await?;
/// let delivery = deliveries.next().await.unwrap()?;
/// assert_eq!(delivery.payload, b"hello");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
pub struct InMemoryChannel {
    sender: mpsc::UnboundedSender<QueuedDelivery>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedDelivery>>>,
    next_id: AtomicU64,
    redelivery_delay: Duration,
}

impl InMemoryChannel {
    /// Create a new in-memory channel with a 100ms redelivery delay
    pub fn new() -> Self {
        Self::with_redelivery_delay(Duration::from_millis(100))
    }

    /// Create a channel with a custom nack-to-redelivery delay
    ///
    /// Tests asserting "no side effect on failure" should pick a delay longer
    /// than their observation window; redelivery tests should pick a short one.
    pub fn with_redelivery_delay(redelivery_delay: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            next_id: AtomicU64::new(0),
            redelivery_delay,
        }
    }

    /// Enqueue a message for delivery
    ///
    /// Stands in for the upstream producer in tests; the production producer
    /// publishes through JetStream instead.
    pub fn publish(
        &self,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> ChannelResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender
            .send(QueuedDelivery {
                id,
                payload,
                attributes,
                attempt: 0,
            })
            .map_err(|_| ChannelError::InternalError("delivery queue closed".to_string()))
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemoryAckHandle {
    sender: mpsc::UnboundedSender<QueuedDelivery>,
    redelivery: Mutex<Option<QueuedDelivery>>,
    delay: Duration,
}

#[async_trait]
impl AckHandle for InMemoryAckHandle {
    async fn ack(&self) -> ChannelResult<()> {
        if let Ok(mut slot) = self.redelivery.lock() {
            slot.take();
        }
        Ok(())
    }

    async fn nack(&self) -> ChannelResult<()> {
        let queued = self
            .redelivery
            .lock()
            .map_err(|_| ChannelError::InternalError("redelivery slot poisoned".to_string()))?
            .take();

        if let Some(queued) = queued {
            let sender = self.sender.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = sender.send(queued);
            });
        }
        Ok(())
    }

    async fn extend_deadline(&self) -> ChannelResult<()> {
        // No deadline to renew: in-memory deliveries never expire
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for InMemoryChannel {
    async fn deliveries(&self) -> ChannelResult<BoxStream<'static, ChannelResult<Delivery>>> {
        let mut receiver = self
            .receiver
            .lock()
            .map_err(|_| ChannelError::InternalError("receiver slot poisoned".to_string()))?
            .take()
            .ok_or_else(|| {
                ChannelError::SubscribeError("deliveries stream already taken".to_string())
            })?;

        let sender = self.sender.clone();
        let delay = self.redelivery_delay;

        let stream = async_stream::stream! {
            while let Some(queued) = receiver.recv().await {
                let handle = InMemoryAckHandle {
                    sender: sender.clone(),
                    redelivery: Mutex::new(Some(QueuedDelivery {
                        id: queued.id,
                        payload: queued.payload.clone(),
                        attributes: queued.attributes.clone(),
                        attempt: queued.attempt + 1,
                    })),
                    delay,
                };

                yield Ok(Delivery::new(
                    queued.id.to_string(),
                    queued.payload,
                    queued.attributes,
                    queued.attempt,
                    Box::new(handle),
                ));
            }
        };

        Ok(stream.boxed())
    }

    async fn check_connection(&self) -> ChannelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_publish_and_deliver() {
        let channel = InMemoryChannel::new();
        channel
            .publish(b"payload".to_vec(), attrs(&[("eventType", "item.created")]))
            .unwrap();

        let mut deliveries = channel.deliveries().await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(1), deliveries.next())
            .await
            .expect("timeout")
            .expect("stream ended")
            .expect("channel error");

        assert_eq!(delivery.payload, b"payload");
        assert_eq!(
            delivery.attributes.get("eventType").map(String::as_str),
            Some("item.created")
        );
        assert_eq!(delivery.redeliveries, 0);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_attempt_count() {
        let channel = InMemoryChannel::with_redelivery_delay(Duration::from_millis(10));
        channel.publish(b"retry me".to_vec(), HashMap::new()).unwrap();

        let mut deliveries = channel.deliveries().await.unwrap();

        let first = deliveries.next().await.unwrap().unwrap();
        assert_eq!(first.redeliveries, 0);
        first.nack().await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(1), deliveries.next())
            .await
            .expect("timeout waiting for redelivery")
            .expect("stream ended")
            .expect("channel error");

        assert_eq!(second.payload, b"retry me");
        assert_eq!(second.id, first.id);
        assert_eq!(second.redeliveries, 1);
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_prevents_redelivery() {
        let channel = InMemoryChannel::with_redelivery_delay(Duration::from_millis(10));
        channel.publish(b"once".to_vec(), HashMap::new()).unwrap();

        let mut deliveries = channel.deliveries().await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();
        delivery.ack().await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), deliveries.next()).await;
        assert!(result.is_err(), "should timeout, acked delivery must not come back");
    }

    #[tokio::test]
    async fn test_deliveries_can_only_be_taken_once() {
        let channel = InMemoryChannel::new();
        let _stream = channel.deliveries().await.unwrap();

        let second = channel.deliveries().await;
        assert!(matches!(second, Err(ChannelError::SubscribeError(_))));
    }

    #[tokio::test]
    async fn test_check_connection_is_always_ready() {
        let channel = InMemoryChannel::new();
        assert!(channel.check_connection().await.is_ok());
    }
}
