//! # Delivery Channel Abstraction
//!
//! A platform-level abstraction for at-least-once message consumption.
//!
//! ## Why This Lives in Tier 1
//!
//! The delivery channel is a **shared runtime capability**: consumer services
//! depend on it without depending on each other, and the transport can be
//! swapped by configuration:
//!
//! - **NatsChannel**: production implementation using NATS JetStream pull
//!   consumers with explicit acknowledgment
//! - **InMemoryChannel**: dev/test implementation using in-memory queues with
//!   nack-triggered redelivery
//!
//! ## Delivery Contract
//!
//! The channel delivers each message at least once. A [`Delivery`] must be
//! resolved exactly once: `ack` removes it from the backlog, `nack` schedules
//! redelivery after the transport's backoff. Resolution is terminal: a second
//! ack/nack on the same delivery is detected, logged, and ignored. While a
//! handler is still working, `extend_deadline` renews the ack deadline so the
//! transport does not redeliver prematurely.
//!
//! ## Usage
//!
//! ```rust
//! use event_channel::{DeliveryChannel, InMemoryChannel};
//! use futures::StreamExt;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = InMemoryChannel::new();
//! channel.publish(b"{\"id\":\"a1\"}".to_vec(), HashMap::new())?;
//!
//! let mut deliveries = channel.deliveries().await?;
//! if let Some(Ok(delivery)) = deliveries.next().await {
//!     // process, then resolve exactly once
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod inmemory_channel;
mod nats_channel;

pub use inmemory_channel::InMemoryChannel;
pub use nats_channel::{NatsChannel, NatsChannelConfig};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors that can occur when using the delivery channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("failed to subscribe to deliveries: {0}")]
    SubscribeError(String),

    #[error("failed to receive delivery: {0}")]
    ReceiveError(String),

    #[error("failed to resolve delivery: {0}")]
    AckError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for delivery channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Transport-level acknowledgment capability for one delivery
///
/// Implementations do not need to guard against double resolution;
/// [`Delivery`] enforces the single-shot contract before calling in.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> ChannelResult<()>;
    async fn nack(&self) -> ChannelResult<()>;
    async fn extend_deadline(&self) -> ChannelResult<()>;
}

/// A message delivered from the channel, carrying its ack capability
///
/// Lifecycle: created by the transport on delivery, consumed exactly once by
/// the pipeline, destroyed after ack/nack resolution. `redeliveries` counts
/// prior delivery attempts (0 on first delivery).
pub struct Delivery {
    /// Transport-assigned delivery identifier
    pub id: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// String-keyed message attributes (from transport headers)
    pub attributes: HashMap<String, String>,
    /// Number of prior delivery attempts for this message
    pub redeliveries: u64,
    resolved: AtomicBool,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    /// Create a new delivery. Called by transport implementations.
    pub fn new(
        id: String,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
        redeliveries: u64,
        handle: Box<dyn AckHandle>,
    ) -> Self {
        Self {
            id,
            payload,
            attributes,
            redeliveries,
            resolved: AtomicBool::new(false),
            handle,
        }
    }

    /// Positively acknowledge: the transport removes the message permanently.
    ///
    /// Ignored (with a warning) if the delivery was already resolved.
    pub async fn ack(&self) -> ChannelResult<()> {
        if self.resolved.swap(true, Ordering::SeqCst) {
            tracing::warn!(delivery_id = %self.id, "delivery already resolved, ignoring ack");
            return Ok(());
        }
        self.handle.ack().await
    }

    /// Negatively acknowledge: the transport redelivers after its backoff.
    ///
    /// Ignored (with a warning) if the delivery was already resolved.
    pub async fn nack(&self) -> ChannelResult<()> {
        if self.resolved.swap(true, Ordering::SeqCst) {
            tracing::warn!(delivery_id = %self.id, "delivery already resolved, ignoring nack");
            return Ok(());
        }
        self.handle.nack().await
    }

    /// Renew the ack deadline for a delivery that is still being processed.
    ///
    /// No-op after resolution.
    pub async fn extend_deadline(&self) -> ChannelResult<()> {
        if self.resolved.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.handle.extend_deadline().await
    }

    /// Whether ack or nack has already been issued
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .field("attributes", &self.attributes)
            .field("redeliveries", &self.redeliveries)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Core abstraction for pull-based, at-least-once message consumption
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Open the delivery stream.
    ///
    /// Items are `Ok(Delivery)` for messages and `Err(ChannelError)` for
    /// transport-level faults that are not tied to one message. Receivers are
    /// expected to treat the latter as transient: log, count, keep receiving.
    async fn deliveries(&self) -> ChannelResult<BoxStream<'static, ChannelResult<Delivery>>>;

    /// Cheap liveness probe: the connection is up and the subscription
    /// exists. Never consumes messages.
    async fn check_connection(&self) -> ChannelResult<()>;
}

impl fmt::Debug for dyn DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeliveryChannel")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingHandle {
        acks: AtomicU64,
        nacks: AtomicU64,
        extends: AtomicU64,
    }

    #[async_trait]
    impl AckHandle for Arc<CountingHandle> {
        async fn ack(&self) -> ChannelResult<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn nack(&self) -> ChannelResult<()> {
            self.nacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn extend_deadline(&self) -> ChannelResult<()> {
            self.extends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delivery_with(handle: Arc<CountingHandle>) -> Delivery {
        Delivery::new(
            "1".to_string(),
            b"payload".to_vec(),
            HashMap::new(),
            0,
            Box::new(handle),
        )
    }

    #[tokio::test]
    async fn test_second_ack_is_ignored() {
        let handle = Arc::new(CountingHandle::default());
        let delivery = delivery_with(handle.clone());

        delivery.ack().await.unwrap();
        delivery.ack().await.unwrap();

        assert_eq!(handle.acks.load(Ordering::SeqCst), 1);
        assert!(delivery.is_resolved());
    }

    #[tokio::test]
    async fn test_nack_after_ack_is_ignored() {
        let handle = Arc::new(CountingHandle::default());
        let delivery = delivery_with(handle.clone());

        delivery.ack().await.unwrap();
        delivery.nack().await.unwrap();

        assert_eq!(handle.acks.load(Ordering::SeqCst), 1);
        assert_eq!(handle.nacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extend_before_and_after_resolution() {
        let handle = Arc::new(CountingHandle::default());
        let delivery = delivery_with(handle.clone());

        delivery.extend_deadline().await.unwrap();
        assert_eq!(handle.extends.load(Ordering::SeqCst), 1);

        delivery.nack().await.unwrap();

        // no-op once resolved
        delivery.extend_deadline().await.unwrap();
        assert_eq!(handle.extends.load(Ordering::SeqCst), 1);
    }
}
