//! NATS JetStream implementation of the DeliveryChannel trait

use crate::{AckHandle, ChannelError, ChannelResult, Delivery, DeliveryChannel};
use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::{self, stream, AckKind, Context, Message};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// Stream and consumer settings for a JetStream-backed channel
#[derive(Debug, Clone)]
pub struct NatsChannelConfig {
    /// JetStream stream holding the event subjects
    pub stream_name: String,
    /// Subjects captured by the stream
    pub subjects: Vec<String>,
    /// Durable consumer name (one per consuming service)
    pub consumer_name: String,
    /// Ack deadline; deliveries not resolved within it are redelivered
    pub ack_wait: Duration,
    /// Retention for messages in the stream
    pub max_age: Duration,
}

impl Default for NatsChannelConfig {
    fn default() -> Self {
        Self {
            stream_name: "ITEM_EVENTS".to_string(),
            subjects: vec!["items.events.>".to_string()],
            consumer_name: "item-ingest".to_string(),
            ack_wait: Duration::from_secs(60),
            max_age: Duration::from_secs(60 * 60 * 24 * 14), // 14 days
        }
    }
}

/// DeliveryChannel implementation using NATS JetStream pull consumers
///
/// This is the production implementation. Explicit ack policy gives the
/// at-least-once contract: unresolved deliveries come back after `ack_wait`,
/// nacked deliveries come back after the server's backoff, and
/// `AckKind::Progress` renews the deadline for long-running handlers.
///
/// # Example
/// ```rust,no_run
/// use event_channel::{NatsChannel, NatsChannelConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let channel = NatsChannel::connect(client, NatsChannelConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct NatsChannel {
    client: Client,
    context: Context,
    config: NatsChannelConfig,
}

impl NatsChannel {
    /// Provision the stream (if missing) and wrap the client
    ///
    /// # Arguments
    /// * `client` - An already-connected `async_nats::Client`
    /// * `config` - Stream/consumer settings
    pub async fn connect(client: Client, config: NatsChannelConfig) -> ChannelResult<Self> {
        let context = jetstream::new(client.clone());

        let stream_cfg = stream::Config {
            name: config.stream_name.clone(),
            subjects: config.subjects.clone(),
            max_age: config.max_age,
            ..Default::default()
        };

        if context.get_stream(&config.stream_name).await.is_err() {
            context
                .create_stream(stream_cfg)
                .await
                .map_err(|e| ChannelError::ConnectionError(e.to_string()))?;
        }

        Ok(Self {
            client,
            context,
            config,
        })
    }

    /// Get a reference to the underlying NATS client
    ///
    /// Useful for advanced use cases that need NATS features not exposed
    /// through the DeliveryChannel trait.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn into_delivery(msg: Message) -> Delivery {
    // Delivery id and attempt count come from the JetStream metadata in the
    // reply subject; `delivered` is 1 on the first attempt.
    let (id, redeliveries) = match msg.info() {
        Ok(info) => (
            info.stream_sequence.to_string(),
            (info.delivered.max(1) - 1) as u64,
        ),
        Err(_) => ("unknown".to_string(), 0),
    };

    let payload = msg.payload.to_vec();

    let mut attributes = HashMap::new();
    if let Some(nats_headers) = msg.headers.as_ref() {
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                attributes.insert(key.to_string(), value.to_string());
            }
        }
    }

    Delivery::new(id, payload, attributes, redeliveries, Box::new(NatsAckHandle { msg }))
}

struct NatsAckHandle {
    msg: Message,
}

#[async_trait]
impl AckHandle for NatsAckHandle {
    async fn ack(&self) -> ChannelResult<()> {
        self.msg
            .ack()
            .await
            .map_err(|e| ChannelError::AckError(e.to_string()))
    }

    async fn nack(&self) -> ChannelResult<()> {
        // No delay override: the server applies its own backoff policy
        self.msg
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| ChannelError::AckError(e.to_string()))
    }

    async fn extend_deadline(&self) -> ChannelResult<()> {
        self.msg
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| ChannelError::AckError(e.to_string()))
    }
}

#[async_trait]
impl DeliveryChannel for NatsChannel {
    async fn deliveries(&self) -> ChannelResult<BoxStream<'static, ChannelResult<Delivery>>> {
        let js_stream = self
            .context
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| ChannelError::SubscribeError(e.to_string()))?;

        let consumer = js_stream
            .get_or_create_consumer(
                &self.config.consumer_name,
                pull::Config {
                    durable_name: Some(self.config.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ChannelError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| ChannelError::SubscribeError(e.to_string()))?;

        let stream = messages.map(|next| match next {
            Ok(msg) => Ok(into_delivery(msg)),
            Err(e) => Err(ChannelError::ReceiveError(e.to_string())),
        });

        Ok(stream.boxed())
    }

    async fn check_connection(&self) -> ChannelResult<()> {
        if self.client.connection_state() != async_nats::connection::State::Connected {
            return Err(ChannelError::ConnectionError(
                "NATS connection is not established".to_string(),
            ));
        }

        self.context
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| {
                ChannelError::ConnectionError(format!(
                    "stream {} not reachable: {}",
                    self.config.stream_name, e
                ))
            })?;

        Ok(())
    }
}
