//! Subscription runner: the long-lived receive loop
//!
//! Replaces the callback-style handler registration of event-driven clients
//! with an explicit loop over a typed delivery stream. Each delivery is
//! handled on its own task, bounded by a semaphore; channel-level faults are
//! logged and counted but never exit the loop. Shutdown stops intake, drains
//! in-flight handlers, then returns.

use crate::pipeline;
use crate::stats::StatsTracker;
use crate::store::ItemStore;
use event_channel::{ChannelError, Delivery, DeliveryChannel};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of deliveries processed concurrently
    pub max_in_flight: usize,
    /// How often to renew the ack deadline of a still-running handler
    pub ack_extend_interval: Duration,
    /// Consumer identity recorded in stored documents and logs
    pub processed_by: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            ack_extend_interval: Duration::from_secs(30),
            processed_by: "item-ingest".to_string(),
        }
    }
}

pub struct SubscriptionRunner {
    channel: Arc<dyn DeliveryChannel>,
    store: Arc<dyn ItemStore>,
    stats: Arc<StatsTracker>,
    config: RunnerConfig,
}

impl SubscriptionRunner {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        store: Arc<dyn ItemStore>,
        stats: Arc<StatsTracker>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            channel,
            store,
            stats,
            config,
        }
    }

    /// Run until the shutdown signal flips, then drain in-flight deliveries
    ///
    /// Returns an error only if the delivery stream cannot be opened at all;
    /// that is a startup failure and the process should abort rather than run
    /// without a subscription.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ChannelError> {
        let mut deliveries = self.channel.deliveries().await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        tracing::info!(
            max_in_flight = self.config.max_in_flight,
            "subscription runner started"
        );

        loop {
            // Reap finished handlers so the set does not grow unbounded
            while in_flight.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("shutdown signal received, stopping intake");
                    break;
                }
                next = deliveries.next() => match next {
                    None => {
                        tracing::warn!("delivery stream ended");
                        break;
                    }
                    Some(Err(e)) => {
                        // Transport fault, not tied to one message: assumed
                        // transient, the client reconnects on its own
                        self.stats.record_error();
                        tracing::error!(error = %e, "channel error");
                    }
                    Some(Ok(delivery)) => {
                        let permit = match semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };

                        let store = self.store.clone();
                        let stats = self.stats.clone();
                        let processed_by = self.config.processed_by.clone();
                        let extend_interval = self.config.ack_extend_interval;

                        in_flight.spawn(async move {
                            handle_delivery(delivery, store, stats, processed_by, extend_interval)
                                .await;
                            drop(permit);
                        });
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!(in_flight = in_flight.len(), "draining in-flight deliveries");
        }
        while in_flight.join_next().await.is_some() {}

        tracing::info!("subscription runner stopped");
        Ok(())
    }
}

/// Process one delivery to its terminal outcome
///
/// While the pipeline runs, the ack deadline is renewed on a timer so long
/// store writes never silently expire into a duplicate redelivery. Exactly
/// one stats record and one ack/nack per delivery.
async fn handle_delivery(
    delivery: Delivery,
    store: Arc<dyn ItemStore>,
    stats: Arc<StatsTracker>,
    processed_by: String,
    extend_interval: Duration,
) {
    let started = Instant::now();

    let process = pipeline::process_delivery(&delivery, store.as_ref(), &processed_by);
    tokio::pin!(process);

    let mut extend = tokio::time::interval_at(
        tokio::time::Instant::now() + extend_interval,
        extend_interval,
    );

    let outcome = loop {
        tokio::select! {
            outcome = &mut process => break outcome,
            _ = extend.tick() => {
                if let Err(e) = delivery.extend_deadline().await {
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        error = %e,
                        "failed to extend ack deadline"
                    );
                }
            }
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(event) => {
            stats.record_success();
            tracing::info!(
                delivery_id = %delivery.id,
                item_id = %event.id,
                category = %event.category,
                redeliveries = delivery.redeliveries,
                elapsed_ms,
                "delivery processed"
            );
            if let Err(e) = delivery.ack().await {
                tracing::error!(delivery_id = %delivery.id, error = %e, "failed to ack delivery");
            }
        }
        Err(err) => {
            stats.record_error();
            tracing::error!(
                delivery_id = %delivery.id,
                kind = err.kind(),
                error = %err,
                elapsed_ms,
                "delivery failed, scheduling redelivery"
            );
            if let Err(e) = delivery.nack().await {
                tracing::error!(delivery_id = %delivery.id, error = %e, "failed to nack delivery");
            }
        }
    }
}
