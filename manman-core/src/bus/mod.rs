//! Broker plumbing: one topic exchange, per-server command queues, shared
//! status queues, manual acknowledgement.
//!
//! Delivery is at-least-once; handlers are idempotent. A handler error
//! whose kind is permanent is negatively acknowledged without requeue so
//! the broker does not redeliver forever; everything else is requeued.

pub mod messages;
pub mod topics;

use std::future::Future;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::retry::{with_backoff, RetryPolicy};

/// Shared broker handle: one connection per process, channels per task.
pub struct Broker {
    connection: Connection,
    publish_channel: Channel,
}

impl Broker {
    /// Connect with the standard retry envelope and declare the exchange.
    pub async fn connect(url: &str, policy: RetryPolicy) -> Result<Self> {
        let connection = with_backoff("broker connect", policy, || async {
            Connection::connect(url, ConnectionProperties::default())
                .await
                .map_err(Error::from)
        })
        .await?;

        let publish_channel = connection.create_channel().await?;
        publish_channel
            .exchange_declare(
                topics::EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(target: "manman::bus", "broker connected");
        Ok(Self {
            connection,
            publish_channel,
        })
    }

    /// Declare a durable queue and bind it to the given routing patterns.
    pub async fn declare_queue(&self, queue: &str, patterns: &[&str]) -> Result<()> {
        self.publish_channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        for pattern in patterns {
            self.publish_channel
                .queue_bind(
                    queue,
                    topics::EXCHANGE,
                    pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }
        Ok(())
    }

    /// Publish a JSON payload to a routing key on the topic exchange.
    pub async fn publish_json<T: Serialize>(&self, routing_key: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| Error::internal(format!("serialize {routing_key}: {e}")))?;
        self.publish_channel
            .basic_publish(
                topics::EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Open a dedicated channel (one per consumer task).
    pub async fn create_channel(&self) -> Result<Channel> {
        Ok(self.connection.create_channel().await?)
    }

    /// Close the connection, flushing outstanding frames.
    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "shutdown").await {
            tracing::warn!(target: "manman::bus", error = %e, "broker close failed");
        }
    }
}

/// Consume a queue until cancelled, acking per the handler outcome.
///
/// `prefetch = 1` preserves per-queue FIFO handling; higher values allow
/// pipelining where ordering does not matter.
pub async fn consume<F, Fut>(
    channel: Channel,
    queue: &str,
    consumer_tag: &str,
    prefetch: u16,
    cancel: CancellationToken,
    handler: F,
) -> Result<()>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;
    let mut consumer = channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    tracing::warn!(target: "manman::bus", %queue, error = %e, "delivery error");
                    continue;
                }
                None => break,
            },
        };

        match handler(delivery.data.clone()).await {
            Ok(()) => {
                delivery.ack(BasicAckOptions::default()).await?;
            }
            Err(err) if err.is_permanent() => {
                tracing::error!(
                    target: "manman::bus",
                    %queue,
                    error = %err,
                    "permanent handler failure, dropping message"
                );
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?;
            }
            Err(err) => {
                tracing::warn!(
                    target: "manman::bus",
                    %queue,
                    error = %err,
                    "transient handler failure, requeueing"
                );
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
            }
        }
    }

    tracing::info!(target: "manman::bus", %queue, "consumer stopped");
    Ok(())
}

/// Default retry policy for broker connections.
pub fn connect_policy() -> RetryPolicy {
    RetryPolicy::new(5, std::time::Duration::from_secs(2))
}
