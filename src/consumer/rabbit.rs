//! RabbitMQ transport for the work queue, built on `lapin`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Disposition, ErrorSink, MessageProcessor, WorkHandler};
use crate::config::BrokerSection;
use crate::errors::ConsumerError;
use crate::models::{ErrorEnvelope, WorkRequest};

/// Only one unacknowledged message is ever in flight.
const PREFETCH: u16 = 1;

/// Delay before retry number `attempt` (1-based): grows linearly with `base`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}

fn persistent_json() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type("application/json".into())
}

/// Connect with bounded, linearly backed-off retries.
///
/// Returns `Ok(None)` when `shutdown` fires while waiting between attempts.
pub async fn connect(
    config: &BrokerSection,
    connection_name: &str,
    shutdown: &CancellationToken,
) -> Result<Option<Connection>, ConsumerError> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        let props = ConnectionProperties::default().with_connection_name(connection_name.into());
        match Connection::connect(&config.url, props).await {
            Ok(connection) => {
                info!(attempt, connection_name, "connected to broker");
                return Ok(Some(connection));
            }
            Err(e) if attempt >= attempts => {
                error!(attempts, error = %e, "giving up on broker connection");
                return Err(ConsumerError::ConnectExhausted { attempts, source: e });
            }
            Err(e) => {
                let delay = backoff_delay(config.connect_backoff(), attempt);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "broker connection failed"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Declare the topic exchange, both durable queues and the work binding.
pub async fn declare_topology(channel: &Channel, config: &BrokerSection) -> Result<(), ConsumerError> {
    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(topology(&config.exchange))?;

    for queue in [&config.work_queue, &config.error_queue] {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(topology(queue))?;
    }

    channel
        .queue_bind(
            &config.work_queue,
            &config.exchange,
            &config.routing_pattern,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(topology(&config.work_queue))?;

    debug!(
        exchange = %config.exchange,
        work_queue = %config.work_queue,
        error_queue = %config.error_queue,
        pattern = %config.routing_pattern,
        "broker topology declared"
    );
    Ok(())
}

fn topology(object: &str) -> impl FnOnce(lapin::Error) -> ConsumerError {
    let object = object.to_string();
    move |source| ConsumerError::Topology { object, source }
}

async fn close(connection: Connection, reason: &str) {
    if let Err(e) = connection.close(200, reason).await {
        debug!(error = %e, "broker connection close failed");
    }
}

/// Publishes error envelopes to the error queue through the default exchange.
struct ChannelErrorSink {
    channel: Channel,
    queue: String,
}

#[async_trait]
impl ErrorSink for ChannelErrorSink {
    async fn publish_error(&self, envelope: &ErrorEnvelope) -> Result<()> {
        let body = serde_json::to_vec(envelope).context("Failed to encode error envelope")?;
        self.channel
            .basic_publish("", &self.queue, BasicPublishOptions::default(), &body, persistent_json())
            .await
            .context("Failed to publish error envelope")?
            .await
            .context("Error envelope was not confirmed")?;
        debug!(queue = %self.queue, "error envelope published");
        Ok(())
    }
}

/// Pulls work requests off the work queue one at a time.
pub struct RabbitConsumer {
    config: BrokerSection,
    handler: Arc<dyn WorkHandler>,
    consumer_tag: String,
}

impl RabbitConsumer {
    pub fn new(config: BrokerSection, handler: Arc<dyn WorkHandler>) -> Self {
        Self {
            config,
            handler,
            consumer_tag: format!("devagent-{}", Uuid::new_v4()),
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Consume until `shutdown` fires.
    ///
    /// `shutdown` only stops intake: a message already being processed runs
    /// to completion before this returns. `abort` is handed to the handler
    /// and cancels the in-flight job itself.
    pub async fn run(
        &self,
        shutdown: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        loop {
            let Some(connection) = connect(&self.config, &self.consumer_tag, shutdown).await? else {
                info!("shutdown requested before broker connection was established");
                return Ok(());
            };

            let result = self.consume(&connection, shutdown, abort).await;
            close(connection, "consumer stopping").await;

            match result {
                Err(ConsumerError::ConnectionLost(reason))
                    if self.config.reconnect && !shutdown.is_cancelled() =>
                {
                    warn!(%reason, "broker connection lost, reconnecting");
                }
                Err(e) => {
                    error!(error = %e, "consumer stopped");
                    return Err(e);
                }
                Ok(()) => {
                    info!("consumer stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn consume(
        &self,
        connection: &Connection,
        shutdown: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(topology("channel"))?;
        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(topology("qos"))?;
        declare_topology(&channel, &self.config).await?;

        let mut deliveries = channel
            .basic_consume(
                &self.config.work_queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(topology(&self.config.work_queue))?;

        let processor = MessageProcessor::new(
            self.handler.clone(),
            Arc::new(ChannelErrorSink {
                channel: channel.clone(),
                queue: self.config.error_queue.clone(),
            }),
        );
        info!(
            queue = %self.config.work_queue,
            consumer_tag = %self.consumer_tag,
            "waiting for messages"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting messages");
                    return Ok(());
                }
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(ConsumerError::ConnectionLost(e.to_string())),
                None => {
                    return Err(ConsumerError::ConnectionLost(
                        "delivery stream closed".to_string(),
                    ));
                }
            };

            let acked = match processor.process_delivery(&delivery.data, abort).await {
                Disposition::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
                Disposition::Reject { .. } => {
                    delivery
                        .acker
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await
                }
            };
            acked.map_err(|e| ConsumerError::ConnectionLost(e.to_string()))?;
        }
    }
}

/// Sends work requests to the topic exchange.
pub struct Publisher {
    connection: Connection,
    channel: Channel,
    config: BrokerSection,
}

impl Publisher {
    pub async fn connect(config: &BrokerSection) -> Result<Self, ConsumerError> {
        let name = format!("devagent-publisher-{}", Uuid::new_v4());
        let connection = connect(config, &name, &CancellationToken::new())
            .await?
            .ok_or_else(|| anyhow::anyhow!("broker connection was cancelled"))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(topology("channel"))?;
        declare_topology(&channel, config).await?;
        Ok(Self {
            connection,
            channel,
            config: config.clone(),
        })
    }

    /// Publish `request` and return the routing key it was sent with.
    pub async fn publish(&self, request: &WorkRequest) -> Result<String> {
        let routing_key = request.routing_key(self.config.routing_prefix());
        self.publish_raw(&routing_key, &serde_json::to_vec(request)?)
            .await?;
        info!(
            jira_issue_key = %request.jira_issue_key,
            %routing_key,
            "work request published"
        );
        Ok(routing_key)
    }

    /// Publish an arbitrary body to the exchange.
    pub async fn publish_raw(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        self.channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                persistent_json(),
            )
            .await
            .with_context(|| format!("Failed to publish to {}", self.config.exchange))?
            .await
            .context("Publish was not confirmed")?;
        Ok(())
    }

    pub async fn close(self) {
        close(self.connection, "publisher done").await;
    }
}
