//! Queue intake: decode each delivery, hand it to the orchestrator, decide
//! whether the broker should ack it or dead-letter it.
//!
//! The broker-facing half lives in [`rabbit`]; everything here is
//! transport-agnostic so it can be exercised without a running broker.

pub mod rabbit;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::{ErrorEnvelope, WorkRequest};
use crate::orchestrator::Orchestrator;

pub use rabbit::{Publisher, RabbitConsumer};

/// What the transport should do with a delivery once processing finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Negative-acknowledge without requeue. The error envelope has already
    /// been offered to the error queue.
    Reject { error: String },
}

/// Runs one decoded request to completion.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, request: &WorkRequest, cancel: &CancellationToken) -> Result<()>;
}

#[async_trait]
impl WorkHandler for Orchestrator {
    async fn handle(&self, request: &WorkRequest, cancel: &CancellationToken) -> Result<()> {
        self.process(request, cancel).await?;
        Ok(())
    }
}

/// Destination for messages that could not be processed.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn publish_error(&self, envelope: &ErrorEnvelope) -> Result<()>;
}

/// Decodes raw deliveries and dispatches them to a [`WorkHandler`].
#[derive(Clone)]
pub struct MessageProcessor {
    handler: Arc<dyn WorkHandler>,
    errors: Arc<dyn ErrorSink>,
}

impl MessageProcessor {
    pub fn new(handler: Arc<dyn WorkHandler>, errors: Arc<dyn ErrorSink>) -> Self {
        Self { handler, errors }
    }

    /// Process one raw message body.
    ///
    /// Never fails: every outcome maps onto a [`Disposition`]. `cancel` is
    /// forwarded to the handler and aborts the in-flight job when fired.
    pub async fn process_delivery(&self, body: &[u8], cancel: &CancellationToken) -> Disposition {
        info!(body_size = body.len(), "message received");

        let request: WorkRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                let message = format!("Invalid JSON: {}", e);
                warn!(body_size = body.len(), error = %message, "failed to decode message");
                return self.reject(body, message).await;
            }
        };

        match self.handler.handle(&request, cancel).await {
            Ok(()) => {
                info!(jira_issue_key = %request.jira_issue_key, "message processed");
                Disposition::Ack
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    jira_issue_key = %request.jira_issue_key,
                    error = %message,
                    "message processing failed"
                );
                self.reject(body, message).await
            }
        }
    }

    async fn reject(&self, body: &[u8], message: String) -> Disposition {
        let envelope = ErrorEnvelope::new(body, message.clone());
        if let Err(e) = self.errors.publish_error(&envelope).await {
            error!(error = %e, "failed to publish to error queue");
        }
        Disposition::Reject { error: message }
    }
}
