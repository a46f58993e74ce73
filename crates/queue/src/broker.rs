//! Durable job queue over a stream broker.
//!
//! `StreamBroker` hands `NotificationJob`s from producers to a single
//! consumer with at-least-once delivery: publish with a bounded deadline,
//! blocking group reads, explicit ack, and an explicit dead-letter stream
//! for jobs the worker gives up on. Entry order is FIFO within the primary
//! stream; no order is guaranteed across the primary and dead-letter
//! streams.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;
use courier_common::types::NotificationJob;

use crate::transport::{PAYLOAD_FIELD, RedisTransport, StreamTransport};

/// Primary stream producers enqueue into.
pub const NOTIFICATIONS_STREAM: &str = "notifications";

/// Stream holding jobs that exhausted their delivery budget.
pub const DEAD_LETTER_STREAM: &str = "notifications:dlq";

/// Consumer group declared on both streams.
pub const CONSUMER_GROUP: &str = "notification-workers";

/// Stable consumer name, so a restarted process recovers its own
/// unacknowledged entries. One consumer per process by design.
const CONSUMER_NAME: &str = "notification-worker";

/// Deadline for a single publish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a group read blocks before re-checking for shutdown.
const READ_BLOCK: Duration = Duration::from_secs(5);

/// Errors produced by the queue broker.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("failed to encode job: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish deadline of {0:?} exceeded")]
    PublishTimeout(Duration),

    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("consume cancelled")]
    Cancelled,
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Serialization(e) => {
                AppError::Internal(format!("failed to encode job: {e}"))
            }
            other => AppError::Queue(other.to_string()),
        }
    }
}

/// Durable queue broker over a stream transport.
#[derive(Clone)]
pub struct StreamBroker<T> {
    transport: T,
    publish_timeout: Duration,
}

impl StreamBroker<RedisTransport> {
    /// Connect to the Redis-backed broker, retrying the initial connection
    /// a fixed number of times before failing fatally.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        Ok(Self::new(RedisTransport::connect(redis_url).await?))
    }
}

impl<T: StreamTransport> StreamBroker<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            publish_timeout: PUBLISH_TIMEOUT,
        }
    }

    /// Override the publish deadline.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Serialize a job and append it durably to the primary stream.
    pub async fn enqueue(&self, job: &NotificationJob) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;
        self.publish_with_deadline(
            NOTIFICATIONS_STREAM,
            vec![(PAYLOAD_FIELD.to_string(), payload)],
        )
        .await
    }

    /// Persist a job to the dead-letter stream, annotated with how many
    /// delivery attempts it consumed. The payload is the same serialized
    /// form the primary stream carries, so dead-lettered jobs round-trip.
    pub async fn enqueue_to_dlq(
        &self,
        job: &NotificationJob,
        attempts: u32,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;
        self.publish_with_deadline(
            DEAD_LETTER_STREAM,
            vec![
                (PAYLOAD_FIELD.to_string(), payload),
                ("attempts".to_string(), attempts.to_string().into_bytes()),
                (
                    "failed_at".to_string(),
                    chrono::Utc::now().to_rfc3339().into_bytes(),
                ),
            ],
        )
        .await
    }

    async fn publish_with_deadline(
        &self,
        stream: &str,
        fields: Vec<(String, Vec<u8>)>,
    ) -> Result<(), QueueError> {
        tokio::time::timeout(self.publish_timeout, self.transport.publish(stream, &fields))
            .await
            .map_err(|_| QueueError::PublishTimeout(self.publish_timeout))??;
        Ok(())
    }

    /// Block and feed dequeued jobs to `handler`, one at a time.
    ///
    /// Declares topology idempotently before the first read; a declaration
    /// failure is fatal. Per entry: an undecodable payload is dropped
    /// without ever invoking the handler, a handler success acks, and a
    /// handler error removes the entry without requeueing it — retry and
    /// dead-letter policy belong to the caller, not the broker.
    ///
    /// Returns `Err(QueueError::Cancelled)` once `shutdown` fires, observed
    /// within one blocked-read interval, or `Ok(())` when the subscription
    /// transport closes.
    pub async fn consume<F, Fut>(
        &self,
        shutdown: CancellationToken,
        handler: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(NotificationJob) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.declare_topology().await?;

        tracing::info!(
            stream = NOTIFICATIONS_STREAM,
            group = CONSUMER_GROUP,
            "Queue consumer started, waiting for jobs"
        );

        // Replay entries this consumer read but never acknowledged before a
        // previous shutdown or crash.
        let mut recovering = true;

        loop {
            if shutdown.is_cancelled() {
                tracing::info!("Shutdown requested, stopping queue consumer");
                return Err(QueueError::Cancelled);
            }

            let read = self.transport.read_group(
                NOTIFICATIONS_STREAM,
                CONSUMER_GROUP,
                CONSUMER_NAME,
                READ_BLOCK,
                recovering,
            );
            let entries = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping queue consumer");
                    return Err(QueueError::Cancelled);
                }
                result = read => match result {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!(error = %e, "Subscription stream closed, ending consume");
                        return Ok(());
                    }
                },
            };

            if entries.is_empty() {
                recovering = false;
                continue;
            }
            if recovering {
                tracing::info!(
                    count = entries.len(),
                    "Recovered unacknowledged entries from previous run"
                );
            }

            for entry in entries {
                let job: NotificationJob = match serde_json::from_slice(&entry.payload) {
                    Ok(job) => job,
                    Err(e) => {
                        // Corrupt payloads cannot become valid by replay;
                        // drop without requeue.
                        tracing::error!(
                            error = %e,
                            entry_id = %entry.id,
                            "Failed to decode job, dropping entry"
                        );
                        self.transport
                            .ack(NOTIFICATIONS_STREAM, CONSUMER_GROUP, &entry.id)
                            .await?;
                        continue;
                    }
                };

                match handler(job.clone()).await {
                    Ok(()) => {
                        tracing::info!(
                            user_id = %job.recipient_user_id,
                            entry_id = %entry.id,
                            "Job processed, acking"
                        );
                    }
                    Err(e) => {
                        // No requeue to the primary stream: retry policy
                        // lives in the delivery worker, and unbounded
                        // redelivery is worse than a logged loss.
                        tracing::error!(
                            user_id = %job.recipient_user_id,
                            entry_id = %entry.id,
                            error = %e,
                            "Handler failed, removing entry without requeue"
                        );
                    }
                }
                self.transport
                    .ack(NOTIFICATIONS_STREAM, CONSUMER_GROUP, &entry.id)
                    .await?;
            }
        }
    }

    /// Release the underlying transport.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.transport.close().await
    }

    async fn declare_topology(&self) -> Result<(), QueueError> {
        for stream in [NOTIFICATIONS_STREAM, DEAD_LETTER_STREAM] {
            self.transport
                .ensure_group(stream, CONSUMER_GROUP)
                .await
                .map_err(|e| QueueError::Topology(e.to_string()))?;
        }
        Ok(())
    }
}
