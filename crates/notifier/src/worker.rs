//! Per-job delivery orchestration on top of the queue broker.
//!
//! For each dequeued job the worker first fires a best-effort live push,
//! then drives the authoritative email delivery through a bounded retry
//! loop, and finally routes exhausted jobs to the dead-letter stream. The
//! broker's ack/nack timing follows this handler's outcome, so a job leaves
//! the primary stream exactly once: either delivered or dead-lettered.

use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use courier_common::types::NotificationJob;
use courier_hub::Hub;
use courier_queue::{QueueError, StreamBroker, StreamTransport};

use crate::email::Notifier;

pub struct DeliveryWorker<T, N> {
    broker: StreamBroker<T>,
    hub: Hub,
    notifier: N,
    max_retries: u32,
    retry_delay: Duration,
}

impl<T: StreamTransport, N: Notifier> DeliveryWorker<T, N> {
    pub fn new(
        broker: StreamBroker<T>,
        hub: Hub,
        notifier: N,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            broker,
            hub,
            notifier,
            max_retries,
            retry_delay,
        }
    }

    /// Drain the queue until `shutdown` fires or the subscription ends.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
        self.broker
            .consume(shutdown, |job| self.deliver(job))
            .await
    }

    /// Drive the worker and cancel `shutdown` once it returns, whatever the
    /// cause. The binary ties the server's lifetime to the same token, so a
    /// consumer that dies takes the process down with it instead of leaving
    /// an ingress that accepts jobs nothing drains.
    pub async fn run_linked(&self, shutdown: CancellationToken) {
        match self.run(shutdown.clone()).await {
            Ok(()) => tracing::warn!("Delivery worker stopped: subscription ended"),
            Err(QueueError::Cancelled) => {
                tracing::info!("Delivery worker stopped: shutdown requested")
            }
            Err(e) => tracing::error!(error = %e, "Delivery worker exited with error"),
        }
        shutdown.cancel();
    }

    /// Handle one job. `Ok` means the job is done with the primary queue:
    /// delivered, or persisted to the dead-letter stream.
    async fn deliver(&self, job: NotificationJob) -> anyhow::Result<()> {
        self.push_live_notification(&job).await;

        for attempt in 1..=self.max_retries {
            match self
                .notifier
                .send(&job.to, &job.subject, &job.template_name, &job.template_data)
                .await
            {
                Ok(()) => {
                    tracing::info!(to = %job.to, attempt, "Notification delivered");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        to = %job.to,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Delivery attempt failed"
                    );
                }
            }
            if attempt < self.max_retries {
                // Not a cancellation point: the broker removes the entry on
                // any handler return, so bailing out here would drop the job
                // neither delivered nor dead-lettered.
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::error!(
            to = %job.to,
            attempts = self.max_retries,
            "Delivery attempts exhausted, dead-lettering job"
        );
        self.broker
            .enqueue_to_dlq(&job, self.max_retries)
            .await
            .context("failed to persist job to dead-letter stream")?;
        Ok(())
    }

    /// Supplementary push to a live connection. The outcome is logged and
    /// never affects the job's fate.
    async fn push_live_notification(&self, job: &NotificationJob) {
        if job.recipient_user_id.is_empty() {
            return;
        }
        let payload = json!({
            "type": "new_notification",
            "subject": job.subject,
        });
        if self
            .hub
            .send_to_user(&job.recipient_user_id, payload)
            .await
        {
            tracing::debug!(user_id = %job.recipient_user_id, "Live push delivered");
        } else {
            tracing::debug!(
                user_id = %job.recipient_user_id,
                "Recipient has no live connection, skipping push"
            );
        }
    }
}
