//! Authoritative notification delivery over an HTTP email provider.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thiserror::Error;

use courier_common::config::AppConfig;

/// Errors from the authoritative delivery channel. All of them are treated
/// as transient by the delivery worker and retried within its budget.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Capability that performs the authoritative delivery of one notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template_name: &str,
        data: &Map<String, Value>,
    ) -> Result<(), NotifyError>;
}

/// Sends templated email through a Resend-style HTTP API.
///
/// Template rendering happens provider-side: the request carries the
/// template name and its data verbatim.
pub struct EmailNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl EmailNotifier {
    pub fn new(config: &AppConfig) -> Self {
        if config.email_api_key.is_none() {
            tracing::warn!(
                "EMAIL_API_KEY not set — email delivery will be simulated, not sent"
            );
        }
        Self {
            client: reqwest::Client::new(),
            api_url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template_name: &str,
        data: &Map<String, Value>,
    ) -> Result<(), NotifyError> {
        let Some(api_key) = &self.api_key else {
            tracing::info!(to, template = template_name, "Simulated email send");
            return Ok(());
        };

        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "template": template_name,
            "data": data,
        });

        tracing::debug!(to, template = template_name, "Sending email");
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!(
                "provider returned {status}: {detail}"
            )));
        }
        Ok(())
    }
}
