//! Notification ingress route.
//!
//! Producers get a synchronous accept/reject here and nothing more: once a
//! job is enqueued, its delivery outcome is only observable through logs and
//! the dead-letter stream.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use courier_common::error::AppError;
use courier_common::types::NotificationJob;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications/send", post(send_notification))
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub recipient_id: String,
    pub recipient: String,
    pub subject: String,
    pub template_name: String,
    #[serde(default)]
    pub template_data: Map<String, Value>,
}

/// POST /notifications/send — Validate a request and enqueue it as a job.
async fn send_notification(
    State(state): State<AppState>,
    Json(req): Json<SendNotificationRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate(&req)?;

    let job = NotificationJob {
        recipient_user_id: req.recipient_id,
        to: req.recipient,
        subject: req.subject,
        template_name: req.template_name,
        template_data: req.template_data,
    };

    state.broker.enqueue(&job).await?;
    tracing::info!(user_id = %job.recipient_user_id, "Notification enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"message": "notification accepted for processing"})),
    ))
}

fn validate(req: &SendNotificationRequest) -> Result<(), AppError> {
    if req.recipient_id.trim().is_empty() {
        return Err(AppError::Validation("recipient_id is required".to_string()));
    }
    if !is_valid_email(&req.recipient) {
        return Err(AppError::Validation(
            "recipient must be a valid email address".to_string(),
        ));
    }
    if req.subject.trim().is_empty() {
        return Err(AppError::Validation("subject is required".to_string()));
    }
    if req.template_name.trim().is_empty() {
        return Err(AppError::Validation(
            "template_name is required".to_string(),
        ));
    }
    Ok(())
}

/// Syntactic email check: one `@`, non-empty local part, dotted domain.
fn is_valid_email(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
