//! `GET /status?message_id=...`: queue first, then history. The token must
//! belong to the profile that owns the message.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::error::ApiError;
use crate::models::history::DeliveryStatus;
use crate::routes::{bearer_token, fmt_ts};
use crate::services::{auth_service, history_service, queue_service};

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    message_id: Option<String>,
}

pub async fn message_status(
    State(pool): State<SqlitePool>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?.to_owned();

    let message_id = query
        .message_id
        .filter(|id| {
            !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        .ok_or_else(|| {
            ApiError::Validation("A valid `message_id` is required as a URL parameter.".into())
        })?;

    if let Some(email) = queue_service::find(&pool, &message_id).await? {
        auth_service::authenticate(&pool, email.profile_id, &token).await?;
        let recipients: Vec<String> = email.to_list().unwrap_or_default();
        return Ok(Json(json!({
            "message_id": email.message_id,
            "status": "queued",
            "recipient": recipients,
            "queued_at": fmt_ts(email.submitted_at),
            "send_at": fmt_ts(email.send_at),
        })));
    }

    if let Some(entry) = history_service::find(&pool, &message_id).await? {
        auth_service::authenticate(&pool, entry.profile_id, &token).await?;
        let recipients: Vec<String> =
            serde_json::from_str(&entry.to_email).unwrap_or_default();
        let mut body = json!({
            "message_id": entry.message_id,
            "status": entry.status.as_str(),
            "recipient": recipients,
        });
        match entry.status {
            DeliveryStatus::Sent => {
                body["sent_at"] = json!(fmt_ts(entry.processed_at));
            }
            DeliveryStatus::Failed => {
                body["failed_at"] = json!(fmt_ts(entry.processed_at));
                body["error_message"] = json!(entry.status_info);
            }
        }
        return Ok(Json(body));
    }

    Err(ApiError::NotFound)
}
