//! `POST /send`: authenticate, admit (rate limit), enqueue.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::db;
use crate::error::ApiError;
use crate::models::queue::{AttachmentPayload, QueuedEmail};
use crate::routes::{bearer_token, client_ip, fmt_ts};
use crate::services::queue_service::EnqueueError;
use crate::services::rate_limit_service::Admission;
use crate::services::{auth_service, queue_service, rate_limit_service};

/// A recipient field that accepts a single address or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    profile_id: Option<i64>,
    to_email: Option<OneOrMany>,
    #[serde(default)]
    cc_email: Option<OneOrMany>,
    #[serde(default)]
    bcc_email: Option<OneOrMany>,
    subject: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    body_text: Option<String>,
    #[serde(default)]
    attachments: Option<Vec<AttachmentPayload>>,
}

pub async fn send_email(
    State(pool): State<SqlitePool>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?.to_owned();

    let req: SendRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("Invalid JSON payload.".into()))?;

    let profile_id = req
        .profile_id
        .ok_or_else(|| ApiError::Validation("`profile_id` is required and must be an integer.".into()))?;

    let to_list = req
        .to_email
        .map(OneOrMany::into_vec)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation("A valid `to_email` is required.".into()))?;
    validate_addresses(&to_list, "to_email")?;

    let cc_list = req.cc_email.map(OneOrMany::into_vec).unwrap_or_default();
    validate_addresses(&cc_list, "cc_email")?;
    let bcc_list = req.bcc_email.map(OneOrMany::into_vec).unwrap_or_default();
    validate_addresses(&bcc_list, "bcc_email")?;

    let subject = req
        .subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Validation("`subject` is required.".into()))?;

    let body_html = req.body_html.filter(|s| !s.trim().is_empty());
    let body_text = req.body_text.filter(|s| !s.trim().is_empty());
    if body_html.is_none() && body_text.is_none() {
        return Err(ApiError::Validation(
            "Either `body_html` or `body_text` must be provided.".into(),
        ));
    }

    let policy = auth_service::authenticate(&pool, profile_id, &token).await?;

    let ip_address = client_ip(&headers, connect_info.map(|ConnectInfo(a)| a));
    let now = db::now_epoch();

    // Admission and enqueue share one transaction so the count-then-reserve
    // window cannot be raced past by concurrent submissions.
    let mut tx = pool.begin().await?;
    let send_at =
        match rate_limit_service::admit(&mut tx, profile_id, &ip_address, &policy, now).await? {
            Admission::Deny => {
                // The decision may have planted a block row; keep it.
                tx.commit().await?;
                return Err(ApiError::RateLimited);
            }
            Admission::Allow { send_at } => send_at,
        };

    let mut email = QueuedEmail {
        message_id: Uuid::new_v4().to_string(),
        profile_id,
        ip_address,
        to_email: encode_list(&to_list),
        cc_email: encode_optional_list(&cc_list),
        bcc_email: encode_optional_list(&bcc_list),
        subject,
        body_html,
        body_text,
        attachments: match req.attachments.filter(|a| !a.is_empty()) {
            Some(atts) => Some(encode_list(&atts)),
            None => None,
        },
        submitted_at: now,
        send_at,
        claimed_at: None,
    };

    match queue_service::enqueue(&mut tx, &email).await {
        Ok(()) => {}
        Err(EnqueueError::DuplicateId) => {
            // Cryptographically negligible; one regeneration is enough.
            email.message_id = Uuid::new_v4().to_string();
            queue_service::enqueue(&mut tx, &email).await.map_err(|e| match e {
                EnqueueError::DuplicateId => ApiError::Persistence(sqlx::Error::Protocol(
                    "message id collision persisted after retry".into(),
                )),
                EnqueueError::Db(e) => ApiError::Persistence(e),
            })?;
        }
        Err(EnqueueError::Db(e)) => return Err(e.into()),
    }
    tx.commit().await?;

    tracing::info!(
        message_id = %email.message_id,
        profile_id,
        delayed = send_at > now,
        "email queued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "queued",
            "message_id": email.message_id,
            "send_at": fmt_ts(send_at),
        })),
    ))
}

fn validate_addresses(list: &[String], field: &str) -> Result<(), ApiError> {
    for addr in list {
        addr.parse::<lettre::Address>()
            .map_err(|_| ApiError::Validation(format!("A valid `{field}` is required.")))?;
    }
    Ok(())
}

// Serializing vectors of strings/payloads cannot fail.
fn encode_list<T: Serialize>(list: &[T]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".into())
}

fn encode_optional_list(list: &[String]) -> Option<String> {
    if list.is_empty() {
        None
    } else {
        Some(encode_list(list))
    }
}
