use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A pending send request. Created on admission, removed by exactly one
/// delivery pass; never mutated in place (claimed_at aside).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedEmail {
    pub message_id: String,
    pub profile_id: i64,
    pub ip_address: String,
    /// JSON array of recipient addresses.
    pub to_email: String,
    pub cc_email: Option<String>,
    pub bcc_email: Option<String>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    /// JSON array of [`AttachmentPayload`].
    pub attachments: Option<String>,
    pub submitted_at: i64,
    pub send_at: i64,
    pub claimed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    pub content_type: String,
    pub content_base64: String,
}

impl QueuedEmail {
    pub fn to_list(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_str(&self.to_email)?)
    }

    pub fn cc_list(&self) -> Result<Vec<String>> {
        decode_optional_list(self.cc_email.as_deref())
    }

    pub fn bcc_list(&self) -> Result<Vec<String>> {
        decode_optional_list(self.bcc_email.as_deref())
    }

    pub fn attachment_list(&self) -> Result<Vec<AttachmentPayload>> {
        match self.attachments.as_deref() {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Vec::new()),
        }
    }
}

fn decode_optional_list(raw: Option<&str>) -> Result<Vec<String>> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Vec::new()),
    }
}
