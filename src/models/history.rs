use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Terminal outcome record. Append-only; once a message_id lands here it
/// never re-enters the queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub message_id: String,
    pub profile_id: i64,
    pub ip_address: String,
    pub to_email: String,
    pub cc_email: Option<String>,
    pub bcc_email: Option<String>,
    pub subject: String,
    pub status: DeliveryStatus,
    pub status_info: Option<String>,
    /// Verbose transport diagnostic for operator debugging.
    pub smtp_transcript: Option<String>,
    pub submitted_at: i64,
    pub processed_at: i64,
}
