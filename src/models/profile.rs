//! Sending profile: a per-tenant SMTP credential + rate-limit policy bundle.
//! Owned by the admin subsystem; the core only reads it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RateLimitStrategy {
    Reject,
    Delay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SmtpEncryption {
    None,
    /// Implicit TLS from the first byte (typically port 465).
    Ssl,
    /// STARTTLS upgrade (typically port 587).
    #[default]
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum admissions per interval; 0 disables rate limiting.
    pub max_count: i64,
    pub interval_minutes: i64,
    pub strategy: RateLimitStrategy,
}

impl RateLimitPolicy {
    pub fn interval_secs(&self) -> i64 {
        self.interval_minutes * 60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SendingProfile {
    pub id: i64,
    pub name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    #[serde(skip_serializing)]
    pub smtp_pass_encrypted: String,
    pub smtp_encryption: SmtpEncryption,
    pub from_email: String,
    pub from_name: Option<String>,
    pub rate_limit_count: i64,
    pub rate_limit_interval: i64,
    pub rate_limit_strategy: RateLimitStrategy,
    pub created_at: i64,
    pub updated_at: i64,
}
