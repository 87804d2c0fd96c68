//! Append-only record of terminal delivery outcomes.

use sqlx::{SqliteConnection, SqlitePool};

use crate::models::history::{DeliveryStatus, HistoryEntry};
use crate::models::queue::QueuedEmail;

pub async fn record(
    conn: &mut SqliteConnection,
    email: &QueuedEmail,
    status: DeliveryStatus,
    status_info: Option<&str>,
    smtp_transcript: Option<&str>,
    processed_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO email_history (
            message_id, profile_id, ip_address, to_email, cc_email, bcc_email,
            subject, status, status_info, smtp_transcript, submitted_at, processed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&email.message_id)
    .bind(email.profile_id)
    .bind(&email.ip_address)
    .bind(&email.to_email)
    .bind(&email.cc_email)
    .bind(&email.bcc_email)
    .bind(&email.subject)
    .bind(status)
    .bind(status_info)
    .bind(smtp_transcript)
    .bind(email.submitted_at)
    .bind(processed_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn find(pool: &SqlitePool, message_id: &str) -> Result<Option<HistoryEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM email_history WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(pool)
        .await
}

/// Deletes entries processed before `cutoff`; returns how many went away.
pub async fn prune_older_than(pool: &SqlitePool, cutoff: i64) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("DELETE FROM email_history WHERE processed_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
