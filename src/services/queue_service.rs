//! Durable FIFO-ish store of pending send requests.

use sqlx::{SqliteConnection, SqlitePool};

use crate::models::queue::QueuedEmail;

/// Upper bound on entries a single worker pass claims.
pub const DEFAULT_BATCH_SIZE: i64 = 20;

/// Claims older than this are considered abandoned (crashed worker) and may
/// be claimed again. Keeps delivery at-least-once across crash recovery.
const STALE_CLAIM_SECS: i64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// Generated message id collided. Caller should regenerate and retry once.
    #[error("duplicate message id")]
    DuplicateId,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub async fn enqueue(conn: &mut SqliteConnection, email: &QueuedEmail) -> Result<(), EnqueueError> {
    let res = sqlx::query(
        "INSERT INTO email_queue (
            message_id, profile_id, ip_address, to_email, cc_email, bcc_email,
            subject, body_html, body_text, attachments, submitted_at, send_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&email.message_id)
    .bind(email.profile_id)
    .bind(&email.ip_address)
    .bind(&email.to_email)
    .bind(&email.cc_email)
    .bind(&email.bcc_email)
    .bind(&email.subject)
    .bind(&email.body_html)
    .bind(&email.body_text)
    .bind(&email.attachments)
    .bind(email.submitted_at)
    .bind(email.send_at)
    .execute(conn)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(EnqueueError::DuplicateId)
        }
        Err(e) => Err(e.into()),
    }
}

/// Atomically claims up to `limit` due entries. A single UPDATE..RETURNING
/// statement marks and returns the rows, so concurrent callers can never
/// receive overlapping entries.
///
/// The `claimed_at` marker only outlives the claim if the caller commits it
/// without also deleting the row. The current worker claims and deletes in
/// one transaction, so the stale-reclaim branch matters for a worker that
/// commits its claims as a separate step.
pub async fn claim_batch(
    conn: &mut SqliteConnection,
    limit: i64,
    now: i64,
) -> Result<Vec<QueuedEmail>, sqlx::Error> {
    let mut rows: Vec<QueuedEmail> = sqlx::query_as(
        "UPDATE email_queue SET claimed_at = ?1
         WHERE message_id IN (
             SELECT message_id FROM email_queue
             WHERE send_at <= ?1 AND (claimed_at IS NULL OR claimed_at <= ?3)
             ORDER BY send_at ASC
             LIMIT ?2
         )
         RETURNING *",
    )
    .bind(now)
    .bind(limit)
    .bind(now - STALE_CLAIM_SECS)
    .fetch_all(conn)
    .await?;
    // RETURNING does not promise the subquery's ordering.
    rows.sort_by(|a, b| (a.send_at, &a.message_id).cmp(&(b.send_at, &b.message_id)));
    Ok(rows)
}

/// Idempotent: deleting an absent id is not an error.
pub async fn remove(conn: &mut SqliteConnection, message_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM email_queue WHERE message_id = ?")
        .bind(message_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn find(pool: &SqlitePool, message_id: &str) -> Result<Option<QueuedEmail>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM email_queue WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(pool)
        .await
}
