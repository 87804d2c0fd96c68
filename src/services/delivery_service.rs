//! The delivery worker: claims due queue entries, speaks SMTP through the
//! profile's credentials, and records exactly one terminal history entry per
//! entry before removing it from the queue.
//!
//! The whole batch runs inside one transaction. A database-level failure
//! rolls everything back so the next tick reprocesses the same batch; on
//! crash recovery this yields at-least-once delivery, so duplicate sends are
//! possible and accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::time::sleep;

use crate::crypto::SecretCipher;
use crate::db;
use crate::models::history::DeliveryStatus;
use crate::models::profile::SendingProfile;
use crate::models::queue::QueuedEmail;
use crate::services::{history_service, queue_service};

/// Structured SMTP failure: a short human-readable message plus an optional
/// verbose diagnostic for the history log.
#[derive(Debug)]
pub struct TransportFailure {
    pub message: String,
    pub transcript: Option<String>,
}

/// Seam over the actual SMTP transport so the worker can be exercised with
/// fakes in tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(
        &self,
        profile: &SendingProfile,
        smtp_password: &str,
        email: &QueuedEmail,
    ) -> Result<(), TransportFailure>;
}

enum Outcome {
    Sent,
    Failed {
        info: String,
        transcript: Option<String>,
    },
}

/// One unit of work: claim, deliver, log, delete. Returns how many entries
/// reached a terminal state.
pub async fn process_batch(
    pool: &SqlitePool,
    mailer: &dyn MailTransport,
    cipher: &SecretCipher,
    batch_size: i64,
) -> anyhow::Result<usize> {
    let now = db::now_epoch();
    let mut tx = pool.begin().await?;
    let batch = queue_service::claim_batch(&mut tx, batch_size, now).await?;
    if batch.is_empty() {
        tx.commit().await?;
        return Ok(0);
    }
    tracing::info!(count = batch.len(), "processing delivery batch");

    for email in &batch {
        let outcome = attempt(&mut tx, mailer, cipher, email).await?;
        let (status, info, transcript) = match outcome {
            Outcome::Sent => {
                tracing::info!(message_id = %email.message_id, "email sent");
                (DeliveryStatus::Sent, None, None)
            }
            Outcome::Failed { info, transcript } => {
                tracing::warn!(message_id = %email.message_id, info = %info, "delivery failed");
                (DeliveryStatus::Failed, Some(info), transcript)
            }
        };
        history_service::record(
            &mut tx,
            email,
            status,
            info.as_deref(),
            transcript.as_deref(),
            db::now_epoch(),
        )
        .await?;
        queue_service::remove(&mut tx, &email.message_id).await?;
    }

    tx.commit().await?;
    Ok(batch.len())
}

/// Distinguishes terminal delivery failures (returned as an `Outcome`) from
/// database failures (propagated, aborting the batch).
async fn attempt(
    conn: &mut SqliteConnection,
    mailer: &dyn MailTransport,
    cipher: &SecretCipher,
    email: &QueuedEmail,
) -> Result<Outcome, sqlx::Error> {
    let profile: Option<SendingProfile> =
        sqlx::query_as("SELECT * FROM sending_profiles WHERE id = ?")
            .bind(email.profile_id)
            .fetch_optional(conn)
            .await?;

    let Some(profile) = profile else {
        return Ok(Outcome::Failed {
            info: format!(
                "Sending profile (id {}) not found. It may have been deleted.",
                email.profile_id
            ),
            transcript: None,
        });
    };

    // Decrypt failure is a configuration problem, not a transport one; no
    // send attempt is made.
    let smtp_password = match cipher.decrypt(&profile.smtp_pass_encrypted) {
        Ok(p) => p,
        Err(e) => {
            return Ok(Outcome::Failed {
                info: "Failed to decrypt the SMTP password. Check the encryption key.".into(),
                transcript: Some(e.to_string()),
            });
        }
    };

    match mailer.deliver(&profile, &smtp_password, email).await {
        Ok(()) => Ok(Outcome::Sent),
        Err(f) => Ok(Outcome::Failed {
            info: f.message,
            transcript: f.transcript,
        }),
    }
}

/// Background loop, ticking on a fixed interval.
pub async fn start_delivery_loop(
    pool: SqlitePool,
    mailer: Arc<dyn MailTransport>,
    cipher: Arc<SecretCipher>,
    interval: Duration,
    batch_size: i64,
) {
    tracing::info!(interval_secs = interval.as_secs(), batch_size, "starting delivery worker");
    loop {
        match process_batch(&pool, mailer.as_ref(), &cipher, batch_size).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(processed = n, "delivery batch finished"),
            Err(e) => tracing::error!("delivery batch failed, retrying next tick: {e}"),
        }
        sleep(interval).await;
    }
}
