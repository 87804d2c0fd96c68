//! Age-based retention for the history log, driven by the
//! `settings.log_retention_days` row.

use sqlx::SqlitePool;
use tokio::time::{sleep, Duration};

use crate::db;
use crate::services::history_service;

pub async fn start_prune_loop(pool: SqlitePool) {
    tracing::info!("starting history retention loop");

    // Let the app settle before the first pass.
    sleep(Duration::from_secs(60)).await;

    loop {
        if let Err(e) = prune_once(&pool).await {
            tracing::error!("history pruning failed: {e}");
        }
        sleep(Duration::from_secs(86_400)).await;
    }
}

pub async fn prune_once(pool: &SqlitePool) -> anyhow::Result<u64> {
    let retention_days: Option<i64> =
        sqlx::query_scalar("SELECT log_retention_days FROM settings WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    let Some(days) = retention_days else {
        tracing::warn!("settings row missing, skipping history pruning");
        return Ok(0);
    };
    if days <= 0 {
        tracing::debug!("history retention disabled");
        return Ok(0);
    }

    let cutoff = db::now_epoch() - days * 86_400;
    let pruned = history_service::prune_older_than(pool, cutoff).await?;
    if pruned > 0 {
        tracing::info!(pruned, retention_days = days, "pruned old history entries");
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn insert_history(pool: &SqlitePool, id: &str, processed_at: i64) {
        sqlx::query(
            "INSERT INTO email_history (
                message_id, profile_id, ip_address, to_email, subject,
                status, submitted_at, processed_at
            ) VALUES (?, 1, '1.2.3.4', '[\"a@example.com\"]', 's', 'sent', ?, ?)",
        )
        .bind(id)
        .bind(processed_at)
        .bind(processed_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn prunes_only_entries_past_retention() {
        let pool = test_pool().await;
        let now = db::now_epoch();
        insert_history(&pool, "old", now - 40 * 86_400).await;
        insert_history(&pool, "fresh", now - 86_400).await;

        // Default retention is 30 days.
        let pruned = prune_once(&pool).await.unwrap();
        assert_eq!(pruned, 1);

        let remaining: Vec<(String,)> = sqlx::query_as("SELECT message_id FROM email_history")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![("fresh".to_string(),)]);
    }

    #[tokio::test]
    async fn zero_retention_disables_pruning() {
        let pool = test_pool().await;
        sqlx::query("UPDATE settings SET log_retention_days = 0 WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();
        let now = db::now_epoch();
        insert_history(&pool, "ancient", now - 365 * 86_400).await;

        assert_eq!(prune_once(&pool).await.unwrap(), 0);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_history")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
