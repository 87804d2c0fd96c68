//! Admission decisions for the ingestion path.
//!
//! Counting and reserving must happen inside the caller's transaction so two
//! concurrent admissions for the same (profile, IP) pair cannot both pass the
//! check-then-act window.

use sqlx::SqliteConnection;

use crate::models::profile::{RateLimitPolicy, RateLimitStrategy};

/// How long a REJECT-strategy block lasts, independent of the policy.
pub const BLOCK_DURATION_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow { send_at: i64 },
    Deny,
}

pub async fn admit(
    conn: &mut SqliteConnection,
    profile_id: i64,
    ip_address: &str,
    policy: &RateLimitPolicy,
    now: i64,
) -> Result<Admission, sqlx::Error> {
    if policy.max_count == 0 {
        return Ok(Admission::Allow { send_at: now });
    }

    match policy.strategy {
        RateLimitStrategy::Reject => {
            // An active block denies before any counting happens.
            if active_block(conn, profile_id, ip_address, now).await? {
                return Ok(Admission::Deny);
            }
            let count = recent_count(conn, profile_id, ip_address, now - policy.interval_secs()).await?;
            if count >= policy.max_count {
                sqlx::query(
                    "INSERT INTO rate_limit_blocks (profile_id, ip_address, blocked_until)
                     VALUES (?, ?, ?)",
                )
                .bind(profile_id)
                .bind(ip_address)
                .bind(now + BLOCK_DURATION_SECS)
                .execute(&mut *conn)
                .await?;
                return Ok(Admission::Deny);
            }
            Ok(Admission::Allow { send_at: now })
        }
        RateLimitStrategy::Delay => {
            let count = recent_count(conn, profile_id, ip_address, now - policy.interval_secs()).await?;
            if count < policy.max_count {
                return Ok(Admission::Allow { send_at: now });
            }
            // Spread further sends evenly: one stagger interval past the
            // latest send already scheduled for this pair.
            let stagger = stagger_secs(policy);
            let latest: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(send_at) FROM email_queue WHERE profile_id = ? AND ip_address = ?",
            )
            .bind(profile_id)
            .bind(ip_address)
            .fetch_one(&mut *conn)
            .await?;
            let base = latest.unwrap_or(now).max(now);
            Ok(Admission::Allow {
                send_at: base + stagger,
            })
        }
    }
}

/// `ceil(interval / max_count)`, at least one second.
fn stagger_secs(policy: &RateLimitPolicy) -> i64 {
    let secs = policy.interval_secs();
    ((secs + policy.max_count - 1) / policy.max_count).max(1)
}

async fn active_block(
    conn: &mut SqliteConnection,
    profile_id: i64,
    ip_address: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM rate_limit_blocks
         WHERE profile_id = ? AND ip_address = ? AND blocked_until > ?
         LIMIT 1",
    )
    .bind(profile_id)
    .bind(ip_address)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found.is_some())
}

async fn recent_count(
    conn: &mut SqliteConnection,
    profile_id: i64,
    ip_address: &str,
    window_start: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM email_queue
         WHERE profile_id = ? AND ip_address = ? AND submitted_at >= ?",
    )
    .bind(profile_id)
    .bind(ip_address)
    .bind(window_start)
    .fetch_one(&mut *conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::queue::QueuedEmail;
    use crate::services::queue_service;
    use sqlx::SqlitePool;

    const IP: &str = "1.2.3.4";

    fn policy(strategy: RateLimitStrategy, max_count: i64, interval_minutes: i64) -> RateLimitPolicy {
        RateLimitPolicy {
            max_count,
            interval_minutes,
            strategy,
        }
    }

    fn email(id: &str, submitted_at: i64, send_at: i64) -> QueuedEmail {
        QueuedEmail {
            message_id: id.into(),
            profile_id: 1,
            ip_address: IP.into(),
            to_email: r#"["to@example.com"]"#.into(),
            cc_email: None,
            bcc_email: None,
            subject: "s".into(),
            body_html: None,
            body_text: Some("t".into()),
            attachments: None,
            submitted_at,
            send_at,
            claimed_at: None,
        }
    }

    async fn admit_and_queue(pool: &SqlitePool, p: &RateLimitPolicy, id: &str, now: i64) -> Admission {
        let mut conn = pool.acquire().await.unwrap();
        let decision = admit(&mut conn, 1, IP, p, now).await.unwrap();
        if let Admission::Allow { send_at } = decision {
            queue_service::enqueue(&mut conn, &email(id, now, send_at))
                .await
                .unwrap();
        }
        decision
    }

    #[tokio::test]
    async fn zero_max_count_disables_limiting() {
        let pool = test_pool().await;
        let p = policy(RateLimitStrategy::Reject, 0, 1);
        let now = 1_000_000;
        for i in 0..50 {
            let d = admit_and_queue(&pool, &p, &format!("m{i}"), now).await;
            assert_eq!(d, Admission::Allow { send_at: now });
        }
    }

    #[tokio::test]
    async fn reject_blocks_after_limit_and_expires() {
        let pool = test_pool().await;
        let p = policy(RateLimitStrategy::Reject, 2, 10);
        let now = 1_000_000;

        assert_eq!(
            admit_and_queue(&pool, &p, "m1", now).await,
            Admission::Allow { send_at: now }
        );
        assert_eq!(
            admit_and_queue(&pool, &p, "m2", now).await,
            Admission::Allow { send_at: now }
        );
        // Third admission within the window trips the limit and plants a block.
        assert_eq!(admit_and_queue(&pool, &p, "m3", now).await, Admission::Deny);

        let blocked_until: i64 =
            sqlx::query_scalar("SELECT blocked_until FROM rate_limit_blocks LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(blocked_until, now + BLOCK_DURATION_SECS);

        // Still denied while the block is live, even before re-counting.
        assert_eq!(
            admit_and_queue(&pool, &p, "m4", now + 60).await,
            Admission::Deny
        );

        // Past both the block and the counting window: admitted again.
        let later = now + BLOCK_DURATION_SECS + p.interval_secs() + 1;
        assert_eq!(
            admit_and_queue(&pool, &p, "m5", later).await,
            Admission::Allow { send_at: later }
        );
    }

    #[tokio::test]
    async fn reject_denies_on_active_block_before_counting() {
        let pool = test_pool().await;
        let p = policy(RateLimitStrategy::Reject, 5, 10);
        let now = 1_000_000;
        sqlx::query("INSERT INTO rate_limit_blocks (profile_id, ip_address, blocked_until) VALUES (1, ?, ?)")
            .bind(IP)
            .bind(now + 100)
            .execute(&pool)
            .await
            .unwrap();

        // Queue is empty, the count alone would allow; the block wins.
        assert_eq!(admit_and_queue(&pool, &p, "m1", now).await, Admission::Deny);
    }

    #[tokio::test]
    async fn delay_staggers_with_strictly_increasing_send_times() {
        let pool = test_pool().await;
        let p = policy(RateLimitStrategy::Delay, 1, 1);
        let now = 1_000_000;

        // max_count=1, interval=1min: first immediate, then +60s each.
        assert_eq!(
            admit_and_queue(&pool, &p, "m1", now).await,
            Admission::Allow { send_at: now }
        );
        assert_eq!(
            admit_and_queue(&pool, &p, "m2", now).await,
            Admission::Allow { send_at: now + 60 }
        );
        assert_eq!(
            admit_and_queue(&pool, &p, "m3", now).await,
            Admission::Allow { send_at: now + 120 }
        );
    }

    #[tokio::test]
    async fn delay_base_is_now_when_latest_send_is_past() {
        let pool = test_pool().await;
        let p = policy(RateLimitStrategy::Delay, 1, 1);
        let now = 1_000_000;

        // One old entry still inside the counting window but scheduled in the past.
        {
            let mut conn = pool.acquire().await.unwrap();
            queue_service::enqueue(&mut conn, &email("m1", now - 10, now - 10))
                .await
                .unwrap();
        }
        let mut conn = pool.acquire().await.unwrap();
        let d = admit(&mut conn, 1, IP, &p, now).await.unwrap();
        assert_eq!(d, Admission::Allow { send_at: now + 60 });
    }

    #[test]
    fn stagger_has_a_one_second_floor() {
        let p = policy(RateLimitStrategy::Delay, 500, 1);
        assert_eq!(stagger_secs(&p), 1);
        let p = policy(RateLimitStrategy::Delay, 7, 1);
        // ceil(60 / 7) = 9
        assert_eq!(stagger_secs(&p), 9);
    }

    #[tokio::test]
    async fn pairs_are_isolated() {
        let pool = test_pool().await;
        let p = policy(RateLimitStrategy::Reject, 1, 10);
        let now = 1_000_000;
        assert_eq!(
            admit_and_queue(&pool, &p, "m1", now).await,
            Admission::Allow { send_at: now }
        );
        assert_eq!(admit_and_queue(&pool, &p, "m2", now).await, Admission::Deny);

        // Different IP, same profile: unaffected.
        let mut conn = pool.acquire().await.unwrap();
        let d = admit(&mut conn, 1, "5.6.7.8", &p, now).await.unwrap();
        assert_eq!(d, Admission::Allow { send_at: now });
    }
}
