use sqlx::SqlitePool;

use crate::db;
use crate::error::ApiError;
use crate::models::profile::{RateLimitPolicy, RateLimitStrategy};

/// Verifies a presented `prefix.secret` token against the profile's stored
/// hash and returns the profile's rate-limit policy on success.
///
/// One joined query fetches the policy and the token hash together, and a
/// single error class covers "no such profile", "no such token" and "wrong
/// secret" so callers cannot probe which part was wrong. The bcrypt
/// comparison itself is timing-safe.
pub async fn authenticate(
    pool: &SqlitePool,
    profile_id: i64,
    presented: &str,
) -> Result<RateLimitPolicy, ApiError> {
    let (prefix, secret) = presented
        .split_once('.')
        .ok_or(ApiError::InvalidTokenFormat)?;
    if prefix.is_empty() || secret.is_empty() {
        return Err(ApiError::InvalidTokenFormat);
    }

    let row: Option<(i64, i64, RateLimitStrategy, String)> = sqlx::query_as(
        "SELECT p.rate_limit_count, p.rate_limit_interval, p.rate_limit_strategy, t.token_hash
         FROM sending_profiles p
         JOIN api_tokens t ON p.id = t.profile_id
         WHERE p.id = ? AND t.token_prefix = ?",
    )
    .bind(profile_id)
    .bind(prefix)
    .fetch_optional(pool)
    .await?;

    let (max_count, interval_minutes, strategy, token_hash) =
        row.ok_or(ApiError::Unauthorized)?;

    let verified = bcrypt::verify(secret, &token_hash).map_err(|_| ApiError::Unauthorized)?;
    if !verified {
        return Err(ApiError::Unauthorized);
    }

    // Best-effort bookkeeping; a failure here must not fail the request.
    let touched = sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE token_prefix = ?")
        .bind(db::now_epoch())
        .bind(prefix)
        .execute(pool)
        .await;
    if let Err(e) = touched {
        tracing::debug!(error = %e, "last_used_at update skipped");
    }

    Ok(RateLimitPolicy {
        max_count,
        interval_minutes,
        strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::fixtures::{seed_profile, seed_token};

    #[tokio::test]
    async fn valid_token_returns_policy() {
        let pool = test_pool().await;
        let profile_id = seed_profile(&pool, "DELAY", 10, 2, "enc").await;
        let token = seed_token(&pool, profile_id, "mg_abc", "s3cr3t").await;

        let policy = authenticate(&pool, profile_id, &token).await.unwrap();
        assert_eq!(policy.max_count, 10);
        assert_eq!(policy.interval_minutes, 2);
        assert_eq!(policy.strategy, RateLimitStrategy::Delay);

        let last_used: Option<i64> =
            sqlx::query_scalar("SELECT last_used_at FROM api_tokens WHERE token_prefix = 'mg_abc'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(last_used.is_some());
    }

    #[tokio::test]
    async fn any_bit_flip_in_secret_fails() {
        let pool = test_pool().await;
        let profile_id = seed_profile(&pool, "REJECT", 0, 60, "enc").await;
        seed_token(&pool, profile_id, "mg_abc", "s3cr3t").await;

        let err = authenticate(&pool, profile_id, "mg_abc.s3cr3T")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn unknown_prefix_and_wrong_profile_fail_alike() {
        let pool = test_pool().await;
        let profile_id = seed_profile(&pool, "REJECT", 0, 60, "enc").await;
        seed_token(&pool, profile_id, "mg_abc", "s3cr3t").await;

        let err = authenticate(&pool, profile_id, "mg_xyz.s3cr3t")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));

        let err = authenticate(&pool, profile_id + 1, "mg_abc.s3cr3t")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn malformed_token_is_rejected_up_front() {
        let pool = test_pool().await;
        for bad in ["nodot", ".secret", "prefix.", ""] {
            let err = authenticate(&pool, 1, bad).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidTokenFormat), "{bad:?}");
        }
    }
}
