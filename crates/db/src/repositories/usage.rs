use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};

use commission_core::commission::usage::{QuotaClaim, UsageCounts, UsageSnapshot, UsageTracker};
use commission_core::domain::order::PartnerId;
use commission_core::errors::UsageError;

use crate::DbPool;

const EXPIRED: &str = "expired";

/// Durable usage counters. A reservation runs in one transaction: every claim is
/// incremented with a conditional update or the whole transaction rolls back.
pub struct SqlUsageTracker {
    pool: DbPool,
}

impl SqlUsageTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn usage_count(&self, policy_code: &str) -> Result<u64, UsageError> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT usage_count FROM policy_usage WHERE policy_code = ?")
                .bind(policy_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(count.map(to_count).unwrap_or_default())
    }
}

#[async_trait]
impl UsageTracker for SqlUsageTracker {
    async fn snapshot(
        &self,
        claims: &[QuotaClaim],
        partner_id: &PartnerId,
    ) -> Result<UsageSnapshot, UsageError> {
        let mut snapshot = UsageSnapshot::default();

        for claim in claims {
            let total = sqlx::query(
                "SELECT usage_count, status FROM policy_usage WHERE policy_code = ?",
            )
            .bind(claim.policy_code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            let (stored, stored_expired) = match total {
                Some(row) => {
                    let count: i64 = row.try_get("usage_count").map_err(storage)?;
                    let status: String = row.try_get("status").map_err(storage)?;
                    (to_count(count), status == EXPIRED)
                }
                None => (0, false),
            };

            let partner: Option<i64> = sqlx::query_scalar(
                "SELECT usage_count FROM partner_policy_usage
                 WHERE policy_code = ? AND partner_id = ?",
            )
            .bind(claim.policy_code.as_str())
            .bind(&partner_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            let total = stored.max(claim.baseline_usage);
            let reached_cap = claim.max_usage_total.is_some_and(|cap| total >= cap);
            snapshot.insert(
                claim.policy_code.clone(),
                UsageCounts {
                    total,
                    partner: partner.map(to_count).unwrap_or_default(),
                    expired: stored_expired || reached_cap,
                },
            );
        }

        Ok(snapshot)
    }

    async fn reserve(
        &self,
        claims: &[QuotaClaim],
        partner_id: &PartnerId,
    ) -> Result<(), UsageError> {
        if claims.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut expired_now = Vec::new();

        for claim in claims {
            match consume(&mut tx, claim, partner_id).await? {
                Consumed::Granted { expired: false } => {}
                Consumed::Granted { expired: true } => expired_now.push(claim),
                Consumed::Refused => {
                    tx.rollback().await.map_err(storage)?;
                    debug!(
                        event_name = "commission.usage.reservation_refused",
                        policy_code = %claim.policy_code,
                        partner_id = %partner_id.0,
                        "usage cap reached, reservation rolled back"
                    );
                    return Err(UsageError::QuotaExceeded {
                        policy_code: claim.policy_code.clone(),
                    });
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        for claim in &expired_now {
            sqlx::query(
                "UPDATE commission_policy SET status = ?, updated_at = ? WHERE policy_code = ?",
            )
                .bind(EXPIRED)
                .bind(&now)
                .bind(claim.policy_code.as_str())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;

        for claim in expired_now {
            info!(
                event_name = "commission.usage.policy_expired",
                policy_code = %claim.policy_code,
                "policy reached its usage cap and is now expired"
            );
        }
        Ok(())
    }
}

enum Consumed {
    Granted { expired: bool },
    Refused,
}

async fn consume(
    tx: &mut Transaction<'_, Sqlite>,
    claim: &QuotaClaim,
    partner_id: &PartnerId,
) -> Result<Consumed, UsageError> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO policy_usage (policy_code, usage_count, max_usage_total, status, updated_at)
        VALUES (?, ?, ?, 'active', ?)
        ON CONFLICT(policy_code) DO UPDATE SET
            usage_count = MAX(policy_usage.usage_count, excluded.usage_count),
            max_usage_total = excluded.max_usage_total
        "#,
    )
    .bind(claim.policy_code.as_str())
    .bind(to_sql(claim.baseline_usage))
    .bind(claim.max_usage_total.map(to_sql))
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    let total = sqlx::query(
        r#"
        UPDATE policy_usage
        SET usage_count = usage_count + 1,
            status = CASE
                WHEN max_usage_total IS NOT NULL AND usage_count + 1 >= max_usage_total
                THEN 'expired'
                ELSE status
            END,
            updated_at = ?
        WHERE policy_code = ?
          AND status = 'active'
          AND (max_usage_total IS NULL OR usage_count < max_usage_total)
        RETURNING status
        "#,
    )
    .bind(&now)
    .bind(claim.policy_code.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage)?;

    let Some(total) = total else {
        return Ok(Consumed::Refused);
    };
    let status: String = total.try_get("status").map_err(storage)?;

    sqlx::query(
        r#"
        INSERT INTO partner_policy_usage (policy_code, partner_id, usage_count, updated_at)
        VALUES (?, ?, 0, ?)
        ON CONFLICT(policy_code, partner_id) DO NOTHING
        "#,
    )
    .bind(claim.policy_code.as_str())
    .bind(&partner_id.0)
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    let partner_cap = claim.max_usage_per_partner.map(to_sql);
    let partner = sqlx::query(
        r#"
        UPDATE partner_policy_usage
        SET usage_count = usage_count + 1, updated_at = ?
        WHERE policy_code = ? AND partner_id = ?
          AND (? IS NULL OR usage_count < ?)
        RETURNING usage_count
        "#,
    )
    .bind(&now)
    .bind(claim.policy_code.as_str())
    .bind(&partner_id.0)
    .bind(partner_cap)
    .bind(partner_cap)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage)?;

    if partner.is_none() {
        return Ok(Consumed::Refused);
    }
    Ok(Consumed::Granted { expired: status == EXPIRED })
}

fn storage(error: sqlx::Error) -> UsageError {
    UsageError::Storage(error.to_string())
}

fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
