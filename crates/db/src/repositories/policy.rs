use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::debug;

use commission_core::domain::policy::{CommissionPolicy, PolicyCode, PolicyStatus};

use super::{PolicyRepository, RepositoryError};
use crate::DbPool;

const SELECT_POLICY: &str = r#"
    SELECT
        p.policy_code, p.name, p.policy_type, p.status, p.priority, p.can_stack,
        p.commission_type, p.definition_json, p.created_at, p.updated_at,
        u.usage_count AS tracked_usage
    FROM commission_policy p
    LEFT JOIN policy_usage u ON u.policy_code = p.policy_code
"#;

/// Row shape of `commission_policy`. The full definition lives in `definition_json`; the
/// other columns are projections kept for indexing and for the tracker's status flips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRecord {
    pub policy_code: String,
    pub name: String,
    pub policy_type: String,
    pub status: String,
    pub priority: i64,
    pub can_stack: i64,
    pub commission_type: String,
    pub definition_json: String,
    pub created_at: String,
    pub updated_at: String,
    pub tracked_usage: Option<i64>,
}

impl TryFrom<PolicyRecord> for CommissionPolicy {
    type Error = RepositoryError;

    fn try_from(value: PolicyRecord) -> Result<Self, Self::Error> {
        let mut policy: CommissionPolicy =
            serde_json::from_str(&value.definition_json).map_err(|err| {
                RepositoryError::Decode(format!(
                    "invalid definition for policy {}: {err}",
                    value.policy_code
                ))
            })?;

        if policy.policy_code.as_str() != value.policy_code {
            return Err(RepositoryError::Decode(format!(
                "policy row {} holds a definition for {}",
                value.policy_code, policy.policy_code
            )));
        }

        // The status column is authoritative: the usage tracker expires policies there.
        policy.status = PolicyStatus::parse(&value.status).ok_or_else(|| {
            RepositoryError::Decode(format!("invalid policy status: {}", value.status))
        })?;

        if let Some(tracked) = value.tracked_usage {
            let tracked = u64::try_from(tracked).map_err(|_| {
                RepositoryError::Decode(format!("negative usage count for {}", value.policy_code))
            })?;
            policy.usage.current_usage_count = policy.usage.current_usage_count.max(tracked);
        }

        Ok(policy)
    }
}

impl TryFrom<&CommissionPolicy> for PolicyRecord {
    type Error = RepositoryError;

    fn try_from(value: &CommissionPolicy) -> Result<Self, Self::Error> {
        let definition_json = serde_json::to_string(value).map_err(|err| {
            RepositoryError::Decode(format!(
                "could not encode policy {}: {err}",
                value.policy_code
            ))
        })?;
        let now = Utc::now();

        Ok(Self {
            policy_code: value.policy_code.0.clone(),
            name: value.name.clone(),
            policy_type: value.policy_type.as_str().to_string(),
            status: value.status.as_str().to_string(),
            priority: i64::from(value.priority),
            can_stack: i64::from(value.can_stack_with_other_policies),
            commission_type: value.rule.type_name().to_string(),
            definition_json,
            created_at: value.audit.created_at.unwrap_or(now).to_rfc3339(),
            updated_at: value.audit.updated_at.unwrap_or(now).to_rfc3339(),
            tracked_usage: None,
        })
    }
}

pub struct SqlPolicyRepository {
    pool: DbPool,
}

impl SqlPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepository for SqlPolicyRepository {
    async fn find_by_code(
        &self,
        code: &PolicyCode,
    ) -> Result<Option<CommissionPolicy>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_POLICY} WHERE p.policy_code = ?"))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(policy_from_row).transpose()
    }

    async fn save(&self, policy: CommissionPolicy) -> Result<(), RepositoryError> {
        let record = PolicyRecord::try_from(&policy)?;
        let mut conn = self.pool.acquire().await?;
        upsert_policy(&mut *conn, &record).await
    }

    async fn replace_all(&self, policies: Vec<CommissionPolicy>) -> Result<(), RepositoryError> {
        let records =
            policies.iter().map(PolicyRecord::try_from).collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;

        let keep = vec!["?"; records.len()].join(", ");
        let delete = if records.is_empty() {
            "DELETE FROM commission_policy".to_string()
        } else {
            format!("DELETE FROM commission_policy WHERE policy_code NOT IN ({keep})")
        };
        let mut query = sqlx::query(&delete);
        for record in &records {
            query = query.bind(&record.policy_code);
        }
        let removed = query.execute(&mut *tx).await?.rows_affected();

        for record in &records {
            upsert_policy(&mut *tx, record).await?;
        }

        tx.commit().await?;
        debug!(
            event_name = "commission.db.policies_replaced",
            stored = records.len(),
            removed,
            "policy catalogue replaced"
        );
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<CommissionPolicy>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_POLICY} ORDER BY p.policy_code"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(policy_from_row).collect()
    }
}

/// Upsert by code. A row the usage tracker expired stays expired.
async fn upsert_policy(
    conn: &mut SqliteConnection,
    record: &PolicyRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO commission_policy (
            policy_code, name, policy_type, status, priority, can_stack,
            commission_type, definition_json, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(policy_code) DO UPDATE SET
            name = excluded.name,
            policy_type = excluded.policy_type,
            status = CASE
                WHEN commission_policy.status = 'expired' THEN 'expired'
                ELSE excluded.status
            END,
            priority = excluded.priority,
            can_stack = excluded.can_stack,
            commission_type = excluded.commission_type,
            definition_json = excluded.definition_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.policy_code)
    .bind(&record.name)
    .bind(&record.policy_type)
    .bind(&record.status)
    .bind(record.priority)
    .bind(record.can_stack)
    .bind(&record.commission_type)
    .bind(&record.definition_json)
    .bind(&record.created_at)
    .bind(&record.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn policy_record_from_row(row: &SqliteRow) -> Result<PolicyRecord, RepositoryError> {
    Ok(PolicyRecord {
        policy_code: row.try_get("policy_code")?,
        name: row.try_get("name")?,
        policy_type: row.try_get("policy_type")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        can_stack: row.try_get("can_stack")?,
        commission_type: row.try_get("commission_type")?,
        definition_json: row.try_get("definition_json")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        tracked_usage: row.try_get("tracked_usage")?,
    })
}

fn policy_from_row(row: &SqliteRow) -> Result<CommissionPolicy, RepositoryError> {
    CommissionPolicy::try_from(policy_record_from_row(row)?)
}
