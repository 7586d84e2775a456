use async_trait::async_trait;
use thiserror::Error;

use commission_core::domain::policy::{CommissionPolicy, PolicyCode};

pub mod policy;
pub mod usage;

pub use policy::SqlPolicyRepository;
pub use usage::SqlUsageTracker;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn find_by_code(
        &self,
        code: &PolicyCode,
    ) -> Result<Option<CommissionPolicy>, RepositoryError>;

    /// Insert or replace by policy code.
    async fn save(&self, policy: CommissionPolicy) -> Result<(), RepositoryError>;

    /// Stores exactly `policies`: codes missing from it are deleted, the rest upserted, in
    /// one transaction. Usage counters are left alone.
    async fn replace_all(&self, policies: Vec<CommissionPolicy>) -> Result<(), RepositoryError>;

    /// Every stored policy, ordered by policy code.
    async fn list_all(&self) -> Result<Vec<CommissionPolicy>, RepositoryError>;
}
