pub mod audit;
pub mod commission;
pub mod config;
pub mod domain;
pub mod errors;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use commission::{
    calculator::{calculate_commission, CommissionCalculator, DeterministicCommissionCalculator},
    matcher::{evaluate_policy, DeterministicPolicyMatcher, MatchReport, PolicyMatcher},
    policy_set::{PolicyCatalogue, PolicySet},
    resolver::{resolve_conflicts, ConflictResolver, PriorityConflictResolver, Resolution},
    usage::{InMemoryUsageTracker, QuotaClaim, UsageCounts, UsageSnapshot, UsageTracker},
    ResolutionEngine,
};
pub use domain::order::{CategoryId, OrderContext, PartnerId, PartnerTier, ProductId, SupplierId};
pub use domain::policy::{
    CommissionPolicy, CommissionRule, CommissionTier, PolicyAudit, PolicyCode, PolicyConditions,
    PolicyScope, PolicyStatus, PolicyType, PolicyUsage,
};
pub use domain::result::{CommissionResult, PolicyContribution, TraceEntry, TraceReason};
pub use errors::{ApplicationError, ConfigurationError, UsageError};
