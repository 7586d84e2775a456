use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::policy::PolicyCode;

/// Why a policy did or did not contribute to a commission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceReason {
    MatchedSelected,
    MatchedNotSelectedExclusivity,
    ScopeMismatch,
    QuotaExhausted,
    InactiveOrExpired,
    ConditionFailed,
}

impl TraceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchedSelected => "matched-selected",
            Self::MatchedNotSelectedExclusivity => "matched-not-selected-exclusivity",
            Self::ScopeMismatch => "scope-mismatch",
            Self::QuotaExhausted => "quota-exhausted",
            Self::InactiveOrExpired => "inactive-or-expired",
            Self::ConditionFailed => "condition-failed",
        }
    }
}

impl std::fmt::Display for TraceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub policy_code: PolicyCode,
    pub reason: TraceReason,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContribution {
    pub policy_code: PolicyCode,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionResult {
    pub applied_policy_codes: Vec<PolicyCode>,
    pub total_commission: Decimal,
    pub per_policy_breakdown: Vec<PolicyContribution>,
    pub resolution_trace: Vec<TraceEntry>,
}

impl CommissionResult {
    pub fn is_zero_commission(&self) -> bool {
        self.applied_policy_codes.is_empty()
    }

    pub fn trace_for(&self, policy_code: &PolicyCode) -> Option<&TraceEntry> {
        self.resolution_trace.iter().find(|entry| &entry.policy_code == policy_code)
    }
}
