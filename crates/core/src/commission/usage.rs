use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::domain::order::PartnerId;
use crate::domain::policy::{CommissionPolicy, PolicyCode};
use crate::errors::UsageError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub total: u64,
    pub partner: u64,
    pub expired: bool,
}

/// Point-in-time usage for the capped policies of one evaluation. Read-only; the
/// authoritative check happens again inside `UsageTracker::reserve`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    entries: BTreeMap<PolicyCode, UsageCounts>,
}

impl UsageSnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = (PolicyCode, UsageCounts)>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    pub fn counts(&self, policy_code: &PolicyCode) -> UsageCounts {
        self.entries.get(policy_code).copied().unwrap_or_default()
    }

    pub fn insert(&mut self, policy_code: PolicyCode, counts: UsageCounts) {
        self.entries.insert(policy_code, counts);
    }
}

/// One capped policy to be consumed by a reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaClaim {
    pub policy_code: PolicyCode,
    pub max_usage_total: Option<u64>,
    pub max_usage_per_partner: Option<u64>,
    /// Usage already recorded on the policy record; seeds a counter the tracker has not seen.
    pub baseline_usage: u64,
}

impl QuotaClaim {
    /// `None` for policies without any usage cap; those are never tracked.
    pub fn for_policy(policy: &CommissionPolicy) -> Option<Self> {
        policy.usage.is_capped().then(|| Self {
            policy_code: policy.policy_code.clone(),
            max_usage_total: policy.usage.max_usage_total,
            max_usage_per_partner: policy.usage.max_usage_per_partner,
            baseline_usage: policy.usage.current_usage_count,
        })
    }
}

#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn snapshot(
        &self,
        claims: &[QuotaClaim],
        partner_id: &PartnerId,
    ) -> Result<UsageSnapshot, UsageError>;

    /// All-or-nothing: either every claim is consumed or none is.
    async fn reserve(&self, claims: &[QuotaClaim], partner_id: &PartnerId)
        -> Result<(), UsageError>;
}

#[derive(Clone, Copy, Debug, Default)]
struct PolicyCounter {
    count: u64,
    expired: bool,
}

#[derive(Debug, Default)]
struct UsageLedger {
    totals: HashMap<PolicyCode, PolicyCounter>,
    partners: HashMap<(PolicyCode, PartnerId), u64>,
}

impl UsageLedger {
    fn total(&self, claim: &QuotaClaim) -> PolicyCounter {
        let stored = self.totals.get(&claim.policy_code).copied().unwrap_or_default();
        let count = stored.count.max(claim.baseline_usage);
        let reached_cap = claim.max_usage_total.is_some_and(|cap| count >= cap);
        PolicyCounter { count, expired: stored.expired || reached_cap }
    }

    fn partner(&self, claim: &QuotaClaim, partner_id: &PartnerId) -> u64 {
        self.partners
            .get(&(claim.policy_code.clone(), partner_id.clone()))
            .copied()
            .unwrap_or_default()
    }
}

/// Process-local tracker. Each reservation checks and applies every claim inside one
/// critical section, so concurrent callers can never overshoot a cap.
#[derive(Debug, Default)]
pub struct InMemoryUsageTracker {
    ledger: Mutex<UsageLedger>,
}

impl InMemoryUsageTracker {
    pub fn usage_count(&self, policy_code: &PolicyCode) -> u64 {
        self.with_ledger(|ledger| {
            ledger.totals.get(policy_code).map(|counter| counter.count).unwrap_or_default()
        })
    }

    pub fn is_expired(&self, policy_code: &PolicyCode) -> bool {
        self.with_ledger(|ledger| {
            ledger.totals.get(policy_code).is_some_and(|counter| counter.expired)
        })
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut UsageLedger) -> T) -> T {
        match self.ledger.lock() {
            Ok(mut ledger) => f(&mut ledger),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl UsageTracker for InMemoryUsageTracker {
    async fn snapshot(
        &self,
        claims: &[QuotaClaim],
        partner_id: &PartnerId,
    ) -> Result<UsageSnapshot, UsageError> {
        Ok(self.with_ledger(|ledger| {
            UsageSnapshot::from_entries(claims.iter().map(|claim| {
                let total = ledger.total(claim);
                (
                    claim.policy_code.clone(),
                    UsageCounts {
                        total: total.count,
                        partner: ledger.partner(claim, partner_id),
                        expired: total.expired,
                    },
                )
            }))
        }))
    }

    async fn reserve(
        &self,
        claims: &[QuotaClaim],
        partner_id: &PartnerId,
    ) -> Result<(), UsageError> {
        self.with_ledger(|ledger| {
            let mut planned = Vec::with_capacity(claims.len());
            for claim in claims {
                let exceeded =
                    || UsageError::QuotaExceeded { policy_code: claim.policy_code.clone() };
                let total = ledger.total(claim);
                if total.expired {
                    return Err(exceeded());
                }
                let next_total = total.count + 1;
                if claim.max_usage_total.is_some_and(|cap| next_total > cap) {
                    return Err(exceeded());
                }
                let next_partner = ledger.partner(claim, partner_id) + 1;
                if claim.max_usage_per_partner.is_some_and(|cap| next_partner > cap) {
                    return Err(exceeded());
                }
                planned.push((claim, next_total, next_partner));
            }

            for (claim, next_total, next_partner) in planned {
                let expired = claim.max_usage_total.is_some_and(|cap| next_total >= cap);
                ledger.totals.insert(
                    claim.policy_code.clone(),
                    PolicyCounter { count: next_total, expired },
                );
                ledger
                    .partners
                    .insert((claim.policy_code.clone(), partner_id.clone()), next_partner);
                if expired {
                    info!(
                        event_name = "commission.usage.policy_expired",
                        policy_code = %claim.policy_code,
                        usage_count = next_total,
                        "policy reached its usage cap and is now expired"
                    );
                }
            }
            Ok(())
        })
    }
}
