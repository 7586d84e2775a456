use chrono::{DateTime, Utc};

use crate::commission::policy_set::PolicySet;
use crate::commission::usage::UsageSnapshot;
use crate::domain::order::OrderContext;
use crate::domain::policy::{CommissionPolicy, PolicyStatus};
use crate::domain::result::{TraceEntry, TraceReason};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub reason: TraceReason,
    pub detail: String,
}

impl Rejection {
    fn new(reason: TraceReason, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into() }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MatchReport<'a> {
    /// Matching policies in policy-code order.
    pub matched: Vec<&'a CommissionPolicy>,
    pub rejected: Vec<TraceEntry>,
}

pub trait PolicyMatcher: Send + Sync {
    fn match_policies<'a>(
        &self,
        policies: &'a PolicySet,
        ctx: &OrderContext,
        usage: &UsageSnapshot,
        now: DateTime<Utc>,
    ) -> MatchReport<'a>;
}

#[derive(Default)]
pub struct DeterministicPolicyMatcher;

impl PolicyMatcher for DeterministicPolicyMatcher {
    fn match_policies<'a>(
        &self,
        policies: &'a PolicySet,
        ctx: &OrderContext,
        usage: &UsageSnapshot,
        now: DateTime<Utc>,
    ) -> MatchReport<'a> {
        let mut report = MatchReport::default();
        for policy in policies.policies() {
            match evaluate_policy(policy, ctx, usage, now) {
                Ok(()) => report.matched.push(policy),
                Err(rejection) => report.rejected.push(TraceEntry {
                    policy_code: policy.policy_code.clone(),
                    reason: rejection.reason,
                    detail: rejection.detail,
                }),
            }
        }
        report
    }
}

/// Checks status, scope, order conditions and quota, in that order. The first failing
/// check decides the rejection reason.
pub fn evaluate_policy(
    policy: &CommissionPolicy,
    ctx: &OrderContext,
    usage: &UsageSnapshot,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    check_status(policy, usage, now)?;
    check_scope(policy, ctx)?;
    check_conditions(policy, ctx)?;
    check_quota(policy, usage)
}

fn check_status(
    policy: &CommissionPolicy,
    usage: &UsageSnapshot,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if usage.counts(&policy.policy_code).expired {
        return Err(Rejection::new(TraceReason::InactiveOrExpired, "usage quota exhausted"));
    }

    match policy.effective_status(now) {
        PolicyStatus::Active => Ok(()),
        other => Err(Rejection::new(
            TraceReason::InactiveOrExpired,
            format!("effective status is {}", other.as_str()),
        )),
    }
}

fn check_scope(policy: &CommissionPolicy, ctx: &OrderContext) -> Result<(), Rejection> {
    let scope = &policy.scope;
    let mismatch = |field: &str| {
        Err(Rejection::new(TraceReason::ScopeMismatch, format!("{field} does not match")))
    };

    if scope.partner_id.as_ref().is_some_and(|partner_id| partner_id != &ctx.partner_id) {
        return mismatch("partner_id");
    }
    if scope.partner_tier.is_some() && scope.partner_tier != ctx.partner_tier {
        return mismatch("partner_tier");
    }
    if scope.product_id.as_ref().is_some_and(|product_id| product_id != &ctx.product_id) {
        return mismatch("product_id");
    }
    if scope.supplier_id.is_some() && scope.supplier_id != ctx.supplier_id {
        return mismatch("supplier_id");
    }
    if scope.category.is_some() && scope.category != ctx.category {
        return mismatch("category");
    }
    if let Some(tags) = scope.tags.as_ref().filter(|tags| !tags.is_empty()) {
        if tags.is_disjoint(&ctx.tags) {
            return mismatch("tags");
        }
    }

    Ok(())
}

fn check_conditions(policy: &CommissionPolicy, ctx: &OrderContext) -> Result<(), Rejection> {
    let conditions = &policy.conditions;

    if let Some(min_order_amount) = conditions.min_order_amount {
        if ctx.order_amount < min_order_amount {
            return Err(Rejection::new(
                TraceReason::ConditionFailed,
                format!("order amount {} is below minimum {min_order_amount}", ctx.order_amount),
            ));
        }
    }
    if let Some(max_order_amount) = conditions.max_order_amount {
        if ctx.order_amount > max_order_amount {
            return Err(Rejection::new(
                TraceReason::ConditionFailed,
                format!("order amount {} is above maximum {max_order_amount}", ctx.order_amount),
            ));
        }
    }
    if conditions.requires_new_customer && !ctx.is_new_customer {
        return Err(Rejection::new(TraceReason::ConditionFailed, "requires a new customer"));
    }
    if conditions.exclude_discounted_items && ctx.is_discounted {
        return Err(Rejection::new(TraceReason::ConditionFailed, "excludes discounted items"));
    }

    Ok(())
}

fn check_quota(policy: &CommissionPolicy, usage: &UsageSnapshot) -> Result<(), Rejection> {
    let counts = usage.counts(&policy.policy_code);

    if let Some(cap) = policy.usage.max_usage_total {
        let used = counts.total.max(policy.usage.current_usage_count);
        if used >= cap {
            return Err(Rejection::new(
                TraceReason::QuotaExhausted,
                format!("total usage {used} reached cap {cap}"),
            ));
        }
    }
    if let Some(cap) = policy.usage.max_usage_per_partner {
        if counts.partner >= cap {
            return Err(Rejection::new(
                TraceReason::QuotaExhausted,
                format!("partner usage {} reached cap {cap}", counts.partner),
            ));
        }
    }

    Ok(())
}
