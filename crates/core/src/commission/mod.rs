pub mod calculator;
pub mod matcher;
pub mod policy_set;
pub mod resolver;
pub mod usage;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::order::OrderContext;
use crate::domain::policy::{CommissionPolicy, PolicyCode};
use crate::domain::result::{CommissionResult, PolicyContribution, TraceEntry, TraceReason};
use crate::errors::{ApplicationError, UsageError};

use self::{
    calculator::{round_money, CommissionCalculator, DeterministicCommissionCalculator},
    matcher::{DeterministicPolicyMatcher, PolicyMatcher},
    policy_set::PolicySet,
    resolver::{ConflictResolver, PriorityConflictResolver},
    usage::{QuotaClaim, UsageTracker},
};

const AUDIT_ACTOR: &str = "resolution-engine";

/// Matcher → resolver → usage reservation → calculator. Only the tracker holds shared state;
/// everything else is pure, so one engine can serve any number of concurrent evaluations.
pub struct ResolutionEngine<
    T,
    M = DeterministicPolicyMatcher,
    R = PriorityConflictResolver,
    C = DeterministicCommissionCalculator,
> {
    tracker: T,
    matcher: M,
    resolver: R,
    calculator: C,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl<T: UsageTracker> ResolutionEngine<T> {
    pub fn new(tracker: T) -> Self {
        Self::with_components(
            tracker,
            DeterministicPolicyMatcher,
            PriorityConflictResolver,
            DeterministicCommissionCalculator,
        )
    }
}

impl<T, M, R, C> ResolutionEngine<T, M, R, C> {
    pub fn with_components(tracker: T, matcher: M, resolver: R, calculator: C) -> Self {
        Self { tracker, matcher, resolver, calculator, audit_sink: None }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit_sink {
            sink.emit(event);
        }
    }
}

impl<T, M, R, C> ResolutionEngine<T, M, R, C>
where
    T: UsageTracker,
    M: PolicyMatcher,
    R: ConflictResolver,
    C: CommissionCalculator,
{
    /// Resolves the commission for one order. Quota exhaustion and "nothing applies" are
    /// ordinary outcomes in the returned result; only bad input or a failing usage store
    /// produce an error.
    pub async fn resolve(
        &self,
        policies: &PolicySet,
        ctx: &OrderContext,
        now: DateTime<Utc>,
    ) -> Result<CommissionResult, ApplicationError> {
        validate_order(ctx)?;

        let claims: Vec<QuotaClaim> =
            policies.policies().iter().filter_map(QuotaClaim::for_policy).collect();
        let usage =
            self.tracker.snapshot(&claims, &ctx.partner_id).await.map_err(storage_failure)?;

        let report = self.matcher.match_policies(policies, ctx, &usage, now);
        let mut rejected: BTreeMap<PolicyCode, TraceEntry> = report
            .rejected
            .into_iter()
            .map(|entry| (entry.policy_code.clone(), entry))
            .collect();
        let mut candidates = report.matched;
        debug!(
            event_name = "commission.resolution.matched",
            partner_id = %ctx.partner_id.0,
            matched = candidates.len(),
            rejected = rejected.len(),
            "policy matching finished"
        );

        // Each failed reservation drops one candidate, so this terminates.
        let resolution = loop {
            let resolution = self.resolver.resolve(&candidates);
            let claims: Vec<QuotaClaim> = resolution
                .selected
                .iter()
                .filter_map(|policy| QuotaClaim::for_policy(policy))
                .collect();

            match self.tracker.reserve(&claims, &ctx.partner_id).await {
                Ok(()) => break resolution,
                Err(UsageError::QuotaExceeded { policy_code }) => {
                    let before = candidates.len();
                    candidates.retain(|policy| policy.policy_code != policy_code);
                    if candidates.len() == before {
                        return Err(ApplicationError::Persistence(format!(
                            "usage tracker rejected `{policy_code}` which was not requested"
                        )));
                    }
                    self.record_quota_exhausted(ctx, &policy_code);
                    rejected.insert(
                        policy_code.clone(),
                        TraceEntry {
                            policy_code,
                            reason: TraceReason::QuotaExhausted,
                            detail: "quota taken by a concurrent evaluation".to_string(),
                        },
                    );
                }
                Err(UsageError::Storage(message)) => {
                    return Err(ApplicationError::Persistence(message))
                }
            }
        };

        let per_policy_breakdown: Vec<PolicyContribution> = resolution
            .selected
            .iter()
            .map(|policy| PolicyContribution {
                policy_code: policy.policy_code.clone(),
                amount: self.calculator.calculate(policy, ctx),
            })
            .collect();
        let total_commission = round_money(
            per_policy_breakdown.iter().map(|contribution| contribution.amount).sum::<Decimal>(),
        );

        let mut traced: BTreeMap<PolicyCode, TraceEntry> = rejected;
        for entry in resolution.passed_over {
            traced.insert(entry.policy_code.clone(), entry);
        }
        for policy in &resolution.selected {
            traced.insert(policy.policy_code.clone(), selected_entry(policy));
        }
        let resolution_trace: Vec<TraceEntry> = policies
            .policies()
            .iter()
            .filter_map(|policy| traced.remove(&policy.policy_code))
            .collect();

        let result = CommissionResult {
            applied_policy_codes: resolution
                .selected
                .iter()
                .map(|policy| policy.policy_code.clone())
                .collect(),
            total_commission,
            per_policy_breakdown,
            resolution_trace,
        };
        self.record_result(ctx, policies, &result);
        Ok(result)
    }

    fn record_quota_exhausted(&self, ctx: &OrderContext, policy_code: &PolicyCode) {
        warn!(
            event_name = "commission.resolution.quota_exhausted",
            partner_id = %ctx.partner_id.0,
            policy_code = %policy_code,
            "reservation failed, resolving again without the exhausted policy"
        );
        self.emit(
            AuditEvent::new(
                Some(ctx.partner_id.clone()),
                "commission.quota_exhausted",
                AuditCategory::Usage,
                AUDIT_ACTOR,
                AuditOutcome::Rejected,
            )
            .with_metadata("policy_code", policy_code.as_str()),
        );
    }

    fn record_result(&self, ctx: &OrderContext, policies: &PolicySet, result: &CommissionResult) {
        let applied = result
            .applied_policy_codes
            .iter()
            .map(PolicyCode::as_str)
            .collect::<Vec<_>>()
            .join(",");

        if result.is_zero_commission() {
            warn!(
                event_name = "commission.resolution.no_applicable_policy",
                partner_id = %ctx.partner_id.0,
                policy_set = %policies.checksum(),
                "no policy applied; commission is zero"
            );
        } else {
            info!(
                event_name = "commission.resolution.resolved",
                partner_id = %ctx.partner_id.0,
                applied_policies = %applied,
                total_commission = %result.total_commission,
                "commission resolved"
            );
        }

        self.emit(
            AuditEvent::new(
                Some(ctx.partner_id.clone()),
                "commission.resolved",
                AuditCategory::Resolution,
                AUDIT_ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("applied_policies", applied)
            .with_metadata("total_commission", result.total_commission.to_string())
            .with_metadata("policy_set_checksum", policies.checksum()),
        );
    }
}

fn selected_entry(policy: &CommissionPolicy) -> TraceEntry {
    TraceEntry {
        policy_code: policy.policy_code.clone(),
        reason: TraceReason::MatchedSelected,
        detail: format!("{} commission at priority {}", policy.rule.type_name(), policy.priority),
    }
}

fn validate_order(ctx: &OrderContext) -> Result<(), ApplicationError> {
    if ctx.order_amount < Decimal::ZERO {
        return Err(ApplicationError::InvalidOrder(format!(
            "order_amount must not be negative (got {})",
            ctx.order_amount
        )));
    }
    if ctx.quantity == 0 {
        return Err(ApplicationError::InvalidOrder("quantity must be at least 1".to_string()));
    }
    Ok(())
}

fn storage_failure(error: UsageError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
