use std::cmp::Ordering;

use crate::domain::policy::CommissionPolicy;
use crate::domain::result::{TraceEntry, TraceReason};

#[derive(Clone, Debug, Default)]
pub struct Resolution<'a> {
    /// Policies to apply, highest priority first.
    pub selected: Vec<&'a CommissionPolicy>,
    /// Matched policies left out by stacking or exclusivity rules.
    pub passed_over: Vec<TraceEntry>,
}

pub trait ConflictResolver: Send + Sync {
    fn resolve<'a>(&self, matched: &[&'a CommissionPolicy]) -> Resolution<'a>;
}

#[derive(Default)]
pub struct PriorityConflictResolver;

impl ConflictResolver for PriorityConflictResolver {
    fn resolve<'a>(&self, matched: &[&'a CommissionPolicy]) -> Resolution<'a> {
        resolve_conflicts(matched)
    }
}

/// Descending priority, then ascending policy code. Total over distinct codes.
pub fn priority_order(left: &CommissionPolicy, right: &CommissionPolicy) -> Ordering {
    right.priority.cmp(&left.priority).then_with(|| left.policy_code.cmp(&right.policy_code))
}

pub fn resolve_conflicts<'a>(matched: &[&'a CommissionPolicy]) -> Resolution<'a> {
    let mut ranked = matched.to_vec();
    ranked.sort_by(|left, right| priority_order(left, right));

    let mut ranked = ranked.into_iter();
    let Some(top) = ranked.next() else {
        return Resolution::default();
    };

    let mut resolution = Resolution { selected: vec![top], passed_over: Vec::new() };
    for candidate in ranked {
        match stacking_veto(&resolution.selected, candidate) {
            None => resolution.selected.push(candidate),
            Some(detail) => resolution.passed_over.push(TraceEntry {
                policy_code: candidate.policy_code.clone(),
                reason: TraceReason::MatchedNotSelectedExclusivity,
                detail,
            }),
        }
    }
    resolution
}

fn stacking_veto(selected: &[&CommissionPolicy], candidate: &CommissionPolicy) -> Option<String> {
    let top = selected.first()?;
    if !top.can_stack_with_other_policies {
        return Some(format!("top-priority policy `{}` does not stack", top.policy_code));
    }
    if !candidate.can_stack_with_other_policies {
        return Some("policy does not stack".to_string());
    }
    for chosen in selected {
        if chosen.excludes(&candidate.policy_code) {
            return Some(format!("excluded by `{}`", chosen.policy_code));
        }
        if candidate.excludes(&chosen.policy_code) {
            return Some(format!("excludes selected policy `{}`", chosen.policy_code));
        }
    }
    None
}
