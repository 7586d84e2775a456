use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::policy::{
    CommissionPolicy, CommissionRule, CommissionTier, PolicyCode, PolicyStatus, PolicyType,
};
use crate::errors::ConfigurationError;

/// A validated snapshot of candidate policies, ordered by policy code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicySet {
    policies: Vec<CommissionPolicy>,
    default_index: usize,
    checksum: String,
}

/// On-disk catalogue shape: `{ "policies": [...] }` in JSON or `[[policies]]` in TOML.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PolicyCatalogue {
    #[serde(default)]
    pub policies: Vec<CommissionPolicy>,
}

impl PolicySet {
    pub fn load(policies: Vec<CommissionPolicy>) -> Result<Self, ConfigurationError> {
        let mut by_code = BTreeMap::new();
        for policy in policies {
            let code = policy.policy_code.clone();
            if by_code.insert(code.clone(), policy).is_some() {
                return Err(ConfigurationError::DuplicatePolicyCode(code));
            }
        }

        for policy in by_code.values() {
            validate_policy(policy)?;
        }
        validate_exclusivity(&by_code)?;
        let default_code = validate_default(&by_code)?;

        let policies: Vec<CommissionPolicy> = by_code.into_values().collect();
        let default_index = policies
            .iter()
            .position(|policy| policy.policy_code == default_code)
            .unwrap_or_default();
        let checksum = checksum_for(&policies);
        debug!(
            event_name = "commission.policy_set.loaded",
            policy_count = policies.len(),
            default_policy = %default_code,
            checksum = %checksum,
            "policy set validated"
        );

        Ok(Self { policies, default_index, checksum })
    }

    pub fn policies(&self) -> &[CommissionPolicy] {
        &self.policies
    }

    pub fn default_policy(&self) -> &CommissionPolicy {
        &self.policies[self.default_index]
    }

    /// Content hash of the snapshot, stable across insertion order.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

impl TryFrom<PolicyCatalogue> for PolicySet {
    type Error = ConfigurationError;

    fn try_from(catalogue: PolicyCatalogue) -> Result<Self, Self::Error> {
        Self::load(catalogue.policies)
    }
}

fn checksum_for(policies: &[CommissionPolicy]) -> String {
    let canonical = serde_json::to_string(policies)
        .unwrap_or_else(|error| format!("serialization_error:{error}"));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn validate_policy(policy: &CommissionPolicy) -> Result<(), ConfigurationError> {
    let code = &policy.policy_code;

    if let (Some(from), Some(until)) = (policy.conditions.valid_from, policy.conditions.valid_until)
    {
        if from > until {
            return Err(ConfigurationError::InvalidValidityWindow(code.clone()));
        }
    }

    non_negative(code, "min_commission", policy.min_commission)?;
    non_negative(code, "max_commission", policy.max_commission)?;
    ordered(
        code,
        ("min_commission", policy.min_commission),
        ("max_commission", policy.max_commission),
    )?;

    non_negative(code, "min_order_amount", policy.conditions.min_order_amount)?;
    non_negative(code, "max_order_amount", policy.conditions.max_order_amount)?;
    ordered(
        code,
        ("min_order_amount", policy.conditions.min_order_amount),
        ("max_order_amount", policy.conditions.max_order_amount),
    )?;

    match &policy.rule {
        CommissionRule::Percentage { rate } => non_negative(code, "commission_rate", Some(*rate))?,
        CommissionRule::Fixed { amount } => {
            non_negative(code, "commission_amount", Some(*amount))?
        }
        CommissionRule::Tiered { tiers } => validate_tiers(code, tiers)?,
    }

    if let Some(cap) = policy.usage.max_usage_total {
        let current = policy.usage.current_usage_count;
        if current > cap {
            return Err(ConfigurationError::UsageOverCap {
                policy_code: code.clone(),
                current,
                cap,
            });
        }
        if current == cap && policy.status == PolicyStatus::Active {
            warn!(
                event_name = "commission.policy_set.exhausted_active_policy",
                policy_code = %code,
                cap,
                "active policy has already used its whole quota and will never match"
            );
        }
    }

    Ok(())
}

fn non_negative(
    code: &PolicyCode,
    field: &'static str,
    value: Option<Decimal>,
) -> Result<(), ConfigurationError> {
    match value {
        Some(value) if value < Decimal::ZERO => {
            Err(ConfigurationError::NegativeValue { policy_code: code.clone(), field })
        }
        _ => Ok(()),
    }
}

fn ordered(
    code: &PolicyCode,
    (lower, low): (&'static str, Option<Decimal>),
    (upper, high): (&'static str, Option<Decimal>),
) -> Result<(), ConfigurationError> {
    match (low, high) {
        (Some(low), Some(high)) if low > high => {
            Err(ConfigurationError::InvertedBounds { policy_code: code.clone(), lower, upper })
        }
        _ => Ok(()),
    }
}

/// Tiers must be listed in ascending order, must not overlap, and only the last may be
/// open-ended. Gaps between bands are allowed: an amount that falls in one earns nothing.
fn validate_tiers(code: &PolicyCode, tiers: &[CommissionTier]) -> Result<(), ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidTiers {
        policy_code: code.clone(),
        reason,
    };

    if tiers.is_empty() {
        return Err(invalid("at least one tier is required".to_string()));
    }

    for (index, tier) in tiers.iter().enumerate() {
        match (tier.rate, tier.amount) {
            (Some(_), Some(_)) => {
                return Err(invalid(format!("tier {index} sets both rate and amount")))
            }
            (None, None) => {
                return Err(invalid(format!("tier {index} sets neither rate nor amount")))
            }
            (Some(value), None) | (None, Some(value)) => {
                if value < Decimal::ZERO {
                    return Err(invalid(format!("tier {index} has a negative rate or amount")));
                }
            }
        }

        if tier.min_amount < Decimal::ZERO {
            return Err(invalid(format!("tier {index} has a negative min_amount")));
        }
        if tier.max_amount.is_some_and(|max_amount| max_amount < tier.min_amount) {
            return Err(invalid(format!("tier {index} has max_amount below min_amount")));
        }
    }

    for (index, pair) in tiers.windows(2).enumerate() {
        let (current, next) = (&pair[0], &pair[1]);
        let Some(current_max) = current.max_amount else {
            return Err(invalid(format!(
                "tier {index} is open-ended but tier {} follows it",
                index + 1
            )));
        };
        if next.min_amount <= current.min_amount {
            return Err(invalid(format!("tier {} is not in ascending order", index + 1)));
        }
        if next.min_amount <= current_max {
            return Err(invalid(format!("tier {} overlaps tier {index}", index + 1)));
        }
    }

    Ok(())
}

fn validate_exclusivity(
    by_code: &BTreeMap<PolicyCode, CommissionPolicy>,
) -> Result<(), ConfigurationError> {
    for (code, policy) in by_code {
        for excluded in &policy.exclusive_with {
            if excluded == code {
                return Err(ConfigurationError::SelfExclusion(code.clone()));
            }
            match by_code.get(excluded) {
                Some(other) if !other.excludes(code) => {
                    return Err(ConfigurationError::AsymmetricExclusivity {
                        policy_code: code.clone(),
                        excluded: excluded.clone(),
                    });
                }
                Some(_) => {}
                None => warn!(
                    event_name = "commission.policy_set.unknown_exclusion",
                    policy_code = %code,
                    excluded = %excluded,
                    "exclusive_with references a policy outside this snapshot"
                ),
            }
        }
    }
    Ok(())
}

fn validate_default(
    by_code: &BTreeMap<PolicyCode, CommissionPolicy>,
) -> Result<PolicyCode, ConfigurationError> {
    let defaults: Vec<&CommissionPolicy> = by_code
        .values()
        .filter(|policy| {
            policy.policy_type == PolicyType::Default
                && matches!(policy.status, PolicyStatus::Active)
        })
        .collect();

    let fallback = match defaults.as_slice() {
        [] => return Err(ConfigurationError::MissingDefaultPolicy),
        [only] => *only,
        many => {
            return Err(ConfigurationError::MultipleDefaultPolicies {
                codes: many.iter().map(|policy| policy.policy_code.clone()).collect(),
            })
        }
    };

    let restricted = |reason: &str| ConfigurationError::RestrictedDefaultPolicy {
        policy_code: fallback.policy_code.clone(),
        reason: reason.to_string(),
    };
    if !fallback.scope.is_unscoped() {
        return Err(restricted("it has scope predicates"));
    }
    if !fallback.conditions.is_unconditional() {
        return Err(restricted("it has validity or order conditions"));
    }
    if fallback.usage.is_capped() {
        return Err(restricted("it has a usage cap"));
    }

    let excluded_by: BTreeSet<&PolicyCode> = by_code
        .values()
        .filter(|policy| policy.excludes(&fallback.policy_code))
        .map(|policy| &policy.policy_code)
        .collect();
    if !excluded_by.is_empty() {
        debug!(
            event_name = "commission.policy_set.default_exclusions",
            default_policy = %fallback.policy_code,
            excluded_by = excluded_by.len(),
            "default policy participates in exclusivity pairs"
        );
    }

    Ok(fallback.policy_code.clone())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{PolicyCatalogue, PolicySet};
    use crate::domain::fixtures::{default_policy, policy};
    use crate::domain::order::PartnerId;
    use crate::domain::policy::{CommissionRule, CommissionTier, PolicyCode, PolicyStatus};
    use crate::errors::ConfigurationError;

    fn tier(min: i64, max: Option<i64>, rate: i64) -> CommissionTier {
        CommissionTier {
            min_amount: Decimal::from(min),
            max_amount: max.map(Decimal::from),
            rate: Some(Decimal::from(rate)),
            amount: None,
        }
    }

    fn tiered(code: &str, tiers: Vec<CommissionTier>) -> crate::domain::policy::CommissionPolicy {
        policy(code, 10, CommissionRule::Tiered { tiers })
    }

    #[test]
    fn loads_a_valid_set_sorted_by_code() {
        let set = PolicySet::load(vec![
            policy("ZETA", 1, CommissionRule::Fixed { amount: Decimal::ONE }),
            default_policy(),
            tiered("ALPHA", vec![tier(0, Some(999), 5), tier(1000, None, 10)]),
        ])
        .expect("valid set");

        let codes: Vec<&str> = set.policies().iter().map(|p| p.policy_code.as_str()).collect();
        assert_eq!(codes, vec!["ALPHA", "DEFAULT", "ZETA"]);
        assert_eq!(set.default_policy().policy_code.as_str(), "DEFAULT");
        assert!(set.checksum().starts_with("sha256:"));
    }

    #[test]
    fn checksum_ignores_input_order() {
        let a = policy("A", 1, CommissionRule::Fixed { amount: Decimal::ONE });
        let first = PolicySet::load(vec![a.clone(), default_policy()]).expect("first");
        let second = PolicySet::load(vec![default_policy(), a]).expect("second");
        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn rejects_set_without_default_policy() {
        let error = PolicySet::load(vec![policy(
            "ONLY",
            1,
            CommissionRule::Fixed { amount: Decimal::ONE },
        )])
        .expect_err("no default");
        assert_eq!(error, ConfigurationError::MissingDefaultPolicy);
    }

    #[test]
    fn inactive_default_does_not_count() {
        let mut fallback = default_policy();
        fallback.status = PolicyStatus::Inactive;
        let error = PolicySet::load(vec![fallback]).expect_err("inactive default");
        assert_eq!(error, ConfigurationError::MissingDefaultPolicy);
    }

    #[test]
    fn rejects_two_default_policies() {
        let mut second = default_policy();
        second.policy_code = PolicyCode::from("DEFAULT-2");
        let error = PolicySet::load(vec![default_policy(), second]).expect_err("two defaults");
        assert!(matches!(
            error,
            ConfigurationError::MultipleDefaultPolicies { ref codes } if codes.len() == 2
        ));
    }

    #[test]
    fn rejects_scoped_or_capped_default() {
        let mut scoped = default_policy();
        scoped.scope.partner_id = Some(PartnerId("p-1".to_string()));
        assert!(matches!(
            PolicySet::load(vec![scoped]),
            Err(ConfigurationError::RestrictedDefaultPolicy { .. })
        ));

        let mut capped = default_policy();
        capped.usage.max_usage_total = Some(100);
        assert!(matches!(
            PolicySet::load(vec![capped]),
            Err(ConfigurationError::RestrictedDefaultPolicy { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_codes() {
        let error = PolicySet::load(vec![default_policy(), default_policy()])
            .expect_err("duplicate codes");
        assert_eq!(error, ConfigurationError::DuplicatePolicyCode(PolicyCode::from("DEFAULT")));
    }

    #[test]
    fn rejects_asymmetric_exclusivity() {
        let mut a = policy("A", 20, CommissionRule::Fixed { amount: Decimal::ONE });
        a.exclusive_with.insert(PolicyCode::from("B"));
        let b = policy("B", 10, CommissionRule::Fixed { amount: Decimal::ONE });

        let error = PolicySet::load(vec![default_policy(), a.clone(), b.clone()])
            .expect_err("asymmetric");
        assert_eq!(
            error,
            ConfigurationError::AsymmetricExclusivity {
                policy_code: PolicyCode::from("A"),
                excluded: PolicyCode::from("B"),
            }
        );

        let mut b = b;
        b.exclusive_with.insert(PolicyCode::from("A"));
        PolicySet::load(vec![default_policy(), a, b]).expect("symmetric pair loads");
    }

    #[test]
    fn rejects_self_exclusion() {
        let mut a = policy("A", 20, CommissionRule::Fixed { amount: Decimal::ONE });
        a.exclusive_with.insert(PolicyCode::from("A"));
        assert_eq!(
            PolicySet::load(vec![default_policy(), a]),
            Err(ConfigurationError::SelfExclusion(PolicyCode::from("A")))
        );
    }

    #[test]
    fn tolerates_exclusion_of_policy_outside_snapshot() {
        let mut a = policy("A", 20, CommissionRule::Fixed { amount: Decimal::ONE });
        a.exclusive_with.insert(PolicyCode::from("RETIRED"));
        PolicySet::load(vec![default_policy(), a]).expect("unknown exclusion tolerated");
    }

    #[test]
    fn rejects_overlapping_unordered_and_unreachable_tiers() {
        let overlapping = tiered("T", vec![tier(0, Some(1000), 5), tier(1000, None, 10)]);
        assert!(matches!(
            PolicySet::load(vec![default_policy(), overlapping]),
            Err(ConfigurationError::InvalidTiers { ref reason, .. }) if reason.contains("overlaps")
        ));

        let unordered = tiered("T", vec![tier(1000, Some(2000), 10), tier(0, Some(999), 5)]);
        assert!(matches!(
            PolicySet::load(vec![default_policy(), unordered]),
            Err(ConfigurationError::InvalidTiers { ref reason, .. }) if reason.contains("ascending")
        ));

        let unreachable = tiered("T", vec![tier(0, None, 5), tier(1000, None, 10)]);
        assert!(matches!(
            PolicySet::load(vec![default_policy(), unreachable]),
            Err(ConfigurationError::InvalidTiers { ref reason, .. })
                if reason.contains("open-ended")
        ));

        let empty = tiered("T", Vec::new());
        assert!(matches!(
            PolicySet::load(vec![default_policy(), empty]),
            Err(ConfigurationError::InvalidTiers { .. })
        ));
    }

    #[test]
    fn rejects_tier_with_both_rate_and_amount() {
        let mut both = tier(0, None, 5);
        both.amount = Some(Decimal::ONE);
        let error = PolicySet::load(vec![default_policy(), tiered("T", vec![both])])
            .expect_err("both set");
        assert!(matches!(
            error,
            ConfigurationError::InvalidTiers { ref reason, .. } if reason.contains("both")
        ));
    }

    #[test]
    fn rejects_inverted_window_bounds_and_negative_values() {
        let now = Utc::now();
        let mut window = policy("W", 1, CommissionRule::Fixed { amount: Decimal::ONE });
        window.conditions.valid_from = Some(now);
        window.conditions.valid_until = Some(now - Duration::days(1));
        assert_eq!(
            PolicySet::load(vec![default_policy(), window]),
            Err(ConfigurationError::InvalidValidityWindow(PolicyCode::from("W")))
        );

        let mut clamps = policy("C", 1, CommissionRule::Fixed { amount: Decimal::ONE });
        clamps.min_commission = Some(Decimal::from(50));
        clamps.max_commission = Some(Decimal::from(10));
        assert!(matches!(
            PolicySet::load(vec![default_policy(), clamps]),
            Err(ConfigurationError::InvertedBounds { lower: "min_commission", .. })
        ));

        let negative = policy("N", 1, CommissionRule::Percentage { rate: Decimal::from(-5) });
        assert!(matches!(
            PolicySet::load(vec![default_policy(), negative]),
            Err(ConfigurationError::NegativeValue { field: "commission_rate", .. })
        ));
    }

    #[test]
    fn rejects_usage_above_total_cap() {
        let mut over = policy("Q", 1, CommissionRule::Fixed { amount: Decimal::ONE });
        over.usage.max_usage_total = Some(3);
        over.usage.current_usage_count = 4;
        assert!(matches!(
            PolicySet::load(vec![default_policy(), over]),
            Err(ConfigurationError::UsageOverCap { current: 4, cap: 3, .. })
        ));
    }

    #[test]
    fn catalogue_loads_from_toml() {
        let catalogue: PolicyCatalogue = toml::from_str(
            r#"
[[policies]]
policy_code = "DEFAULT"
name = "Platform default"
policy_type = "default"
status = "active"

[policies.rule]
commission_type = "percentage"
rate = "5"

[[policies]]
policy_code = "VIP"
name = "VIP tiers"
policy_type = "tier_based"
status = "active"
priority = 50

[policies.scope]
partner_tier = "gold"

[policies.rule]
commission_type = "tiered"
tiers = [
  { min_amount = "0", max_amount = "999", rate = "5" },
  { min_amount = "1000", rate = "10" },
]
"#,
        )
        .expect("parse catalogue");

        let set = PolicySet::try_from(catalogue).expect("valid catalogue");
        let codes: Vec<&str> =
            set.policies().iter().map(|policy| policy.policy_code.as_str()).collect();
        assert_eq!(codes, vec!["DEFAULT", "VIP"]);
    }
}
