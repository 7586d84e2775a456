use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{CategoryId, PartnerId, PartnerTier, ProductId, SupplierId};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyCode(pub String);

impl PolicyCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PolicyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PolicyCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Default,
    TierBased,
    ProductSpecific,
    Category,
    Promotional,
    PartnerSpecific,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::TierBased => "tier_based",
            Self::ProductSpecific => "product_specific",
            Self::Category => "category",
            Self::Promotional => "promotional",
            Self::PartnerSpecific => "partner_specific",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Inactive,
    Scheduled,
    Expired,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Scheduled => "scheduled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "scheduled" => Some(Self::Scheduled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// One band of a tiered policy. Exactly one of `rate` or `amount` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_amount: Decimal,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl CommissionTier {
    pub fn contains(&self, order_amount: Decimal) -> bool {
        self.min_amount <= order_amount
            && self.max_amount.map_or(true, |max_amount| order_amount <= max_amount)
    }
}

/// How a policy turns an order into money. Rates are percentages (`10` means 10%).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "commission_type", rename_all = "snake_case")]
pub enum CommissionRule {
    Percentage { rate: Decimal },
    Fixed { amount: Decimal },
    Tiered { tiers: Vec<CommissionTier> },
}

impl CommissionRule {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Percentage { .. } => "percentage",
            Self::Fixed { .. } => "fixed",
            Self::Tiered { .. } => "tiered",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    #[serde(default)]
    pub partner_id: Option<PartnerId>,
    #[serde(default)]
    pub partner_tier: Option<PartnerTier>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub supplier_id: Option<SupplierId>,
    #[serde(default)]
    pub category: Option<CategoryId>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
}

impl PolicyScope {
    pub fn is_unscoped(&self) -> bool {
        self.partner_id.is_none()
            && self.partner_tier.is_none()
            && self.product_id.is_none()
            && self.supplier_id.is_none()
            && self.category.is_none()
            && self.tags.as_ref().map_or(true, BTreeSet::is_empty)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub max_order_amount: Option<Decimal>,
    #[serde(default)]
    pub requires_new_customer: bool,
    #[serde(default)]
    pub exclude_discounted_items: bool,
}

impl PolicyConditions {
    pub fn is_unconditional(&self) -> bool {
        self.valid_from.is_none()
            && self.valid_until.is_none()
            && self.min_order_amount.is_none()
            && self.max_order_amount.is_none()
            && !self.requires_new_customer
            && !self.exclude_discounted_items
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUsage {
    #[serde(default)]
    pub max_usage_per_partner: Option<u64>,
    #[serde(default)]
    pub max_usage_total: Option<u64>,
    #[serde(default)]
    pub current_usage_count: u64,
}

impl PolicyUsage {
    pub fn is_capped(&self) -> bool {
        self.max_usage_per_partner.is_some() || self.max_usage_total.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAudit {
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPolicy {
    pub policy_code: PolicyCode,
    pub name: String,
    pub policy_type: PolicyType,
    pub status: PolicyStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub can_stack_with_other_policies: bool,
    #[serde(default)]
    pub exclusive_with: BTreeSet<PolicyCode>,
    #[serde(default)]
    pub scope: PolicyScope,
    pub rule: CommissionRule,
    #[serde(default)]
    pub min_commission: Option<Decimal>,
    #[serde(default)]
    pub max_commission: Option<Decimal>,
    #[serde(default)]
    pub conditions: PolicyConditions,
    #[serde(default)]
    pub usage: PolicyUsage,
    #[serde(default)]
    pub audit: PolicyAudit,
}

impl CommissionPolicy {
    /// Status as of `now`: the stored status column is re-checked against the validity window.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PolicyStatus {
        match self.status {
            PolicyStatus::Inactive | PolicyStatus::Expired => self.status,
            PolicyStatus::Active | PolicyStatus::Scheduled => {
                if self.conditions.valid_until.is_some_and(|until| now > until) {
                    PolicyStatus::Expired
                } else if self.conditions.valid_from.is_some_and(|from| now < from) {
                    PolicyStatus::Scheduled
                } else {
                    PolicyStatus::Active
                }
            }
        }
    }

    pub fn excludes(&self, other: &PolicyCode) -> bool {
        self.exclusive_with.contains(other)
    }
}
