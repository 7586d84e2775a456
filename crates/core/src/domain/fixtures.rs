use std::collections::BTreeSet;

use rust_decimal::Decimal;

use crate::domain::order::{OrderContext, PartnerId, ProductId};
use crate::domain::policy::{
    CommissionPolicy, CommissionRule, PolicyAudit, PolicyCode, PolicyConditions, PolicyScope,
    PolicyStatus, PolicyType, PolicyUsage,
};

pub(crate) fn policy(code: &str, priority: i32, rule: CommissionRule) -> CommissionPolicy {
    CommissionPolicy {
        policy_code: PolicyCode(code.to_string()),
        name: format!("{code} policy"),
        policy_type: PolicyType::Promotional,
        status: PolicyStatus::Active,
        priority,
        can_stack_with_other_policies: false,
        exclusive_with: BTreeSet::new(),
        scope: PolicyScope::default(),
        rule,
        min_commission: None,
        max_commission: None,
        conditions: PolicyConditions::default(),
        usage: PolicyUsage::default(),
        audit: PolicyAudit::default(),
    }
}

/// The unscoped 5% fallback every valid policy set carries.
pub(crate) fn default_policy() -> CommissionPolicy {
    let mut fallback =
        policy("DEFAULT", 0, CommissionRule::Percentage { rate: Decimal::new(5, 0) });
    fallback.policy_type = PolicyType::Default;
    fallback
}

pub(crate) fn order(amount: Decimal) -> OrderContext {
    OrderContext {
        partner_id: PartnerId("partner-1".to_string()),
        partner_tier: None,
        product_id: ProductId("sku-1".to_string()),
        supplier_id: None,
        category: None,
        tags: BTreeSet::new(),
        order_amount: amount,
        quantity: 1,
        is_new_customer: false,
        is_discounted: false,
    }
}
