use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::order::OrderContext;
use crate::domain::policy::{CommissionPolicy, CommissionRule, CommissionTier};

const MONEY_SCALE: u32 = 2;

pub trait CommissionCalculator: Send + Sync {
    fn calculate(&self, policy: &CommissionPolicy, ctx: &OrderContext) -> Decimal;
}

#[derive(Default)]
pub struct DeterministicCommissionCalculator;

impl CommissionCalculator for DeterministicCommissionCalculator {
    fn calculate(&self, policy: &CommissionPolicy, ctx: &OrderContext) -> Decimal {
        calculate_commission(policy, ctx.order_amount, ctx.quantity)
    }
}

/// Raw amount per rule, clamped to the policy's min/max, then rounded once to cents.
pub fn calculate_commission(
    policy: &CommissionPolicy,
    order_amount: Decimal,
    quantity: u32,
) -> Decimal {
    let raw = raw_commission(&policy.rule, order_amount, quantity);
    let clamped = clamp(raw, policy.min_commission, policy.max_commission);
    round_money(clamped)
}

pub fn raw_commission(rule: &CommissionRule, order_amount: Decimal, quantity: u32) -> Decimal {
    match rule {
        CommissionRule::Percentage { rate } => percent_of(order_amount, *rate),
        CommissionRule::Fixed { amount } => *amount * Decimal::from(quantity),
        CommissionRule::Tiered { tiers } => match find_tier(tiers, order_amount) {
            Some(CommissionTier { rate: Some(rate), .. }) => percent_of(order_amount, *rate),
            Some(CommissionTier { amount: Some(amount), .. }) => *amount * Decimal::from(quantity),
            Some(_) | None => Decimal::ZERO,
        },
    }
}

pub fn find_tier(tiers: &[CommissionTier], order_amount: Decimal) -> Option<&CommissionTier> {
    tiers.iter().find(|tier| tier.contains(order_amount))
}

fn percent_of(order_amount: Decimal, rate: Decimal) -> Decimal {
    order_amount * rate / Decimal::ONE_HUNDRED
}

fn clamp(amount: Decimal, min: Option<Decimal>, max: Option<Decimal>) -> Decimal {
    let raised = match min {
        Some(min) if amount < min => min,
        _ => amount,
    };
    match max {
        Some(max) if raised > max => max,
        _ => raised,
    }
}

/// Half-up at two decimals, always carried at scale 2.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}
