//! Full-value three-way split of a sale.

use crate::{
    domain::{DomainError, Distribution, Money},
    engine::errors::LedgerError,
};

/// Result of [`compute_full_distribution`]: the three legs and what the client pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullDistribution {
    pub distribution: Distribution,
    pub total: Money,
}

/// Splits `unit_sale_price * quantity` into cost recovery, freight and profit.
///
/// Profit is negative when the sale price doesn't cover cost plus freight; that
/// is a valid loss-making sale, not an error.
pub fn compute_full_distribution(
    quantity: u32,
    unit_sale_price: Money,
    unit_cost_price: Money,
    unit_freight: Money,
) -> Result<FullDistribution, LedgerError> {
    if quantity == 0 {
        return Err(DomainError::InvalidSale("quantity must be positive").into());
    }
    for price in [unit_sale_price, unit_cost_price, unit_freight] {
        if price.is_negative() {
            return Err(LedgerError::InvalidAmount(price));
        }
    }

    let total = unit_sale_price
        .checked_mul(quantity)
        .ok_or(DomainError::Overflow)?;
    let cost_recovery = unit_cost_price
        .checked_mul(quantity)
        .ok_or(DomainError::Overflow)?;
    let freight = unit_freight
        .checked_mul(quantity)
        .ok_or(DomainError::Overflow)?;
    let profit = unit_sale_price
        .checked_sub(unit_cost_price)
        .and_then(|m| m.checked_sub(unit_freight))
        .and_then(|m| m.checked_mul(quantity))
        .ok_or(DomainError::Overflow)?;

    let distribution = Distribution::new(cost_recovery, freight, profit);
    if distribution.checked_total().ok_or(DomainError::Overflow)? != total {
        return Err(LedgerError::DistributionImbalance {
            distribution,
            total,
        });
    }

    Ok(FullDistribution {
        distribution,
        total,
    })
}
