//! Partial-payment allocation and the sale payment state machine.
//!
//! Leg amounts are derived from the cumulative amount paid rather than from
//! each payment on its own. After any payment the credited legs equal
//! `full.share(amount_paid, total_price)`, and an installment's legs are the
//! difference between that figure before and after. Rounding never
//! accumulates, and a complete sale has credited exactly its full distribution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    domain::{
        Distribution, DomainError, Installment, InstallmentId, Money, Movement, MovementKind,
        NewSale, PaymentState, Sale, SaleId,
    },
    engine::{
        distribution::compute_full_distribution,
        errors::LedgerError,
        ledger::credit_installment,
        store::{Store, UnitOfWork},
    },
};

/// The outcome of spreading one payment over a sale, before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// The part of the payment actually applied to the sale.
    pub applied: Money,
    /// The part that exceeded what was owed. Handling it is up to the caller.
    pub change: Money,
    pub proportion: Decimal,
    pub legs: Distribution,
    pub cumulative_paid: Money,
    pub resulting_state: PaymentState,
}

impl Allocation {
    pub fn to_installment(&self, sale: SaleId, timestamp: DateTime<Utc>) -> Installment {
        Installment {
            id: InstallmentId::from(0),
            sale,
            amount: self.applied,
            proportion: self.proportion,
            legs: self.legs,
            cumulative_paid: self.cumulative_paid,
            resulting_state: self.resulting_state,
            timestamp,
            synthetic: false,
        }
    }

    /// The sale as it looks once this allocation is recorded.
    pub fn apply_to(&self, sale: &Sale, timestamp: DateTime<Utc>) -> Sale {
        let mut updated = sale.clone();
        updated.set_paid(self.cumulative_paid);
        updated.credited += self.legs;
        updated.installment_count += 1;
        updated.first_installment_at.get_or_insert(timestamp);
        updated.last_installment_at = Some(timestamp);
        updated
    }
}

/// The legs owed when the cumulative amount paid moves from `paid_before` to `paid_after`.
pub fn legs_between(
    full: &Distribution,
    total: Money,
    paid_before: Money,
    paid_after: Money,
) -> Result<Distribution, LedgerError> {
    let after = full.share(paid_after.minor(), total.minor());
    let before = full.share(paid_before.minor(), total.minor());
    match (after, before) {
        (Some(after), Some(before)) => Ok(after - before),
        _ => Err(DomainError::Overflow.into()),
    }
}

/// Pure allocation of `payment` against `sale`. Amounts over the remainder are
/// clamped so the proportion never exceeds 1.
pub fn allocate(sale: &Sale, payment: Money) -> Result<Allocation, LedgerError> {
    if !payment.is_positive() {
        return Err(LedgerError::InvalidAmount(payment));
    }
    if !sale.total_price.is_positive() {
        return Err(DomainError::InvalidSale("total price must be positive").into());
    }
    if sale.amount_paid >= sale.total_price {
        return Err(LedgerError::SaleSettled(sale.id));
    }
    if sale.returned_quantity > 0 {
        return Err(LedgerError::SaleHasReturns(sale.id));
    }

    let remaining = sale.total_price - sale.amount_paid;
    let applied = payment.min(remaining);
    let cumulative_paid = sale.amount_paid + applied;
    let legs = legs_between(&sale.full, sale.total_price, sale.amount_paid, cumulative_paid)?;
    if legs.checked_total() != Some(applied) {
        return Err(LedgerError::DistributionImbalance {
            distribution: legs,
            total: applied,
        });
    }

    Ok(Allocation {
        applied,
        change: payment - applied,
        proportion: applied.proportion_of(sale.total_price),
        legs,
        cumulative_paid,
        resulting_state: PaymentState::for_amounts(cumulative_paid, sale.total_price),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub installment: Installment,
    pub sale: Sale,
    pub movements: Vec<Movement>,
    pub change: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleRegistration {
    pub sale: Sale,
    pub initial_payment: Option<PaymentOutcome>,
}

/// Validates a new sale and builds its record in the pending state.
pub fn new_sale_record(input: &NewSale, created_at: DateTime<Utc>) -> Result<Sale, LedgerError> {
    let full = compute_full_distribution(
        input.quantity,
        input.unit_sale_price,
        input.unit_cost_price,
        input.unit_freight,
    )?;
    if !full.total.is_positive() {
        return Err(DomainError::InvalidSale("total price must be positive").into());
    }
    Ok(Sale {
        id: input.id,
        client: input.client,
        purchase_order: input.purchase_order,
        quantity: input.quantity,
        unit_sale_price: input.unit_sale_price,
        unit_cost_price: input.unit_cost_price,
        unit_freight: input.unit_freight,
        total_price: full.total,
        amount_paid: Money::ZERO,
        amount_remaining: full.total,
        payment_state: PaymentState::Pending,
        full: full.distribution,
        credited: Distribution::default(),
        installment_count: 0,
        first_installment_at: None,
        last_installment_at: None,
        returned_quantity: 0,
        created_at,
    })
}

pub(crate) fn apply_payment_in(
    uow: &mut UnitOfWork<'_>,
    sale_id: SaleId,
    payment: Money,
    kind: MovementKind,
) -> Result<PaymentOutcome, LedgerError> {
    let sale = uow.sale(sale_id)?.clone();
    let allocation = allocate(&sale, payment)?;
    let now = uow.now();

    let installment = uow.append_installment(allocation.to_installment(sale.id, now));
    let updated = allocation.apply_to(&sale, now);
    uow.update_sale(sale.id, |s| *s = updated.clone())?;
    let movements = credit_installment(uow, &updated, &installment, kind)?;

    Ok(PaymentOutcome {
        installment,
        sale: updated,
        movements,
        change: allocation.change,
    })
}

pub(crate) fn register_sale_in(
    uow: &mut UnitOfWork<'_>,
    input: &NewSale,
) -> Result<SaleRegistration, LedgerError> {
    let sale = new_sale_record(input, uow.now())?;
    uow.insert_sale(sale.clone())?;

    let initial_payment = match input.initial_payment {
        Some(amount) if amount.is_positive() => Some(apply_payment_in(
            uow,
            sale.id,
            amount,
            MovementKind::DistributionCredit,
        )?),
        Some(amount) if amount.is_negative() => return Err(LedgerError::InvalidAmount(amount)),
        _ => None,
    };
    let sale = match &initial_payment {
        Some(outcome) => outcome.sale.clone(),
        None => sale,
    };
    Ok(SaleRegistration {
        sale,
        initial_payment,
    })
}

/// Sale registration and client payments, each one atomic unit of work.
pub struct PaymentAllocator<'s, S> {
    store: &'s S,
}

impl<'s, S: Store> PaymentAllocator<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn register_sale(&self, input: &NewSale) -> Result<SaleRegistration, LedgerError> {
        let registration = self.store.write(|uow| register_sale_in(uow, input))?;
        info!(
            sale = %registration.sale.id,
            total = %registration.sale.total_price,
            paid = %registration.sale.amount_paid,
            "registered sale"
        );
        Ok(registration)
    }

    pub fn apply_payment(&self, sale: SaleId, amount: Money) -> Result<PaymentOutcome, LedgerError> {
        let outcome = self.store.write(|uow| {
            apply_payment_in(uow, sale, amount, MovementKind::InstallmentCredit)
        })?;
        info!(
            %sale,
            applied = %outcome.installment.amount,
            change = %outcome.change,
            state = ?outcome.sale.payment_state,
            "applied payment"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(total: i64, full: Distribution) -> Sale {
        let input = NewSale {
            id: SaleId::from(1),
            client: None,
            purchase_order: None,
            quantity: 1,
            unit_sale_price: Money::from_minor(total),
            unit_cost_price: full.cost_recovery,
            unit_freight: full.freight,
            initial_payment: None,
        };
        new_sale_record(&input, Utc::now()).unwrap()
    }

    #[test]
    fn thirds_never_lose_a_cent() {
        let full = Distribution::new(Money::from_minor(100), Money::from_minor(100), Money::from_minor(100));
        let mut current = sale(300, full);
        let mut credited = Distribution::default();
        for _ in 0..3 {
            let allocation = allocate(&current, Money::from_minor(100)).unwrap();
            assert_eq!(allocation.legs.checked_total(), Some(Money::from_minor(100)));
            credited += allocation.legs;
            current = allocation.apply_to(&current, Utc::now());
        }
        assert_eq!(credited, full);
        assert_eq!(current.payment_state, PaymentState::Complete);
    }

    #[test]
    fn zero_payment_is_rejected() {
        let full = Distribution::new(Money::from_minor(50), Money::ZERO, Money::from_minor(50));
        let current = sale(100, full);
        assert_eq!(
            allocate(&current, Money::ZERO),
            Err(LedgerError::InvalidAmount(Money::ZERO))
        );
    }

    #[test]
    fn sale_with_returned_units_takes_no_payment() {
        let full = Distribution::new(Money::from_minor(50), Money::ZERO, Money::from_minor(50));
        let mut current = sale(100, full);
        current.returned_quantity = 1;
        assert_eq!(
            allocate(&current, Money::from_minor(10)),
            Err(LedgerError::SaleHasReturns(SaleId::from(1)))
        );
    }
}
