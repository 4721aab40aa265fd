//! Purchase orders owed to distributors and the payouts that settle them.

use tracing::info;

use crate::{
    domain::{
        BankId, Distributor, DistributorId, DomainError, Links, Money, Movement, MovementKind,
        NewPurchaseOrder, PaymentState, PurchaseOrder, PurchaseOrderId,
    },
    engine::{
        errors::LedgerError,
        ledger::{Funds, post},
        store::{Store, UnitOfWork},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutOutcome {
    pub purchase_order: PurchaseOrder,
    pub movement: Movement,
}

/// Creates the distributor, or renames it if it already exists.
pub(crate) fn register_distributor_in(
    uow: &mut UnitOfWork<'_>,
    id: DistributorId,
    name: &str,
) -> Result<Distributor, LedgerError> {
    let distributor = match uow.distributor(id) {
        Ok(existing) => Distributor {
            name: name.to_owned(),
            ..existing.clone()
        },
        Err(_) => Distributor::new(id, name),
    };
    uow.put_distributor(distributor.clone());
    Ok(distributor)
}

pub(crate) fn register_purchase_order_in(
    uow: &mut UnitOfWork<'_>,
    input: &NewPurchaseOrder,
) -> Result<PurchaseOrder, LedgerError> {
    if input.quantity == 0 {
        return Err(DomainError::InvalidSale("quantity must be positive").into());
    }
    for price in [input.unit_cost, input.unit_freight] {
        if price.is_negative() {
            return Err(LedgerError::InvalidAmount(price));
        }
    }
    let total = input
        .unit_cost
        .checked_add(input.unit_freight)
        .and_then(|unit| unit.checked_mul(input.quantity))
        .ok_or(DomainError::Overflow)?;
    let debt = uow
        .distributor(input.distributor)?
        .outstanding_debt
        .checked_add(total)
        .ok_or(DomainError::Overflow)?;
    let order = PurchaseOrder {
        id: input.id,
        distributor: input.distributor,
        quantity: input.quantity,
        unit_cost: input.unit_cost,
        unit_freight: input.unit_freight,
        total,
        amount_paid: Money::ZERO,
        amount_remaining: total,
        payment_state: PaymentState::for_amounts(Money::ZERO, total),
        payment_count: 0,
        created_at: uow.now(),
    };
    uow.insert_purchase_order(order.clone())?;
    uow.update_distributor(input.distributor, |d| d.outstanding_debt = debt)?;

    match input.initial_payment {
        Some((bank, amount)) if !amount.is_zero() => {
            Ok(pay_purchase_order_in(uow, order.id, bank, amount)?.purchase_order)
        }
        _ => Ok(order),
    }
}

pub(crate) fn pay_purchase_order_in(
    uow: &mut UnitOfWork<'_>,
    id: PurchaseOrderId,
    bank: BankId,
    amount: Money,
) -> Result<PayoutOutcome, LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let order = uow.purchase_order(id)?.clone();
    if amount > order.amount_remaining {
        return Err(LedgerError::Overpayment {
            amount,
            remaining: order.amount_remaining,
        });
    }

    let links = Links {
        purchase_order: Some(order.id),
        distributor: Some(order.distributor),
        ..Links::default()
    };
    let movement = post(
        uow,
        bank,
        MovementKind::Payout,
        amount,
        format!("Payment on purchase order {}", order.id),
        links,
        Funds::Checked,
    )?;

    let paid = order.amount_paid + amount;
    let mut updated = order.clone();
    updated.amount_paid = paid;
    updated.amount_remaining = order.total - paid;
    updated.payment_state = PaymentState::for_amounts(paid, order.total);
    updated.payment_count += 1;
    uow.update_purchase_order(id, |o| *o = updated.clone())?;
    let total_paid = uow
        .distributor(order.distributor)?
        .total_paid
        .checked_add(amount)
        .ok_or(DomainError::Overflow)?;
    uow.update_distributor(order.distributor, |d| {
        d.outstanding_debt -= amount;
        d.total_paid = total_paid;
        d.payment_count += 1;
    })?;

    Ok(PayoutOutcome {
        purchase_order: updated,
        movement,
    })
}

pub struct Payables<'s, S> {
    store: &'s S,
}

impl<'s, S: Store> Payables<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn register_distributor(
        &self,
        id: DistributorId,
        name: &str,
    ) -> Result<Distributor, LedgerError> {
        self.store.write(|uow| register_distributor_in(uow, id, name))
    }

    pub fn register_purchase_order(
        &self,
        input: &NewPurchaseOrder,
    ) -> Result<PurchaseOrder, LedgerError> {
        let order = self
            .store
            .write(|uow| register_purchase_order_in(uow, input))?;
        info!(purchase_order = %order.id, total = %order.total, "registered purchase order");
        Ok(order)
    }

    pub fn pay_purchase_order(
        &self,
        id: PurchaseOrderId,
        bank: BankId,
        amount: Money,
    ) -> Result<PayoutOutcome, LedgerError> {
        let outcome = self
            .store
            .write(|uow| pay_purchase_order_in(uow, id, bank, amount))?;
        info!(
            purchase_order = %id,
            ?bank,
            %amount,
            state = ?outcome.purchase_order.payment_state,
            "paid purchase order"
        );
        Ok(outcome)
    }
}
