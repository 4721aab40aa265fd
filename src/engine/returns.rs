//! Returned goods.
//!
//! A return never decrements a historical accumulator. The share of the sale's
//! credited distribution that belongs to the returned units is taken back out
//! of the three vaults as `reversal` outflows, so the movement log and the
//! monotonic totals keep agreeing.

use tracing::info;

use crate::{
    domain::{DomainError, Links, MovementKind, ReturnId, SaleId, SaleReturn},
    engine::{
        errors::LedgerError,
        ledger::{Funds, post_legs},
        store::{Store, UnitOfWork},
    },
};

pub(crate) fn register_return_in(
    uow: &mut UnitOfWork<'_>,
    sale_id: SaleId,
    quantity: u32,
) -> Result<SaleReturn, LedgerError> {
    if quantity == 0 {
        return Err(DomainError::InvalidSale("return quantity must be positive").into());
    }
    let sale = uow.sale(sale_id)?.clone();
    let unreturned = sale.quantity.saturating_sub(sale.returned_quantity);
    if quantity > unreturned {
        return Err(LedgerError::ReturnExceedsQuantity {
            requested: quantity,
            available: unreturned,
        });
    }

    let still_credited = sale.credited - uow.tables().reversed_for(sale_id);
    let reversed = still_credited
        .share(i64::from(quantity), i64::from(unreturned))
        .ok_or(DomainError::Overflow)?;

    let sale_return = uow.append_return(SaleReturn {
        id: ReturnId::from(0),
        sale: sale_id,
        quantity,
        reversed,
        timestamp: uow.now(),
    });
    let links =
        Links::sale(&sale).with_reference(format!("return:{}", u64::from(sale_return.id)));
    post_legs(
        uow,
        &reversed,
        MovementKind::Reversal,
        MovementKind::ReversalCredit,
        Funds::Checked,
        &format!("Return of {quantity} units on sale {sale_id}"),
        &links,
    )?;
    uow.update_sale(sale_id, |s| s.returned_quantity += quantity)?;
    Ok(sale_return)
}

pub struct Returns<'s, S> {
    store: &'s S,
}

impl<'s, S: Store> Returns<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn register_return(&self, sale: SaleId, quantity: u32) -> Result<SaleReturn, LedgerError> {
        let sale_return = self
            .store
            .write(|uow| register_return_in(uow, sale, quantity))?;
        info!(%sale, quantity, refund = ?sale_return.refund(), "registered return");
        Ok(sale_return)
    }
}
