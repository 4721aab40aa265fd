//! Append-only ledger writes.
//!
//! Every posting appends exactly one movement and updates the three aggregates
//! of exactly one bank, inside the caller's unit of work.

use tracing::{debug, info};

use crate::{
    domain::{
        BankId, Direction, Distribution, DomainError, Installment, Links, Movement, MovementKind,
        Money, Sale, SaleId,
    },
    engine::{
        errors::LedgerError,
        store::{MovementDraft, Store, Tables, UnitOfWork},
    },
};

/// Whether an outflow may take a bank below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funds {
    Checked,
    MayOverdraw,
}

/// Appends one movement and applies it to the bank aggregates.
pub fn post(
    uow: &mut UnitOfWork<'_>,
    bank: BankId,
    kind: MovementKind,
    amount: Money,
    concept: impl Into<String>,
    links: Links,
    funds: Funds,
) -> Result<Movement, LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let available = uow.bank(bank)?.current_capital;
    let direction = kind.direction();
    if direction == Direction::Outflow && funds == Funds::Checked && available < amount {
        return Err(LedgerError::InsufficientFunds {
            bank,
            available,
            requested: amount,
        });
    }

    let mut updated = uow.bank(bank)?.clone();
    match direction {
        Direction::Inflow => updated.receive(amount)?,
        Direction::Outflow => updated.pay(amount)?,
    }
    uow.update_bank(bank, |b| *b = updated)?;
    let movement = uow.append_movement(MovementDraft {
        bank,
        kind,
        amount,
        concept: concept.into(),
        links,
    });
    debug!(?bank, ?kind, %amount, id = ?movement.id, "posted movement");
    Ok(movement)
}

/// Posts one signed amount per leg to the leg's vault.
///
/// Zero legs are skipped. Positive legs are posted as `positive`, negative
/// ones (profit on a loss-making sale) as `negative` for their absolute value.
/// `funds` applies to whichever of the two is an outflow.
pub fn post_legs(
    uow: &mut UnitOfWork<'_>,
    legs: &Distribution,
    positive: MovementKind,
    negative: MovementKind,
    funds: Funds,
    concept: &str,
    links: &Links,
) -> Result<Vec<Movement>, LedgerError> {
    let mut movements = Vec::with_capacity(3);
    for (leg, amount) in legs.legs() {
        if amount.is_zero() {
            continue;
        }
        let kind = if amount.is_positive() { positive } else { negative };
        movements.push(post(
            uow,
            leg.bank(),
            kind,
            amount.abs(),
            concept,
            links.clone(),
            funds,
        )?);
    }
    Ok(movements)
}

pub fn transfer(
    uow: &mut UnitOfWork<'_>,
    from: BankId,
    to: BankId,
    amount: Money,
    concept: &str,
) -> Result<(Movement, Movement), LedgerError> {
    if from == to {
        return Err(LedgerError::SameBank);
    }
    let outgoing = post(
        uow,
        from,
        MovementKind::TransferOut,
        amount,
        concept,
        Links {
            counterparty: Some(to),
            ..Links::default()
        },
        Funds::Checked,
    )?;
    let incoming = post(
        uow,
        to,
        MovementKind::TransferIn,
        amount,
        concept,
        Links {
            counterparty: Some(from),
            ..Links::default()
        },
        Funds::Checked,
    )?;
    Ok((outgoing, incoming))
}

/// Standalone entry points, each one its own unit of work.
pub struct LedgerWriter<'s, S> {
    store: &'s S,
}

impl<'s, S: Store> LedgerWriter<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn credit(
        &self,
        bank: BankId,
        amount: Money,
        concept: &str,
        links: Links,
    ) -> Result<Movement, LedgerError> {
        let movement = self.store.write(|uow| {
            post(uow, bank, MovementKind::Credit, amount, concept, links, Funds::Checked)
        })?;
        info!(?bank, %amount, "credited bank");
        Ok(movement)
    }

    /// Fails with `InsufficientFunds` rather than overdrawing.
    pub fn debit(
        &self,
        bank: BankId,
        amount: Money,
        concept: &str,
        links: Links,
    ) -> Result<Movement, LedgerError> {
        let movement = self.store.write(|uow| {
            post(uow, bank, MovementKind::Debit, amount, concept, links, Funds::Checked)
        })?;
        info!(?bank, %amount, "debited bank");
        Ok(movement)
    }

    pub fn transfer(
        &self,
        from: BankId,
        to: BankId,
        amount: Money,
        concept: &str,
    ) -> Result<(Movement, Movement), LedgerError> {
        let movements = self
            .store
            .write(|uow| transfer(uow, from, to, amount, concept))?;
        info!(?from, ?to, %amount, "transferred between banks");
        Ok(movements)
    }

    /// Credits the legs of a stored installment the vaults never received, all
    /// or nothing. Payments post their own installments, so this is for records
    /// such as the ones a correction run rebuilds.
    pub fn apply_distribution(&self, installment: &Installment) -> Result<Vec<Movement>, LedgerError> {
        let movements = self.store.write(|uow| {
            let stored = uow
                .tables()
                .installments
                .iter()
                .find(|i| i.id == installment.id)
                .filter(|i| *i == installment)
                .cloned()
                .ok_or(LedgerError::UnknownInstallment(installment.id))?;
            let reference = installment_reference(&stored);
            let already_posted = uow
                .tables()
                .movements
                .iter()
                .any(|m| m.links.reference.as_deref() == Some(reference.as_str()));
            if already_posted || unposted(uow.tables(), stored.sale)? < stored.amount {
                return Err(LedgerError::InstallmentAlreadyPosted(stored.id));
            }
            let sale = uow.sale(stored.sale)?.clone();
            credit_installment(uow, &sale, &stored, MovementKind::InstallmentCredit)
        })?;
        info!(installment = %installment.id, sale = %installment.sale, "posted installment");
        Ok(movements)
    }
}

/// How much of the sale's installments, net of returns, the vaults have not received.
fn unposted(tables: &Tables, sale: SaleId) -> Result<Money, LedgerError> {
    let installed: Distribution = tables.installments_for(sale).map(|i| i.legs).sum();
    let owed = (installed - tables.reversed_for(sale)).checked_total();
    let posted = tables.posted_for(sale).checked_total();
    owed.zip(posted)
        .and_then(|(owed, posted)| owed.checked_sub(posted))
        .ok_or(DomainError::Overflow.into())
}

fn installment_reference(installment: &Installment) -> String {
    format!("installment:{}", installment.id)
}

pub(crate) fn credit_installment(
    uow: &mut UnitOfWork<'_>,
    sale: &Sale,
    installment: &Installment,
    kind: MovementKind,
) -> Result<Vec<Movement>, LedgerError> {
    let concept = format!("Installment {} on sale {}", installment.id, sale.id);
    let links = Links::sale(sale).with_reference(installment_reference(installment));
    post_legs(
        uow,
        &installment.legs,
        kind,
        MovementKind::LossDebit,
        Funds::MayOverdraw,
        &concept,
        &links,
    )
}
