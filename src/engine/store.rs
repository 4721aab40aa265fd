//! Repository and unit-of-work abstraction.
//!
//! Every write goes through [`Store::write`], which hands the closure a
//! [`UnitOfWork`]. The unit of work records an undo entry for each change and
//! rolls all of them back when it is dropped without being committed, so a
//! failing leg never leaves the movement log and the bank aggregates out of
//! step with each other.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    domain::{
        Bank, BankId, Direction, Distribution, Distributor, DistributorId, Installment,
        InstallmentId, Leg, Links, Movement, MovementId, MovementKind, Money, PurchaseOrder,
        PurchaseOrderId, ReturnId, Sale, SaleId, SaleReturn,
    },
    engine::errors::LedgerError,
};

/// The full persisted state.
#[derive(Debug, Clone, PartialEq)]
pub struct Tables {
    pub banks: BTreeMap<BankId, Bank>,
    pub sales: BTreeMap<SaleId, Sale>,
    pub installments: Vec<Installment>,
    pub movements: Vec<Movement>,
    pub distributors: BTreeMap<DistributorId, Distributor>,
    pub purchase_orders: BTreeMap<PurchaseOrderId, PurchaseOrder>,
    pub returns: Vec<SaleReturn>,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    /// Empty state with the fixed set of vaults at zero.
    pub fn new() -> Self {
        Self {
            banks: BankId::ALL.into_iter().map(|id| (id, Bank::new(id))).collect(),
            sales: BTreeMap::new(),
            installments: Vec::new(),
            movements: Vec::new(),
            distributors: BTreeMap::new(),
            purchase_orders: BTreeMap::new(),
            returns: Vec::new(),
        }
    }

    pub fn installments_for(&self, sale: SaleId) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(move |i| i.sale == sale)
    }

    pub fn movements_for(&self, bank: BankId) -> impl Iterator<Item = &Movement> {
        self.movements.iter().filter(move |m| m.bank == bank)
    }

    /// What the returns against `sale` have taken back out of the vaults.
    pub fn reversed_for(&self, sale: SaleId) -> Distribution {
        self.returns
            .iter()
            .filter(|r| r.sale == sale)
            .map(|r| r.reversed)
            .sum()
    }

    /// Net amount per leg that the movement log has posted to the vaults for `sale`.
    pub fn posted_for(&self, sale: SaleId) -> Distribution {
        let mut posted = Distribution::default();
        let legs = self
            .movements
            .iter()
            .filter(|m| m.links.sale == Some(sale) && m.kind.is_sale_leg());
        for movement in legs {
            let Some(leg) = Leg::ALL.into_iter().find(|leg| leg.bank() == movement.bank) else {
                continue;
            };
            match movement.direction() {
                Direction::Inflow => *posted.leg_mut(leg) += movement.amount,
                Direction::Outflow => *posted.leg_mut(leg) -= movement.amount,
            }
        }
        posted
    }

    fn next_movement_id(&self) -> MovementId {
        let last = self.movements.last().map_or(0, |m| u64::from(m.id));
        MovementId::from(last + 1)
    }

    fn next_installment_id(&self) -> InstallmentId {
        let last = self.installments.last().map_or(0, |i| u64::from(i.id));
        InstallmentId::from(last + 1)
    }

    fn next_return_id(&self) -> ReturnId {
        let last = self.returns.last().map_or(0, |r| u64::from(r.id));
        ReturnId::from(last + 1)
    }
}

/// A movement that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct MovementDraft {
    pub bank: BankId,
    pub kind: MovementKind,
    pub amount: Money,
    pub concept: String,
    pub links: Links,
}

enum Undo {
    Bank(Bank),
    Sale(SaleId, Option<Sale>),
    Distributor(DistributorId, Option<Distributor>),
    PurchaseOrder(PurchaseOrderId, Option<PurchaseOrder>),
    Movement,
    Installment,
    Return,
}

/// A group of writes that is applied completely or not at all.
pub struct UnitOfWork<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
    now: DateTime<Utc>,
    committed: bool,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            now: Utc::now(),
            committed: false,
        }
    }

    /// Timestamp shared by everything written in this unit of work.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn tables(&self) -> &Tables {
        self.tables
    }

    pub fn bank(&self, id: BankId) -> Result<&Bank, LedgerError> {
        self.tables.banks.get(&id).ok_or(LedgerError::UnknownBank(id))
    }

    pub fn update_bank(
        &mut self,
        id: BankId,
        update: impl FnOnce(&mut Bank),
    ) -> Result<(), LedgerError> {
        let bank = self
            .tables
            .banks
            .get_mut(&id)
            .ok_or(LedgerError::UnknownBank(id))?;
        self.undo.push(Undo::Bank(bank.clone()));
        update(bank);
        Ok(())
    }

    pub fn sale(&self, id: SaleId) -> Result<&Sale, LedgerError> {
        self.tables.sales.get(&id).ok_or(LedgerError::UnknownSale(id))
    }

    pub fn insert_sale(&mut self, sale: Sale) -> Result<(), LedgerError> {
        if self.tables.sales.contains_key(&sale.id) {
            return Err(LedgerError::DuplicateSale(sale.id));
        }
        self.undo.push(Undo::Sale(sale.id, None));
        self.tables.sales.insert(sale.id, sale);
        Ok(())
    }

    pub fn update_sale(
        &mut self,
        id: SaleId,
        update: impl FnOnce(&mut Sale),
    ) -> Result<(), LedgerError> {
        let sale = self
            .tables
            .sales
            .get_mut(&id)
            .ok_or(LedgerError::UnknownSale(id))?;
        self.undo.push(Undo::Sale(id, Some(sale.clone())));
        update(sale);
        Ok(())
    }

    pub fn distributor(&self, id: DistributorId) -> Result<&Distributor, LedgerError> {
        self.tables
            .distributors
            .get(&id)
            .ok_or(LedgerError::UnknownDistributor(id))
    }

    /// Inserts or replaces a distributor.
    pub fn put_distributor(&mut self, distributor: Distributor) {
        let previous = self
            .tables
            .distributors
            .insert(distributor.id, distributor.clone());
        self.undo.push(Undo::Distributor(distributor.id, previous));
    }

    pub fn update_distributor(
        &mut self,
        id: DistributorId,
        update: impl FnOnce(&mut Distributor),
    ) -> Result<(), LedgerError> {
        let distributor = self
            .tables
            .distributors
            .get_mut(&id)
            .ok_or(LedgerError::UnknownDistributor(id))?;
        self.undo
            .push(Undo::Distributor(id, Some(distributor.clone())));
        update(distributor);
        Ok(())
    }

    pub fn purchase_order(&self, id: PurchaseOrderId) -> Result<&PurchaseOrder, LedgerError> {
        self.tables
            .purchase_orders
            .get(&id)
            .ok_or(LedgerError::UnknownPurchaseOrder(id))
    }

    pub fn insert_purchase_order(&mut self, order: PurchaseOrder) -> Result<(), LedgerError> {
        if self.tables.purchase_orders.contains_key(&order.id) {
            return Err(LedgerError::DuplicatePurchaseOrder(order.id));
        }
        self.undo.push(Undo::PurchaseOrder(order.id, None));
        self.tables.purchase_orders.insert(order.id, order);
        Ok(())
    }

    pub fn update_purchase_order(
        &mut self,
        id: PurchaseOrderId,
        update: impl FnOnce(&mut PurchaseOrder),
    ) -> Result<(), LedgerError> {
        let order = self
            .tables
            .purchase_orders
            .get_mut(&id)
            .ok_or(LedgerError::UnknownPurchaseOrder(id))?;
        self.undo.push(Undo::PurchaseOrder(id, Some(order.clone())));
        update(order);
        Ok(())
    }

    /// Appends to the movement log. Does not touch any bank aggregate.
    pub fn append_movement(&mut self, draft: MovementDraft) -> Movement {
        let movement = Movement {
            id: self.tables.next_movement_id(),
            bank: draft.bank,
            kind: draft.kind,
            amount: draft.amount,
            timestamp: self.now,
            concept: draft.concept,
            links: draft.links,
        };
        self.undo.push(Undo::Movement);
        self.tables.movements.push(movement.clone());
        movement
    }

    /// Stores an installment, assigning its id. The id on the argument is ignored.
    pub fn append_installment(&mut self, mut installment: Installment) -> Installment {
        installment.id = self.tables.next_installment_id();
        self.undo.push(Undo::Installment);
        self.tables.installments.push(installment.clone());
        installment
    }

    pub fn append_return(&mut self, mut sale_return: SaleReturn) -> SaleReturn {
        sale_return.id = self.tables.next_return_id();
        self.undo.push(Undo::Return);
        self.tables.returns.push(sale_return.clone());
        sale_return
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.undo.clear();
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Bank(bank) => {
                    self.tables.banks.insert(bank.id, bank);
                }
                Undo::Sale(id, previous) => restore(&mut self.tables.sales, id, previous),
                Undo::Distributor(id, previous) => {
                    restore(&mut self.tables.distributors, id, previous)
                }
                Undo::PurchaseOrder(id, previous) => {
                    restore(&mut self.tables.purchase_orders, id, previous)
                }
                Undo::Movement => {
                    self.tables.movements.pop();
                }
                Undo::Installment => {
                    self.tables.installments.pop();
                }
                Undo::Return => {
                    self.tables.returns.pop();
                }
            }
        }
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

/// Injected persistence handle.
pub trait Store {
    /// A consistent, detached copy of the current state.
    fn snapshot(&self) -> Tables;

    /// Runs `work` exclusively. Changes are kept only if it returns `Ok`.
    fn write<T, E>(&self, work: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>) -> Result<T, E>;
}

/// In-memory store. One mutex serialises every unit of work, which gives each
/// sale and bank a single writer at a time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_tables(self) -> Tables {
        self.tables.into_inner()
    }
}

impl From<Tables> for MemoryStore {
    fn from(tables: Tables) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }
}

impl Store for MemoryStore {
    fn snapshot(&self) -> Tables {
        self.tables.lock().clone()
    }

    fn write<T, E>(&self, work: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>) -> Result<T, E> {
        let mut tables = self.tables.lock();
        let mut uow = UnitOfWork::new(&mut tables);
        let value = work(&mut uow)?;
        uow.commit();
        Ok(value)
    }
}
