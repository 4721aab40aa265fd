//! Revenue-distribution and ledger-reconciliation engine.
//!
//! Sales are split three ways by the distribution calculator, each payment is
//! spread over the split by the allocator, and the ledger writer credits the
//! legs to their vaults. Reconciliation and correction run on demand against
//! the same store.

use tracing::{info, warn};

use crate::domain::{Event, Money};
pub use allocator::{PaymentAllocator, PaymentOutcome, SaleRegistration};
pub use correction::{CorrectionAction, CorrectionEngine, CorrectionSummary};
pub use distribution::{FullDistribution, compute_full_distribution};
pub use errors::LedgerError;
pub use ledger::LedgerWriter;
pub use payables::{Payables, PayoutOutcome};
pub use reconciliation::{DriftEntry, DriftKind, DriftReport, ReconciliationEngine, Severity, Subject};
pub use returns::Returns;
pub use store::{MemoryStore, Store, Tables, UnitOfWork};

pub mod allocator;
pub mod correction;
pub mod distribution;
pub mod errors;
pub mod ledger;
pub mod payables;
pub mod reconciliation;
pub mod returns;
pub mod store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Drift smaller than this is reported as needing a rescan rather than
    /// as confirmed, and is not corrected.
    pub rescan_threshold: Money,
}

/// Owns the store and hands out the components that operate on it.
pub struct Engine<S = MemoryStore> {
    store: S,
    config: EngineConfig,
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::new(MemoryStore::new(), EngineConfig::default())
    }
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }
    pub fn store(&self) -> &S {
        &self.store
    }
    pub fn into_store(self) -> S {
        self.store
    }
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn allocator(&self) -> PaymentAllocator<'_, S> {
        PaymentAllocator::new(&self.store)
    }
    pub fn ledger(&self) -> LedgerWriter<'_, S> {
        LedgerWriter::new(&self.store)
    }
    pub fn payables(&self) -> Payables<'_, S> {
        Payables::new(&self.store)
    }
    pub fn returns(&self) -> Returns<'_, S> {
        Returns::new(&self.store)
    }
    pub fn reconciliation(&self) -> ReconciliationEngine<'_, S> {
        ReconciliationEngine::new(&self.store, self.config)
    }
    pub fn correction(&self) -> CorrectionEngine<'_, S> {
        CorrectionEngine::new(&self.store, self.config)
    }

    pub fn scan(&self) -> DriftReport {
        self.reconciliation().scan()
    }

    /// Scans, corrects what was found, and returns the summary.
    pub fn correct(&self) -> CorrectionSummary {
        let report = self.scan();
        self.correction().apply(&report)
    }

    pub fn process_event(&self, event: Event) -> Result<(), LedgerError> {
        match event {
            Event::Sale(sale) => {
                self.allocator().register_sale(&sale)?;
            }
            Event::Payment(payment) => {
                let outcome = self.allocator().apply_payment(payment.sale, payment.amount)?;
                if outcome.change.is_positive() {
                    warn!(
                        sale = %payment.sale,
                        change = %outcome.change,
                        "payment exceeded the remaining balance"
                    );
                }
            }
            Event::Credit(credit) => {
                self.ledger()
                    .credit(credit.bank, credit.amount, &credit.concept, Default::default())?;
            }
            Event::Debit(debit) => {
                self.ledger()
                    .debit(debit.bank, debit.amount, &debit.concept, Default::default())?;
            }
            Event::Transfer(transfer) => {
                self.ledger()
                    .transfer(transfer.from, transfer.to, transfer.amount, &transfer.concept)?;
            }
            Event::Distributor(distributor) => {
                self.payables()
                    .register_distributor(distributor.id, &distributor.name)?;
            }
            Event::PurchaseOrder(order) => {
                self.payables().register_purchase_order(&order)?;
            }
            Event::PurchaseOrderPayment(payment) => {
                self.payables().pay_purchase_order(
                    payment.purchase_order,
                    payment.bank,
                    payment.amount,
                )?;
            }
            Event::Return(request) => {
                self.returns().register_return(request.sale, request.quantity)?;
            }
        }
        Ok(())
    }

    /// Processes events in order. Rejected events are logged and skipped;
    /// returns how many were rejected.
    pub fn process_events(&self, events: impl Iterator<Item = Event>) -> usize {
        let mut rejected = 0;
        for event in events {
            if let Err(e) = self.process_event(event) {
                warn!("Error processing event: {e}");
                rejected += 1;
            }
        }
        info!(rejected, "processed events");
        rejected
    }
}
