//! Read-only drift detection.
//!
//! The movement log and the installment records are ground truth. Every cached
//! aggregate (bank capital and historical totals, sale payment and
//! distribution fields, distributor debt) is recomputed from them and compared
//! with what is stored. The two sources are also checked against each other:
//! the legs a sale's installments credited, net of returns, must match what
//! the log posted to the leg vaults for that sale.

use std::{collections::BTreeMap, fmt};

use tracing::{debug, info, warn};

use crate::{
    domain::{BankId, Direction, Distribution, DistributorId, Leg, Money, PaymentState, SaleId},
    engine::{
        EngineConfig,
        distribution::compute_full_distribution,
        store::{Store, Tables},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subject {
    Bank(BankId),
    Sale(SaleId),
    Distributor(DistributorId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Bank(id) => write!(f, "bank {id}"),
            Subject::Sale(id) => write!(f, "sale {id}"),
            Subject::Distributor(id) => write!(f, "distributor {id}"),
        }
    }
}

/// Which invariant a drift entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriftKind {
    /// `current_capital` vs `historical_inflows - historical_outflows`.
    Capital,
    /// `historical_inflows` vs the sum of inflow movements.
    HistoricalInflows,
    HistoricalOutflows,
    /// Stored quantity or unit prices no sale could have been registered with.
    InvalidInputs,
    /// Stored total vs unit sale price times quantity.
    TotalPrice,
    /// Stored full-value leg vs the calculator's output.
    FullDistribution(Leg),
    /// Sum of the full legs vs total price, on sales whose amounts say complete.
    DistributionTotal,
    /// Stored state vs the state `amount_paid` and `total_price` imply. The
    /// entry's amounts are both `amount_paid`.
    PaymentState {
        stored: PaymentState,
        expected: PaymentState,
    },
    /// Sum of installment amounts vs `amount_paid`.
    InstallmentTotal,
    /// Stored credited leg vs the sum of that leg over the installments.
    CreditedDistribution(Leg),
    AmountRemaining,
    /// Installment legs net of returns vs the net the log posted to the leg's vault.
    PostedDistribution(Leg),
    /// Stored debt vs the remaining balances of the distributor's purchase orders.
    DistributorDebt,
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftKind::Capital => f.write_str("capital"),
            DriftKind::HistoricalInflows => f.write_str("historical_inflows"),
            DriftKind::HistoricalOutflows => f.write_str("historical_outflows"),
            DriftKind::InvalidInputs => f.write_str("invalid_inputs"),
            DriftKind::TotalPrice => f.write_str("total_price"),
            DriftKind::FullDistribution(leg) => write!(f, "full_{}", leg_name(*leg)),
            DriftKind::DistributionTotal => f.write_str("distribution_total"),
            DriftKind::PaymentState { stored, expected } => write!(
                f,
                "payment_state:{}->{}",
                state_name(*stored),
                state_name(*expected)
            ),
            DriftKind::InstallmentTotal => f.write_str("installment_total"),
            DriftKind::CreditedDistribution(leg) => write!(f, "credited_{}", leg_name(*leg)),
            DriftKind::AmountRemaining => f.write_str("amount_remaining"),
            DriftKind::PostedDistribution(leg) => write!(f, "posted_{}", leg_name(*leg)),
            DriftKind::DistributorDebt => f.write_str("distributor_debt"),
        }
    }
}

fn state_name(state: PaymentState) -> &'static str {
    match state {
        PaymentState::Pending => "pending",
        PaymentState::Partial => "partial",
        PaymentState::Complete => "complete",
    }
}

fn leg_name(leg: Leg) -> &'static str {
    match leg {
        Leg::CostRecovery => "cost_recovery",
        Leg::Freight => "freight",
        Leg::Profit => "profit",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Smaller than a normal in-flight write; may be snapshot skew.
    Rescan,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEntry {
    pub subject: Subject,
    pub kind: DriftKind,
    pub stored: Money,
    pub recomputed: Money,
    pub severity: Severity,
}

impl DriftEntry {
    /// `recomputed - stored`.
    pub fn gap(&self) -> Money {
        self.recomputed - self.stored
    }
}

/// Adjustment movements already in the log, kept apart from organic flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentTotals {
    pub bank: BankId,
    pub credited: Money,
    pub debited: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
    pub adjustments: Vec<AdjustmentTotals>,
    pub sales_scanned: usize,
    pub movements_scanned: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &DriftEntry> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Confirmed)
    }

    /// Entries grouped by subject, in subject order.
    pub fn by_subject(&self) -> BTreeMap<Subject, Vec<DriftEntry>> {
        let mut grouped: BTreeMap<Subject, Vec<DriftEntry>> = BTreeMap::new();
        for entry in &self.entries {
            grouped.entry(entry.subject).or_default().push(entry.clone());
        }
        grouped
    }
}

struct Checker {
    subject: Subject,
    threshold: Money,
    entries: Vec<DriftEntry>,
}

impl Checker {
    fn new(subject: Subject, threshold: Money) -> Self {
        Self {
            subject,
            threshold,
            entries: Vec::new(),
        }
    }

    fn compare(&mut self, kind: DriftKind, stored: Money, recomputed: Money) {
        if stored == recomputed {
            return;
        }
        let severity = match recomputed.checked_sub(stored) {
            Some(gap)
                if gap
                    .minor()
                    .checked_abs()
                    .is_some_and(|gap| gap < self.threshold.minor()) =>
            {
                Severity::Rescan
            }
            _ => Severity::Confirmed,
        };
        self.push(kind, stored, recomputed, severity);
    }

    /// Records an entry that no amount of snapshot skew explains.
    fn flag(&mut self, kind: DriftKind, stored: Money, recomputed: Money) {
        self.push(kind, stored, recomputed, Severity::Confirmed);
    }

    fn push(&mut self, kind: DriftKind, stored: Money, recomputed: Money, severity: Severity) {
        self.entries.push(DriftEntry {
            subject: self.subject,
            kind,
            stored,
            recomputed,
            severity,
        });
    }

    fn compare_legs(
        &mut self,
        kind: fn(Leg) -> DriftKind,
        stored: &Distribution,
        recomputed: &Distribution,
    ) {
        for leg in Leg::ALL {
            self.compare(kind(leg), stored.leg(leg), recomputed.leg(leg));
        }
    }
}

/// Sums of the inflow and outflow movements recorded for `bank`.
pub fn movement_totals(tables: &Tables, bank: BankId) -> (Money, Money) {
    tables
        .movements_for(bank)
        .fold((Money::ZERO, Money::ZERO), |(inflows, outflows), m| {
            match m.direction() {
                Direction::Inflow => (inflows + m.amount, outflows),
                Direction::Outflow => (inflows, outflows + m.amount),
            }
        })
}

pub fn bank_drift(tables: &Tables, id: BankId, threshold: Money) -> Vec<DriftEntry> {
    let mut checker = Checker::new(Subject::Bank(id), threshold);
    let Some(bank) = tables.banks.get(&id) else {
        return checker.entries;
    };
    let (inflows, outflows) = movement_totals(tables, id);
    checker.compare(
        DriftKind::Capital,
        bank.current_capital,
        bank.expected_capital(),
    );
    checker.compare(DriftKind::HistoricalInflows, bank.historical_inflows, inflows);
    checker.compare(DriftKind::HistoricalOutflows, bank.historical_outflows, outflows);
    checker.entries
}

pub fn sale_drift(tables: &Tables, id: SaleId, threshold: Money) -> Vec<DriftEntry> {
    let mut checker = Checker::new(Subject::Sale(id), threshold);
    let Some(sale) = tables.sales.get(&id) else {
        return checker.entries;
    };

    match compute_full_distribution(
        sale.quantity,
        sale.unit_sale_price,
        sale.unit_cost_price,
        sale.unit_freight,
    ) {
        Ok(full) => {
            checker.compare(DriftKind::TotalPrice, sale.total_price, full.total);
            checker.compare_legs(DriftKind::FullDistribution, &sale.full, &full.distribution);
        }
        Err(error) => {
            debug!(sale = %id, %error, "stored sale inputs are invalid");
            checker.flag(DriftKind::InvalidInputs, sale.total_price, Money::ZERO);
        }
    }

    let expected_state = PaymentState::for_amounts(sale.amount_paid, sale.total_price);
    if expected_state == PaymentState::Complete {
        match sale.full.checked_total() {
            Some(total) => checker.compare(DriftKind::DistributionTotal, total, sale.total_price),
            None => checker.flag(DriftKind::DistributionTotal, Money::ZERO, sale.total_price),
        }
    }
    if sale.payment_state != expected_state {
        checker.flag(
            DriftKind::PaymentState {
                stored: sale.payment_state,
                expected: expected_state,
            },
            sale.amount_paid,
            sale.amount_paid,
        );
    }

    let (paid, legs) = tables.installments_for(id).fold(
        (Money::ZERO, Distribution::default()),
        |(paid, legs), i| (paid + i.amount, legs + i.legs),
    );
    checker.compare(DriftKind::InstallmentTotal, sale.amount_paid, paid);
    checker.compare_legs(DriftKind::CreditedDistribution, &sale.credited, &legs);
    match sale.total_price.checked_sub(sale.amount_paid) {
        Some(remaining) => {
            checker.compare(DriftKind::AmountRemaining, sale.amount_remaining, remaining)
        }
        None => checker.flag(DriftKind::AmountRemaining, sale.amount_remaining, Money::ZERO),
    }
    checker.compare_legs(
        DriftKind::PostedDistribution,
        &(legs - tables.reversed_for(id)),
        &tables.posted_for(id),
    );
    checker.entries
}

pub fn distributor_drift(tables: &Tables, id: DistributorId, threshold: Money) -> Vec<DriftEntry> {
    let mut checker = Checker::new(Subject::Distributor(id), threshold);
    let Some(distributor) = tables.distributors.get(&id) else {
        return checker.entries;
    };
    let outstanding: Money = tables
        .purchase_orders
        .values()
        .filter(|o| o.distributor == id)
        .map(|o| o.amount_remaining)
        .sum();
    checker.compare(
        DriftKind::DistributorDebt,
        distributor.outstanding_debt,
        outstanding,
    );
    checker.entries
}

pub fn subject_drift(tables: &Tables, subject: Subject, threshold: Money) -> Vec<DriftEntry> {
    match subject {
        Subject::Bank(id) => bank_drift(tables, id, threshold),
        Subject::Sale(id) => sale_drift(tables, id, threshold),
        Subject::Distributor(id) => distributor_drift(tables, id, threshold),
    }
}

/// Full scan of a detached copy of the store.
pub fn scan_tables(tables: &Tables, threshold: Money) -> DriftReport {
    let mut entries = Vec::new();
    for id in tables.banks.keys() {
        entries.extend(bank_drift(tables, *id, threshold));
    }
    for id in tables.sales.keys() {
        entries.extend(sale_drift(tables, *id, threshold));
    }
    for id in tables.distributors.keys() {
        entries.extend(distributor_drift(tables, *id, threshold));
    }

    let mut adjustments: BTreeMap<BankId, AdjustmentTotals> = BTreeMap::new();
    for movement in tables.movements.iter().filter(|m| m.kind.is_adjustment()) {
        let totals = adjustments
            .entry(movement.bank)
            .or_insert(AdjustmentTotals {
                bank: movement.bank,
                credited: Money::ZERO,
                debited: Money::ZERO,
            });
        match movement.direction() {
            Direction::Inflow => totals.credited += movement.amount,
            Direction::Outflow => totals.debited += movement.amount,
        }
    }

    DriftReport {
        entries,
        adjustments: adjustments.into_values().collect(),
        sales_scanned: tables.sales.len(),
        movements_scanned: tables.movements.len(),
    }
}

pub struct ReconciliationEngine<'s, S> {
    store: &'s S,
    config: EngineConfig,
}

impl<'s, S: Store> ReconciliationEngine<'s, S> {
    pub fn new(store: &'s S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Never writes. Deterministic for the same store contents.
    pub fn scan(&self) -> DriftReport {
        let tables = self.store.snapshot();
        let report = scan_tables(&tables, self.config.rescan_threshold);
        for entry in &report.entries {
            warn!(
                subject = %entry.subject,
                kind = %entry.kind,
                stored = %entry.stored,
                recomputed = %entry.recomputed,
                severity = ?entry.severity,
                "drift detected"
            );
        }
        info!(
            drift = report.entries.len(),
            sales = report.sales_scanned,
            movements = report.movements_scanned,
            "reconciliation scan finished"
        );
        report
    }
}
