mod common;

use common::{engine_over, money, run, sale, tables};
use vault_ledger::{
    domain::{
        BankId, Distribution, Leg, ManualCredit, Movement, MovementId, Payment, PaymentState,
        SaleId,
    },
    engine::{DriftKind, Engine, EngineConfig, MemoryStore, Severity, Subject, Tables},
};

fn paid_sale_tables() -> Tables {
    let engine = run(vec![
        sale(1, 1, 80000, 50000, 2000).into(),
        Payment {
            sale: SaleId::from(1),
            amount: money(30000),
        }
        .into(),
        ManualCredit {
            bank: BankId::Azteca,
            amount: money(700),
            concept: "deposit".into(),
        }
        .into(),
    ]);
    tables(&engine)
}

fn complete_sale_tables() -> Tables {
    let mut input = sale(1, 1, 80000, 50000, 2000);
    input.initial_payment = Some(money(80000));
    tables(&run(vec![input.into()]))
}

/// Appends a second copy of every movement the sale posted, keeping the banks
/// in step with the log.
fn post_sale_twice(state: &mut Tables) {
    let copies: Vec<Movement> = state
        .movements
        .iter()
        .filter(|m| m.links.sale == Some(SaleId::from(1)))
        .cloned()
        .collect();
    for mut copy in copies {
        copy.id = MovementId::from(state.movements.len() as u64 + 1);
        state
            .banks
            .get_mut(&copy.bank)
            .unwrap()
            .receive(copy.amount)
            .unwrap();
        state.movements.push(copy);
    }
}

fn kinds(state: Tables) -> Vec<DriftKind> {
    engine_over(state)
        .scan()
        .entries
        .iter()
        .map(|e| e.kind)
        .collect()
}

#[test]
fn consistent_store_scans_clean() {
    let engine = engine_over(paid_sale_tables());
    let report = engine.scan();

    assert!(report.is_clean());
    assert_eq!(report.sales_scanned, 1);
    assert_eq!(report.movements_scanned, 4);
}

#[test]
fn capital_drift_is_reported_on_the_bank() {
    let mut state = paid_sale_tables();
    state
        .banks
        .get_mut(&BankId::Azteca)
        .unwrap()
        .current_capital = money(650);
    let report = engine_over(state).scan();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.subject, Subject::Bank(BankId::Azteca));
    assert_eq!(entry.kind, DriftKind::Capital);
    assert_eq!(entry.stored, money(650));
    assert_eq!(entry.recomputed, money(700));
    assert_eq!(entry.gap(), money(50));
    assert_eq!(entry.severity, Severity::Confirmed);
}

#[test]
fn missing_movement_shows_as_historical_drift() {
    let mut state = paid_sale_tables();
    state.movements.retain(|m| m.bank != BankId::Azteca);
    let report = engine_over(state).scan();

    let kinds: Vec<DriftKind> = report.entries.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![DriftKind::HistoricalInflows]);
    assert_eq!(report.entries[0].recomputed, money(0));
}

#[test]
fn sale_without_distribution_is_reported_per_leg() {
    let mut state = paid_sale_tables();
    state.sales.get_mut(&SaleId::from(1)).unwrap().full = Distribution::default();
    let report = engine_over(state).scan();

    let kinds: Vec<DriftKind> = report.entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DriftKind::FullDistribution(Leg::CostRecovery),
            DriftKind::FullDistribution(Leg::Freight),
            DriftKind::FullDistribution(Leg::Profit),
        ]
    );
    assert!(
        report
            .entries
            .iter()
            .all(|e| e.subject == Subject::Sale(SaleId::from(1)))
    );
}

#[test]
fn installment_sum_differing_from_amount_paid_is_reported() {
    let mut state = paid_sale_tables();
    state.installments.clear();
    let report = engine_over(state).scan();

    let installment = report
        .entries
        .iter()
        .find(|e| e.kind == DriftKind::InstallmentTotal)
        .unwrap();
    assert_eq!(installment.stored, money(30000));
    assert_eq!(installment.recomputed, money(0));
    assert!(
        report
            .entries
            .iter()
            .any(|e| e.kind == DriftKind::CreditedDistribution(Leg::CostRecovery))
    );
}

#[test]
fn stale_remaining_amount_is_reported() {
    let mut state = paid_sale_tables();
    state
        .sales
        .get_mut(&SaleId::from(1))
        .unwrap()
        .amount_remaining = money(80000);
    let report = engine_over(state).scan();

    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].kind, DriftKind::AmountRemaining);
    assert_eq!(report.entries[0].recomputed, money(50000));
}

#[test]
fn small_drift_needs_a_rescan() {
    let mut state = paid_sale_tables();
    state
        .banks
        .get_mut(&BankId::Azteca)
        .unwrap()
        .current_capital = money(699);
    let engine = Engine::new(
        MemoryStore::from(state),
        EngineConfig {
            rescan_threshold: money(5),
        },
    );
    let report = engine.scan();

    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].severity, Severity::Rescan);
    assert_eq!(report.confirmed().count(), 0);
}

#[test]
fn scan_never_writes() {
    let mut state = paid_sale_tables();
    state
        .banks
        .get_mut(&BankId::FleteSur)
        .unwrap()
        .historical_inflows = money(1);
    let engine = engine_over(state.clone());
    let first = engine.scan();
    let second = engine.scan();

    assert_eq!(first, second);
    assert_eq!(tables(&engine), state);
}

#[test]
fn total_price_that_disagrees_with_unit_price_is_reported() {
    let mut state = paid_sale_tables();
    state.sales.get_mut(&SaleId::from(1)).unwrap().total_price = money(90000);
    let report = engine_over(state).scan();

    let total = report
        .entries
        .iter()
        .find(|e| e.kind == DriftKind::TotalPrice)
        .unwrap();
    assert_eq!(total.stored, money(90000));
    assert_eq!(total.recomputed, money(80000));
    assert_eq!(total.severity, Severity::Confirmed);
}

#[test]
fn complete_sale_whose_legs_miss_the_total_is_reported() {
    let mut state = complete_sale_tables();
    state.sales.get_mut(&SaleId::from(1)).unwrap().full.profit = money(28001);
    let report = engine_over(state).scan();

    let kinds: Vec<DriftKind> = report.entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DriftKind::FullDistribution(Leg::Profit),
            DriftKind::DistributionTotal,
        ]
    );
    assert_eq!(report.entries[1].stored, money(80001));
    assert_eq!(report.entries[1].recomputed, money(80000));
}

#[test]
fn distribution_total_follows_amounts_not_the_stored_state() {
    let mut state = complete_sale_tables();
    let stored = state.sales.get_mut(&SaleId::from(1)).unwrap();
    stored.full.profit = money(28001);
    stored.payment_state = PaymentState::Partial;

    let kinds = kinds(state);
    assert!(kinds.contains(&DriftKind::DistributionTotal));
    assert!(kinds.contains(&DriftKind::PaymentState {
        stored: PaymentState::Partial,
        expected: PaymentState::Complete,
    }));
}

#[test]
fn payment_state_that_disagrees_with_amounts_is_reported() {
    let mut state = complete_sale_tables();
    state.sales.get_mut(&SaleId::from(1)).unwrap().payment_state = PaymentState::Pending;
    let report = engine_over(state).scan();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(
        entry.kind,
        DriftKind::PaymentState {
            stored: PaymentState::Pending,
            expected: PaymentState::Complete,
        }
    );
    assert_eq!(entry.kind.to_string(), "payment_state:pending->complete");
    assert_eq!(entry.severity, Severity::Confirmed);
}

#[test]
fn invalid_stored_inputs_are_reported_not_skipped() {
    let mut state = paid_sale_tables();
    state.sales.get_mut(&SaleId::from(1)).unwrap().quantity = 0;
    let report = engine_over(state).scan();

    let kinds: Vec<DriftKind> = report.entries.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![DriftKind::InvalidInputs]);
    assert_eq!(report.entries[0].severity, Severity::Confirmed);
}

#[test]
fn sale_posted_twice_is_reported_per_leg() {
    let mut state = paid_sale_tables();
    post_sale_twice(&mut state);
    let report = engine_over(state).scan();

    let kinds: Vec<DriftKind> = report.entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DriftKind::PostedDistribution(Leg::CostRecovery),
            DriftKind::PostedDistribution(Leg::Freight),
            DriftKind::PostedDistribution(Leg::Profit),
        ]
    );
    assert_eq!(report.entries[0].stored, money(18750));
    assert_eq!(report.entries[0].recomputed, money(37500));
}
