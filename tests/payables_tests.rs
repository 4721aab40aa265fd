mod common;

use common::{empty_engine, capital, money, tables};
use vault_ledger::{
    domain::{
        BankId, DistributorId, DomainError, Links, Money, MovementKind, NewPurchaseOrder,
        PaymentState, PurchaseOrderId,
    },
    engine::{Engine, LedgerError},
};

fn order(id: u64, initial_payment: Option<(BankId, i64)>) -> NewPurchaseOrder {
    NewPurchaseOrder {
        id: PurchaseOrderId::from(id),
        distributor: DistributorId::from(1),
        quantity: 10,
        unit_cost: money(40),
        unit_freight: money(5),
        initial_payment: initial_payment.map(|(bank, amount)| (bank, money(amount))),
    }
}

fn funded_engine() -> Engine {
    let engine = empty_engine();
    engine
        .payables()
        .register_distributor(DistributorId::from(1), "Acme")
        .unwrap();
    engine
        .ledger()
        .credit(BankId::Azteca, money(1000), "seed", Links::default())
        .unwrap();
    engine
}

#[test]
fn purchase_order_raises_distributor_debt() {
    let engine = funded_engine();
    let registered = engine.payables().register_purchase_order(&order(1, None)).unwrap();

    assert_eq!(registered.total, money(450));
    assert_eq!(registered.payment_state, PaymentState::Pending);
    let distributor = &tables(&engine).distributors[&DistributorId::from(1)];
    assert_eq!(distributor.outstanding_debt, money(450));
}

#[test]
fn payout_debits_bank_and_lowers_debt() {
    let engine = funded_engine();
    engine.payables().register_purchase_order(&order(1, None)).unwrap();
    let outcome = engine
        .payables()
        .pay_purchase_order(PurchaseOrderId::from(1), BankId::Azteca, money(200))
        .unwrap();

    assert_eq!(outcome.movement.kind, MovementKind::Payout);
    assert_eq!(outcome.movement.links.purchase_order, Some(PurchaseOrderId::from(1)));
    assert_eq!(outcome.movement.links.distributor, Some(DistributorId::from(1)));
    assert_eq!(outcome.purchase_order.payment_state, PaymentState::Partial);
    assert_eq!(outcome.purchase_order.amount_remaining, money(250));
    assert_eq!(capital(&engine, BankId::Azteca), money(800));

    let distributor = &tables(&engine).distributors[&DistributorId::from(1)];
    assert_eq!(distributor.outstanding_debt, money(250));
    assert_eq!(distributor.total_paid, money(200));
    assert_eq!(distributor.payment_count, 1);
}

#[test]
fn final_payout_completes_the_order() {
    let engine = funded_engine();
    engine.payables().register_purchase_order(&order(1, None)).unwrap();
    let payables = engine.payables();
    payables
        .pay_purchase_order(PurchaseOrderId::from(1), BankId::Azteca, money(200))
        .unwrap();
    let outcome = payables
        .pay_purchase_order(PurchaseOrderId::from(1), BankId::Azteca, money(250))
        .unwrap();

    assert_eq!(outcome.purchase_order.payment_state, PaymentState::Complete);
    assert_eq!(outcome.purchase_order.payment_count, 2);
    assert!(engine.scan().is_clean());
}

#[test]
fn payout_larger_than_remainder_is_rejected() {
    let engine = funded_engine();
    engine.payables().register_purchase_order(&order(1, None)).unwrap();

    assert_eq!(
        engine
            .payables()
            .pay_purchase_order(PurchaseOrderId::from(1), BankId::Azteca, money(451))
            .map(|o| o.movement.id),
        Err(LedgerError::Overpayment {
            amount: money(451),
            remaining: money(450),
        })
    );
}

#[test]
fn payout_without_funds_is_rejected_atomically() {
    let engine = funded_engine();
    engine.payables().register_purchase_order(&order(1, None)).unwrap();
    let before = tables(&engine);

    assert!(matches!(
        engine
            .payables()
            .pay_purchase_order(PurchaseOrderId::from(1), BankId::Leftie, money(100)),
        Err(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(tables(&engine), before);
}

#[test]
fn initial_payment_is_taken_on_registration() {
    let engine = funded_engine();
    let registered = engine
        .payables()
        .register_purchase_order(&order(1, Some((BankId::Azteca, 100))))
        .unwrap();

    assert_eq!(registered.amount_paid, money(100));
    assert_eq!(registered.payment_state, PaymentState::Partial);
    assert_eq!(
        tables(&engine).distributors[&DistributorId::from(1)].outstanding_debt,
        money(350)
    );
}

#[test]
fn order_for_unknown_distributor_is_rejected() {
    let engine = empty_engine();
    assert_eq!(
        engine
            .payables()
            .register_purchase_order(&order(1, None))
            .map(|o| o.id),
        Err(LedgerError::UnknownDistributor(DistributorId::from(1)))
    );
}

#[test]
fn duplicate_order_is_rejected() {
    let engine = funded_engine();
    engine.payables().register_purchase_order(&order(1, None)).unwrap();

    assert_eq!(
        engine
            .payables()
            .register_purchase_order(&order(1, None))
            .map(|o| o.id),
        Err(LedgerError::DuplicatePurchaseOrder(PurchaseOrderId::from(1)))
    );
    assert_eq!(
        tables(&engine).distributors[&DistributorId::from(1)].outstanding_debt,
        money(450)
    );
}

#[test]
fn re_registering_a_distributor_keeps_its_balances() {
    let engine = funded_engine();
    engine.payables().register_purchase_order(&order(1, None)).unwrap();
    let renamed = engine
        .payables()
        .register_distributor(DistributorId::from(1), "Acme Imports")
        .unwrap();

    assert_eq!(renamed.name, "Acme Imports");
    assert_eq!(renamed.outstanding_debt, money(450));
}

#[test]
fn order_total_that_overflows_is_rejected() {
    let engine = funded_engine();
    let input = NewPurchaseOrder {
        unit_cost: Money::from_minor(i64::MAX),
        unit_freight: money(1),
        quantity: 1,
        ..order(1, None)
    };

    assert_eq!(
        engine.payables().register_purchase_order(&input).map(|o| o.id),
        Err(LedgerError::DomainError(DomainError::Overflow))
    );
    assert!(tables(&engine).purchase_orders.is_empty());
    assert_eq!(
        tables(&engine).distributors[&DistributorId::from(1)].outstanding_debt,
        money(0)
    );
}
