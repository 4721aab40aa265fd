mod common;

use common::money;
use vault_ledger::{
    domain::{Distribution, DomainError, Money},
    engine::{LedgerError, compute_full_distribution},
};

#[test]
fn fifteen_units_split_into_three_legs() {
    let full = compute_full_distribution(15, money(12000), money(7000), money(800)).unwrap();

    assert_eq!(
        full.distribution,
        Distribution::new(money(105000), money(12000), money(63000))
    );
    assert_eq!(full.total, money(180000));
    assert_eq!(full.distribution.checked_total(), Some(full.total));
}

#[test]
fn loss_making_sale_has_negative_profit() {
    let full = compute_full_distribution(2, money(100), money(90), money(20)).unwrap();

    assert_eq!(
        full.distribution,
        Distribution::new(money(180), money(40), money(-20))
    );
    assert_eq!(full.total, money(200));
}

#[test]
fn zero_freight_sends_everything_else_to_profit() {
    let full = compute_full_distribution(3, money(50), money(30), money(0)).unwrap();

    assert_eq!(full.distribution.freight, money(0));
    assert_eq!(full.distribution.profit, money(60));
}

#[test]
fn zero_quantity_is_rejected() {
    assert_eq!(
        compute_full_distribution(0, money(10), money(5), money(1)),
        Err(LedgerError::DomainError(DomainError::InvalidSale(
            "quantity must be positive"
        )))
    );
}

#[test]
fn negative_prices_are_rejected() {
    assert_eq!(
        compute_full_distribution(1, money(10), money(-5), money(1)),
        Err(LedgerError::InvalidAmount(money(-5)))
    );
}

#[test]
fn calculation_is_deterministic() {
    let a = compute_full_distribution(7, money(33), money(12), money(4)).unwrap();
    let b = compute_full_distribution(7, money(33), money(12), money(4)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn amounts_that_overflow_are_rejected() {
    let max = Money::from_minor(i64::MAX);
    let overflow = Err(LedgerError::DomainError(DomainError::Overflow));

    assert_eq!(compute_full_distribution(2, max, money(0), money(0)), overflow);
    assert_eq!(compute_full_distribution(1, money(0), max, max), overflow);
    assert_eq!(compute_full_distribution(1, max, max, max), overflow);
}
