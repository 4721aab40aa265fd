//! Core domain types: money, vaults, sales, installments, movements and payables.

use std::fmt;

use chrono::{DateTime, Utc};
use derive_more::{Add, AddAssign, From, Into, Neg, Sub, SubAssign, Sum, TryInto};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for sale identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct SaleId(u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct ClientId(u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct DistributorId(u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct PurchaseOrderId(u64);

/// Assigned by the store, strictly increasing in append order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct MovementId(u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct InstallmentId(u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct ReturnId(u64);

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstallmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DistributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error("Amount {0} has more than two decimal places")]
    TooPrecise(Decimal),
    #[error("Amount {0} is out of range")]
    OutOfRange(Decimal),
    #[error("Invalid sale: {0}")]
    InvalidSale(&'static str),
    #[error("Amount overflow")]
    Overflow,
}

/// A monetary amount in minor currency units (cents).
///
/// All ledger arithmetic happens on the integer representation; `Decimal` is only
/// used when parsing input and formatting output.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Add,
    Sub,
    AddAssign,
    SubAssign,
    Neg,
    Sum,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }
    /// Whole currency units, e.g. `from_major(12)` is 12.00.
    pub const fn from_major(major: i64) -> Self {
        Self(major * 100)
    }
    pub const fn minor(self) -> i64 {
        self.0
    }
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Self)
    }
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Self)
    }
    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }
    /// `floor(self * numerator / denominator)`, computed in 128 bits.
    ///
    /// Returns zero when the denominator is not positive and `None` when the
    /// result does not fit.
    pub fn scale_floor(self, numerator: i64, denominator: i64) -> Option<Money> {
        if denominator <= 0 {
            return Some(Money::ZERO);
        }
        let product = i128::from(self.0) * i128::from(numerator);
        let scaled = product.div_euclid(i128::from(denominator));
        i64::try_from(scaled).ok().map(Money)
    }
    /// `self / total` as a decimal, clamped to `[0, 1]`.
    pub fn proportion_of(self, total: Money) -> Decimal {
        if total.0 <= 0 {
            return Decimal::ZERO;
        }
        let ratio = Decimal::from(self.0)
            .checked_div(Decimal::from(total.0))
            .unwrap_or(Decimal::ZERO);
        ratio.clamp(Decimal::ZERO, Decimal::ONE)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        let scaled = value
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or(DomainError::OutOfRange(value))?;
        if !scaled.fract().is_zero() {
            return Err(DomainError::TooPrecise(value));
        }
        scaled
            .to_i64()
            .map(Money)
            .ok_or(DomainError::OutOfRange(value))
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        Decimal::new(value.0, 2)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Decimal::from(*self))
    }
}

/// The closed set of named vaults.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BankId {
    /// Receives the cost-recovery leg of every sale.
    BovedaMonte,
    BovedaUsa,
    Profit,
    Leftie,
    Azteca,
    /// Receives the freight leg of every sale.
    FleteSur,
    /// Receives the profit leg of every sale.
    Utilidades,
}

impl BankId {
    pub const ALL: [BankId; 7] = [
        BankId::BovedaMonte,
        BankId::BovedaUsa,
        BankId::Profit,
        BankId::Leftie,
        BankId::Azteca,
        BankId::FleteSur,
        BankId::Utilidades,
    ];

    /// The serialized form used in CSV files.
    pub fn key(self) -> &'static str {
        match self {
            BankId::BovedaMonte => "boveda_monte",
            BankId::BovedaUsa => "boveda_usa",
            BankId::Profit => "profit",
            BankId::Leftie => "leftie",
            BankId::Azteca => "azteca",
            BankId::FleteSur => "flete_sur",
            BankId::Utilidades => "utilidades",
        }
    }

    /// Only the profit vault absorbs the negative leg of a loss-making sale.
    pub fn may_overdraw(self) -> bool {
        self == Leg::Profit.bank()
    }

    pub fn label(self) -> &'static str {
        match self {
            BankId::BovedaMonte => "Bóveda Monte",
            BankId::BovedaUsa => "Bóveda USA",
            BankId::Profit => "Profit",
            BankId::Leftie => "Leftie",
            BankId::Azteca => "Azteca",
            BankId::FleteSur => "Flete Sur",
            BankId::Utilidades => "Utilidades",
        }
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A vault. Invariant: `current_capital = historical_inflows - historical_outflows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub id: BankId,
    pub label: String,
    pub current_capital: Money,
    pub historical_inflows: Money,
    pub historical_outflows: Money,
}

impl Bank {
    pub fn new(id: BankId) -> Self {
        Self {
            id,
            label: id.label().to_owned(),
            current_capital: Money::ZERO,
            historical_inflows: Money::ZERO,
            historical_outflows: Money::ZERO,
        }
    }
    pub fn expected_capital(&self) -> Money {
        self.historical_inflows - self.historical_outflows
    }
    pub fn is_balanced(&self) -> bool {
        self.current_capital == self.expected_capital()
    }
    /// Records an inflow on all three aggregates. Leaves the bank untouched on overflow.
    pub fn receive(&mut self, amount: Money) -> Result<(), DomainError> {
        let capital = self.current_capital.checked_add(amount);
        let inflows = self.historical_inflows.checked_add(amount);
        let (Some(capital), Some(inflows)) = (capital, inflows) else {
            return Err(DomainError::Overflow);
        };
        self.current_capital = capital;
        self.historical_inflows = inflows;
        Ok(())
    }
    /// Records an outflow on all three aggregates. Leaves the bank untouched on overflow.
    pub fn pay(&mut self, amount: Money) -> Result<(), DomainError> {
        let capital = self.current_capital.checked_sub(amount);
        let outflows = self.historical_outflows.checked_add(amount);
        let (Some(capital), Some(outflows)) = (capital, outflows) else {
            return Err(DomainError::Overflow);
        };
        self.current_capital = capital;
        self.historical_outflows = outflows;
        Ok(())
    }
}

/// One of the three legs of a sale's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    CostRecovery,
    Freight,
    Profit,
}

impl Leg {
    pub const ALL: [Leg; 3] = [Leg::CostRecovery, Leg::Freight, Leg::Profit];

    /// The vault each leg is credited to.
    pub fn bank(self) -> BankId {
        match self {
            Leg::CostRecovery => BankId::BovedaMonte,
            Leg::Freight => BankId::FleteSur,
            Leg::Profit => BankId::Utilidades,
        }
    }
}

/// Three-way split of a sale value. `profit` may be negative on a loss-making sale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Add, Sub, AddAssign, SubAssign, Sum)]
pub struct Distribution {
    pub cost_recovery: Money,
    pub freight: Money,
    pub profit: Money,
}

impl Distribution {
    pub fn new(cost_recovery: Money, freight: Money, profit: Money) -> Self {
        Self {
            cost_recovery,
            freight,
            profit,
        }
    }
    /// Sum of the three legs, `None` if it does not fit.
    pub fn checked_total(&self) -> Option<Money> {
        self.cost_recovery
            .checked_add(self.freight)?
            .checked_add(self.profit)
    }
    pub fn leg(&self, leg: Leg) -> Money {
        match leg {
            Leg::CostRecovery => self.cost_recovery,
            Leg::Freight => self.freight,
            Leg::Profit => self.profit,
        }
    }
    pub fn leg_mut(&mut self, leg: Leg) -> &mut Money {
        match leg {
            Leg::CostRecovery => &mut self.cost_recovery,
            Leg::Freight => &mut self.freight,
            Leg::Profit => &mut self.profit,
        }
    }
    pub fn legs(&self) -> impl Iterator<Item = (Leg, Money)> + '_ {
        Leg::ALL.into_iter().map(|leg| (leg, self.leg(leg)))
    }
    /// The share of this distribution that corresponds to `part` out of `whole`.
    ///
    /// Cost and freight are floored; profit takes whatever is left of
    /// `total * part / whole`, so the legs always sum to that figure exactly.
    /// `None` if any intermediate amount overflows.
    pub fn share(&self, part: i64, whole: i64) -> Option<Distribution> {
        let cost_recovery = self.cost_recovery.scale_floor(part, whole)?;
        let freight = self.freight.scale_floor(part, whole)?;
        let total = self.checked_total()?.scale_floor(part, whole)?;
        Some(Distribution {
            cost_recovery,
            freight,
            profit: total.checked_sub(cost_recovery)?.checked_sub(freight)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Partial,
    Complete,
}

impl PaymentState {
    pub fn for_amounts(paid: Money, total: Money) -> Self {
        if paid >= total {
            PaymentState::Complete
        } else if paid.is_positive() {
            PaymentState::Partial
        } else {
            PaymentState::Pending
        }
    }
}

/// Input for registering a sale.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSale {
    pub id: SaleId,
    pub client: Option<ClientId>,
    pub purchase_order: Option<PurchaseOrderId>,
    pub quantity: u32,
    pub unit_sale_price: Money,
    pub unit_cost_price: Money,
    pub unit_freight: Money,
    pub initial_payment: Option<Money>,
}

/// Input for registering a purchase order owed to a distributor.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchaseOrder {
    pub id: PurchaseOrderId,
    pub distributor: DistributorId,
    pub quantity: u32,
    pub unit_cost: Money,
    pub unit_freight: Money,
    /// Paid up front from the given bank.
    pub initial_payment: Option<(BankId, Money)>,
}

/// Sum type over every write the engine accepts from outside.
#[derive(Debug, Clone, From, TryInto, PartialEq)]
pub enum Event {
    Sale(NewSale),
    Payment(Payment),
    Credit(ManualCredit),
    Debit(ManualDebit),
    Transfer(Transfer),
    Distributor(NewDistributor),
    PurchaseOrder(NewPurchaseOrder),
    PurchaseOrderPayment(PurchaseOrderPayment),
    Return(ReturnRequest),
}

/// A client payment against an existing sale.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub sale: SaleId,
    pub amount: Money,
}

/// Operational income booked straight into a bank.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualCredit {
    pub bank: BankId,
    pub amount: Money,
    pub concept: String,
}

/// Operational expense paid from a bank.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualDebit {
    pub bank: BankId,
    pub amount: Money,
    pub concept: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub from: BankId,
    pub to: BankId,
    pub amount: Money,
    pub concept: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDistributor {
    pub id: DistributorId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrderPayment {
    pub purchase_order: PurchaseOrderId,
    pub bank: BankId,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnRequest {
    pub sale: SaleId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    pub id: SaleId,
    pub client: Option<ClientId>,
    pub purchase_order: Option<PurchaseOrderId>,
    pub quantity: u32,
    pub unit_sale_price: Money,
    pub unit_cost_price: Money,
    pub unit_freight: Money,
    pub total_price: Money,
    pub amount_paid: Money,
    pub amount_remaining: Money,
    pub payment_state: PaymentState,
    /// 100% of the sale, computed once at registration.
    pub full: Distribution,
    /// What has actually been credited to the vaults so far.
    pub credited: Distribution,
    pub installment_count: u32,
    pub first_installment_at: Option<DateTime<Utc>>,
    pub last_installment_at: Option<DateTime<Utc>>,
    pub returned_quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    pub fn proportion_paid(&self) -> Decimal {
        self.amount_paid.proportion_of(self.total_price)
    }
    /// Applies a new cumulative paid amount to the payment fields.
    pub(crate) fn set_paid(&mut self, amount_paid: Money) {
        self.amount_paid = amount_paid;
        self.amount_remaining = self.total_price - amount_paid;
        self.payment_state = PaymentState::for_amounts(amount_paid, self.total_price);
    }
}

/// A single partial payment against a sale. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Installment {
    pub id: InstallmentId,
    pub sale: SaleId,
    pub amount: Money,
    pub proportion: Decimal,
    pub legs: Distribution,
    pub cumulative_paid: Money,
    pub resulting_state: PaymentState,
    pub timestamp: DateTime<Utc>,
    /// Set when the installment was rebuilt by a correction run.
    pub synthetic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inflow,
    Outflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementKind {
    Credit,
    Debit,
    TransferIn,
    TransferOut,
    /// Leg credited by the payment taken when the sale was registered.
    DistributionCredit,
    InstallmentCredit,
    /// Negative profit leg of a loss-making sale.
    LossDebit,
    Payout,
    Reversal,
    ReversalCredit,
    AdjustmentCredit,
    AdjustmentDebit,
}

impl MovementKind {
    pub fn direction(self) -> Direction {
        match self {
            MovementKind::Credit
            | MovementKind::TransferIn
            | MovementKind::DistributionCredit
            | MovementKind::InstallmentCredit
            | MovementKind::ReversalCredit
            | MovementKind::AdjustmentCredit => Direction::Inflow,
            MovementKind::Debit
            | MovementKind::TransferOut
            | MovementKind::LossDebit
            | MovementKind::Payout
            | MovementKind::Reversal
            | MovementKind::AdjustmentDebit => Direction::Outflow,
        }
    }
    /// Kinds that move a sale's legs in or out of the three leg vaults.
    pub fn is_sale_leg(self) -> bool {
        matches!(
            self,
            MovementKind::DistributionCredit
                | MovementKind::InstallmentCredit
                | MovementKind::LossDebit
                | MovementKind::Reversal
                | MovementKind::ReversalCredit
        )
    }
    pub fn is_adjustment(self) -> bool {
        matches!(
            self,
            MovementKind::AdjustmentCredit | MovementKind::AdjustmentDebit
        )
    }
}

/// Optional references from a movement to the records that caused it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    pub reference: Option<String>,
    pub sale: Option<SaleId>,
    pub purchase_order: Option<PurchaseOrderId>,
    pub client: Option<ClientId>,
    pub distributor: Option<DistributorId>,
    /// The other vault of a transfer.
    pub counterparty: Option<BankId>,
}

impl Links {
    pub fn sale(sale: &Sale) -> Self {
        Self {
            sale: Some(sale.id),
            client: sale.client,
            purchase_order: sale.purchase_order,
            ..Self::default()
        }
    }
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// An append-only ledger entry. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub id: MovementId,
    pub bank: BankId,
    pub kind: MovementKind,
    pub amount: Money,
    pub timestamp: DateTime<Utc>,
    pub concept: String,
    pub links: Links,
}

impl Movement {
    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Distributor {
    pub id: DistributorId,
    pub name: String,
    /// Sum of the remaining balances of this distributor's purchase orders.
    pub outstanding_debt: Money,
    pub total_paid: Money,
    pub payment_count: u32,
}

impl Distributor {
    pub fn new(id: DistributorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            outstanding_debt: Money::ZERO,
            total_paid: Money::ZERO,
            payment_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub distributor: DistributorId,
    pub quantity: u32,
    pub unit_cost: Money,
    pub unit_freight: Money,
    pub total: Money,
    pub amount_paid: Money,
    pub amount_remaining: Money,
    pub payment_state: PaymentState,
    pub payment_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Goods handed back against a sale; reverses part of what was credited.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleReturn {
    pub id: ReturnId,
    pub sale: SaleId,
    pub quantity: u32,
    pub reversed: Distribution,
    pub timestamp: DateTime<Utc>,
}

impl SaleReturn {
    /// Amount owed back to the client.
    pub fn refund(&self) -> Option<Money> {
        self.reversed.checked_total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn money_parses_two_decimal_places() {
        assert_eq!(Money::try_from(dec!(12.34)), Ok(Money::from_minor(1234)));
        assert_eq!(Money::try_from(dec!(7)), Ok(Money::from_major(7)));
        assert_eq!(
            Money::try_from(dec!(0.001)),
            Err(DomainError::TooPrecise(dec!(0.001)))
        );
    }

    #[test]
    fn money_formats_as_decimal() {
        assert_eq!(Money::from_minor(120050).to_string(), "1200.50");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
    }

    #[test]
    fn scale_floor_rounds_towards_negative_infinity() {
        let m = Money::from_minor(100);
        assert_eq!(m.scale_floor(1, 3), Some(Money::from_minor(33)));
        let loss = Money::from_minor(-100);
        assert_eq!(loss.scale_floor(1, 3), Some(Money::from_minor(-34)));
    }

    #[test]
    fn scale_floor_reports_results_that_do_not_fit() {
        let big = Money::from_minor(i64::MAX);
        assert_eq!(big.scale_floor(2, 1), None);
        assert_eq!(big.scale_floor(1, 1), Some(big));
    }

    #[test]
    fn bank_overflow_leaves_aggregates_untouched() {
        let mut bank = Bank::new(BankId::Azteca);
        bank.receive(Money::from_minor(i64::MAX)).unwrap();
        let before = bank.clone();

        assert_eq!(bank.receive(Money::from_minor(1)), Err(DomainError::Overflow));
        assert_eq!(bank, before);
    }

    #[test]
    fn proportion_is_clamped() {
        let total = Money::from_major(100);
        assert_eq!(Money::from_major(50).proportion_of(total), dec!(0.5));
        assert_eq!(Money::from_major(150).proportion_of(total), Decimal::ONE);
        assert_eq!(Money::from_major(10).proportion_of(Money::ZERO), Decimal::ZERO);
    }

    #[test]
    fn share_sums_exactly() {
        let full = Distribution::new(
            Money::from_minor(333),
            Money::from_minor(333),
            Money::from_minor(334),
        );
        let part = full.share(1, 3).unwrap();
        assert_eq!(part.checked_total(), Some(Money::from_minor(333)));
    }

    #[test]
    fn share_of_unrepresentable_total_is_none() {
        let full = Distribution::new(Money::from_minor(i64::MAX), Money::from_minor(1), Money::ZERO);
        assert_eq!(full.checked_total(), None);
        assert_eq!(full.share(1, 2), None);
    }

    #[test]
    fn payment_state_follows_amounts() {
        let total = Money::from_major(10);
        assert_eq!(PaymentState::for_amounts(Money::ZERO, total), PaymentState::Pending);
        assert_eq!(PaymentState::for_amounts(Money::from_major(1), total), PaymentState::Partial);
        assert_eq!(PaymentState::for_amounts(total, total), PaymentState::Complete);
    }
}
