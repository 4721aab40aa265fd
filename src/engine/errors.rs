use crate::domain::{
    BankId, Distribution, DistributorId, DomainError, InstallmentId, Money, PurchaseOrderId,
    SaleId,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),
    #[error("Unknown bank: {0:?}")]
    UnknownBank(BankId),
    #[error("Unknown sale: {0}")]
    UnknownSale(SaleId),
    #[error("Unknown installment: {0}")]
    UnknownInstallment(InstallmentId),
    #[error("Installment {0} is already posted to the vaults")]
    InstallmentAlreadyPosted(InstallmentId),
    #[error("Sale {0} has returned units and takes no further payments")]
    SaleHasReturns(SaleId),
    #[error("Unknown purchase order: {0}")]
    UnknownPurchaseOrder(PurchaseOrderId),
    #[error("Unknown distributor: {0}")]
    UnknownDistributor(DistributorId),
    #[error("Sale {0} already exists")]
    DuplicateSale(SaleId),
    #[error("Purchase order {0} already exists")]
    DuplicatePurchaseOrder(PurchaseOrderId),
    #[error("Sale {0} is already fully paid")]
    SaleSettled(SaleId),
    #[error("Payment of {amount} exceeds the remaining {remaining}")]
    Overpayment { amount: Money, remaining: Money },
    #[error("Insufficient funds in {bank}: available {available}, requested {requested}")]
    InsufficientFunds {
        bank: BankId,
        available: Money,
        requested: Money,
    },
    #[error("Transfer source and destination are the same bank")]
    SameBank,
    #[error("Return of {requested} units exceeds the {available} unreturned units")]
    ReturnExceedsQuantity { requested: u32, available: u32 },
    /// The calculator produced legs that don't add up to the sale total. Always a bug.
    #[error("Distribution {distribution:?} does not sum to {total}")]
    DistributionImbalance {
        distribution: Distribution,
        total: Money,
    },
    #[error("{0} drift entries detected")]
    DriftDetected(usize),
    #[error("Uncorrectable drift on {subject}: {reason}")]
    UncorrectableDrift { subject: String, reason: String },
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}
