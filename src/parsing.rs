//! CSV deserialization of the event stream.
//!
//! Parsing happens in two stages:
//! 1. Serde deserializes each CSV row into a flat `CsvEvent`.
//! 2. `TryFrom<CsvEvent>` converts it into the strongly-typed domain `Event`.
//!
//! Malformed rows or missing required fields are logged and skipped.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{
    BankId, ClientId, DistributorId, Event, ManualCredit, ManualDebit, Money, NewDistributor,
    NewPurchaseOrder, NewSale, Payment, PurchaseOrderId, PurchaseOrderPayment, ReturnRequest,
    SaleId, Transfer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EventType {
    Sale,
    Payment,
    Credit,
    Debit,
    Transfer,
    Distributor,
    PurchaseOrder,
    PurchaseOrderPayment,
    Return,
}

/// Flat representation of a single CSV row. Which columns are required
/// depends on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvEvent {
    r#type: EventType,
    sale: Option<SaleId>,
    client: Option<ClientId>,
    distributor: Option<DistributorId>,
    order: Option<PurchaseOrderId>,
    bank: Option<BankId>,
    to_bank: Option<BankId>,
    quantity: Option<u32>,
    unit_price: Option<Money>,
    unit_cost: Option<Money>,
    unit_freight: Option<Money>,
    amount: Option<Money>,
    concept: Option<String>,
}

/// Returns an iterator that lazily deserializes CSV rows into domain events,
/// skipping any rows that fail to parse or convert.
pub fn deserialize_csv<D: std::io::Read>(
    reader: &mut csv::Reader<D>,
) -> impl Iterator<Item = Event> {
    reader
        .deserialize::<CsvEvent>()
        .filter_map(|result| match result {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Failed to parse event: {e}");
                None
            }
        })
        .filter_map(|row| match Event::try_from(row) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Failed to convert CsvEvent to Event: {e}");
                None
            }
        })
}

#[derive(Debug, thiserror::Error)]
enum IntoEventError {
    #[error("Missing {field} for {kind:?} event")]
    Missing {
        field: &'static str,
        kind: EventType,
    },
}

fn required<T>(value: Option<T>, field: &'static str, kind: EventType) -> Result<T, IntoEventError> {
    value.ok_or(IntoEventError::Missing { field, kind })
}

impl TryFrom<CsvEvent> for Event {
    type Error = IntoEventError;

    fn try_from(row: CsvEvent) -> Result<Self, Self::Error> {
        let kind = row.r#type;
        let concept = row.concept.unwrap_or_default();
        let event = match kind {
            EventType::Sale => NewSale {
                id: required(row.sale, "sale", kind)?,
                client: row.client,
                purchase_order: row.order,
                quantity: required(row.quantity, "quantity", kind)?,
                unit_sale_price: required(row.unit_price, "unit_price", kind)?,
                unit_cost_price: required(row.unit_cost, "unit_cost", kind)?,
                unit_freight: row.unit_freight.unwrap_or(Money::ZERO),
                initial_payment: row.amount,
            }
            .into(),
            EventType::Payment => Payment {
                sale: required(row.sale, "sale", kind)?,
                amount: required(row.amount, "amount", kind)?,
            }
            .into(),
            EventType::Credit => ManualCredit {
                bank: required(row.bank, "bank", kind)?,
                amount: required(row.amount, "amount", kind)?,
                concept,
            }
            .into(),
            EventType::Debit => ManualDebit {
                bank: required(row.bank, "bank", kind)?,
                amount: required(row.amount, "amount", kind)?,
                concept,
            }
            .into(),
            EventType::Transfer => Transfer {
                from: required(row.bank, "bank", kind)?,
                to: required(row.to_bank, "to_bank", kind)?,
                amount: required(row.amount, "amount", kind)?,
                concept,
            }
            .into(),
            EventType::Distributor => NewDistributor {
                id: required(row.distributor, "distributor", kind)?,
                name: concept,
            }
            .into(),
            EventType::PurchaseOrder => NewPurchaseOrder {
                id: required(row.order, "order", kind)?,
                distributor: required(row.distributor, "distributor", kind)?,
                quantity: required(row.quantity, "quantity", kind)?,
                unit_cost: required(row.unit_cost, "unit_cost", kind)?,
                unit_freight: row.unit_freight.unwrap_or(Money::ZERO),
                initial_payment: row.bank.zip(row.amount),
            }
            .into(),
            EventType::PurchaseOrderPayment => PurchaseOrderPayment {
                purchase_order: required(row.order, "order", kind)?,
                bank: required(row.bank, "bank", kind)?,
                amount: required(row.amount, "amount", kind)?,
            }
            .into(),
            EventType::Return => ReturnRequest {
                sale: required(row.sale, "sale", kind)?,
                quantity: required(row.quantity, "quantity", kind)?,
            }
            .into(),
        };
        Ok(event)
    }
}
