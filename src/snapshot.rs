//! Snapshot directory persistence.
//!
//! Each table is one flat CSV file whose columns are the persisted field
//! contract shared with other processes reading the same records. Missing
//! files load as empty tables; the seven vaults always exist.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    domain::{
        Bank, BankId, ClientId, Direction, Distribution, Distributor, DistributorId, Installment,
        InstallmentId, Links, Money, Movement, MovementId, MovementKind, PaymentState,
        PurchaseOrder, PurchaseOrderId, ReturnId, Sale, SaleId, SaleReturn,
    },
    engine::Tables,
};

const BANKS: &str = "banks.csv";
const SALES: &str = "sales.csv";
const INSTALLMENTS: &str = "installments.csv";
const MOVEMENTS: &str = "movements.csv";
const DISTRIBUTORS: &str = "distributors.csv";
const PURCHASE_ORDERS: &str = "purchase_orders.csv";
const RETURNS: &str = "returns.csv";

#[derive(Debug, Serialize, Deserialize)]
struct BankRecord {
    id: BankId,
    label: String,
    current_capital: Money,
    historical_inflows: Money,
    historical_outflows: Money,
}

/// Full-value legs are optional so that rows written before the split was
/// persisted still load; they come back as zero and show up as drift.
#[derive(Debug, Serialize, Deserialize)]
struct SaleRecord {
    id: SaleId,
    client: Option<ClientId>,
    purchase_order: Option<PurchaseOrderId>,
    quantity: u32,
    unit_sale_price: Money,
    unit_cost_price: Money,
    unit_freight: Money,
    total_price: Money,
    amount_paid: Money,
    amount_remaining: Money,
    payment_state: PaymentState,
    cost_recovery_full: Option<Money>,
    freight_full: Option<Money>,
    profit_full: Option<Money>,
    cost_recovery_credited: Money,
    freight_credited: Money,
    profit_credited: Money,
    installment_count: u32,
    first_installment_at: Option<DateTime<Utc>>,
    last_installment_at: Option<DateTime<Utc>>,
    returned_quantity: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstallmentRecord {
    id: InstallmentId,
    sale: SaleId,
    amount: Money,
    proportion: Decimal,
    cost_recovery: Money,
    freight: Money,
    profit: Money,
    cumulative_paid: Money,
    resulting_state: PaymentState,
    timestamp: DateTime<Utc>,
    synthetic: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct MovementRecord {
    id: MovementId,
    bank: BankId,
    r#type: Direction,
    kind: MovementKind,
    amount: Money,
    timestamp: DateTime<Utc>,
    concept: String,
    reference: Option<String>,
    sale: Option<SaleId>,
    purchase_order: Option<PurchaseOrderId>,
    client: Option<ClientId>,
    distributor: Option<DistributorId>,
    counterparty: Option<BankId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DistributorRecord {
    id: DistributorId,
    name: String,
    outstanding_debt: Money,
    total_paid: Money,
    payment_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PurchaseOrderRecord {
    id: PurchaseOrderId,
    distributor: DistributorId,
    quantity: u32,
    unit_cost: Money,
    unit_freight: Money,
    total: Money,
    amount_paid: Money,
    amount_remaining: Money,
    payment_state: PaymentState,
    payment_count: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReturnRecord {
    id: ReturnId,
    sale: SaleId,
    quantity: u32,
    cost_recovery: Money,
    freight: Money,
    profit: Money,
    timestamp: DateTime<Utc>,
}

impl From<&Bank> for BankRecord {
    fn from(bank: &Bank) -> Self {
        Self {
            id: bank.id,
            label: bank.label.clone(),
            current_capital: bank.current_capital,
            historical_inflows: bank.historical_inflows,
            historical_outflows: bank.historical_outflows,
        }
    }
}

impl From<BankRecord> for Bank {
    fn from(record: BankRecord) -> Self {
        Self {
            id: record.id,
            label: record.label,
            current_capital: record.current_capital,
            historical_inflows: record.historical_inflows,
            historical_outflows: record.historical_outflows,
        }
    }
}

impl From<&Sale> for SaleRecord {
    fn from(sale: &Sale) -> Self {
        Self {
            id: sale.id,
            client: sale.client,
            purchase_order: sale.purchase_order,
            quantity: sale.quantity,
            unit_sale_price: sale.unit_sale_price,
            unit_cost_price: sale.unit_cost_price,
            unit_freight: sale.unit_freight,
            total_price: sale.total_price,
            amount_paid: sale.amount_paid,
            amount_remaining: sale.amount_remaining,
            payment_state: sale.payment_state,
            cost_recovery_full: Some(sale.full.cost_recovery),
            freight_full: Some(sale.full.freight),
            profit_full: Some(sale.full.profit),
            cost_recovery_credited: sale.credited.cost_recovery,
            freight_credited: sale.credited.freight,
            profit_credited: sale.credited.profit,
            installment_count: sale.installment_count,
            first_installment_at: sale.first_installment_at,
            last_installment_at: sale.last_installment_at,
            returned_quantity: sale.returned_quantity,
            created_at: sale.created_at,
        }
    }
}

impl From<SaleRecord> for Sale {
    fn from(record: SaleRecord) -> Self {
        Self {
            id: record.id,
            client: record.client,
            purchase_order: record.purchase_order,
            quantity: record.quantity,
            unit_sale_price: record.unit_sale_price,
            unit_cost_price: record.unit_cost_price,
            unit_freight: record.unit_freight,
            total_price: record.total_price,
            amount_paid: record.amount_paid,
            amount_remaining: record.amount_remaining,
            payment_state: record.payment_state,
            full: Distribution::new(
                record.cost_recovery_full.unwrap_or_default(),
                record.freight_full.unwrap_or_default(),
                record.profit_full.unwrap_or_default(),
            ),
            credited: Distribution::new(
                record.cost_recovery_credited,
                record.freight_credited,
                record.profit_credited,
            ),
            installment_count: record.installment_count,
            first_installment_at: record.first_installment_at,
            last_installment_at: record.last_installment_at,
            returned_quantity: record.returned_quantity,
            created_at: record.created_at,
        }
    }
}

impl From<&Installment> for InstallmentRecord {
    fn from(installment: &Installment) -> Self {
        Self {
            id: installment.id,
            sale: installment.sale,
            amount: installment.amount,
            proportion: installment.proportion,
            cost_recovery: installment.legs.cost_recovery,
            freight: installment.legs.freight,
            profit: installment.legs.profit,
            cumulative_paid: installment.cumulative_paid,
            resulting_state: installment.resulting_state,
            timestamp: installment.timestamp,
            synthetic: installment.synthetic,
        }
    }
}

impl From<InstallmentRecord> for Installment {
    fn from(record: InstallmentRecord) -> Self {
        Self {
            id: record.id,
            sale: record.sale,
            amount: record.amount,
            proportion: record.proportion,
            legs: Distribution::new(record.cost_recovery, record.freight, record.profit),
            cumulative_paid: record.cumulative_paid,
            resulting_state: record.resulting_state,
            timestamp: record.timestamp,
            synthetic: record.synthetic,
        }
    }
}

impl From<&Movement> for MovementRecord {
    fn from(movement: &Movement) -> Self {
        Self {
            id: movement.id,
            bank: movement.bank,
            r#type: movement.direction(),
            kind: movement.kind,
            amount: movement.amount,
            timestamp: movement.timestamp,
            concept: movement.concept.clone(),
            reference: movement.links.reference.clone(),
            sale: movement.links.sale,
            purchase_order: movement.links.purchase_order,
            client: movement.links.client,
            distributor: movement.links.distributor,
            counterparty: movement.links.counterparty,
        }
    }
}

impl TryFrom<MovementRecord> for Movement {
    type Error = anyhow::Error;

    fn try_from(record: MovementRecord) -> Result<Self, Self::Error> {
        if record.kind.direction() != record.r#type {
            anyhow::bail!(
                "movement {:?} has type {:?} but kind {:?}",
                record.id,
                record.r#type,
                record.kind
            );
        }
        Ok(Self {
            id: record.id,
            bank: record.bank,
            kind: record.kind,
            amount: record.amount,
            timestamp: record.timestamp,
            concept: record.concept,
            links: Links {
                reference: record.reference,
                sale: record.sale,
                purchase_order: record.purchase_order,
                client: record.client,
                distributor: record.distributor,
                counterparty: record.counterparty,
            },
        })
    }
}

impl From<&Distributor> for DistributorRecord {
    fn from(distributor: &Distributor) -> Self {
        Self {
            id: distributor.id,
            name: distributor.name.clone(),
            outstanding_debt: distributor.outstanding_debt,
            total_paid: distributor.total_paid,
            payment_count: distributor.payment_count,
        }
    }
}

impl From<DistributorRecord> for Distributor {
    fn from(record: DistributorRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            outstanding_debt: record.outstanding_debt,
            total_paid: record.total_paid,
            payment_count: record.payment_count,
        }
    }
}

impl From<&PurchaseOrder> for PurchaseOrderRecord {
    fn from(order: &PurchaseOrder) -> Self {
        Self {
            id: order.id,
            distributor: order.distributor,
            quantity: order.quantity,
            unit_cost: order.unit_cost,
            unit_freight: order.unit_freight,
            total: order.total,
            amount_paid: order.amount_paid,
            amount_remaining: order.amount_remaining,
            payment_state: order.payment_state,
            payment_count: order.payment_count,
            created_at: order.created_at,
        }
    }
}

impl From<PurchaseOrderRecord> for PurchaseOrder {
    fn from(record: PurchaseOrderRecord) -> Self {
        Self {
            id: record.id,
            distributor: record.distributor,
            quantity: record.quantity,
            unit_cost: record.unit_cost,
            unit_freight: record.unit_freight,
            total: record.total,
            amount_paid: record.amount_paid,
            amount_remaining: record.amount_remaining,
            payment_state: record.payment_state,
            payment_count: record.payment_count,
            created_at: record.created_at,
        }
    }
}

impl From<&SaleReturn> for ReturnRecord {
    fn from(sale_return: &SaleReturn) -> Self {
        Self {
            id: sale_return.id,
            sale: sale_return.sale,
            quantity: sale_return.quantity,
            cost_recovery: sale_return.reversed.cost_recovery,
            freight: sale_return.reversed.freight,
            profit: sale_return.reversed.profit,
            timestamp: sale_return.timestamp,
        }
    }
}

impl From<ReturnRecord> for SaleReturn {
    fn from(record: ReturnRecord) -> Self {
        Self {
            id: record.id,
            sale: record.sale,
            quantity: record.quantity,
            reversed: Distribution::new(record.cost_recovery, record.freight, record.profit),
            timestamp: record.timestamp,
        }
    }
}

fn read_records<R: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<R>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    rdr.deserialize()
        .collect::<Result<Vec<R>, _>>()
        .with_context(|| format!("reading {}", path.display()))
}

fn write_records<R: Serialize>(
    path: PathBuf,
    records: impl IntoIterator<Item = R>,
) -> anyhow::Result<()> {
    let mut wtr =
        csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Loads a snapshot directory. A missing directory is a fresh store.
pub fn load(dir: &Path) -> anyhow::Result<Tables> {
    let mut tables = Tables::new();
    for record in read_records::<BankRecord>(&dir.join(BANKS))? {
        tables.banks.insert(record.id, record.into());
    }
    for record in read_records::<SaleRecord>(&dir.join(SALES))? {
        tables.sales.insert(record.id, record.into());
    }
    tables.installments = read_records::<InstallmentRecord>(&dir.join(INSTALLMENTS))?
        .into_iter()
        .map(Installment::from)
        .collect();
    tables.movements = read_records::<MovementRecord>(&dir.join(MOVEMENTS))?
        .into_iter()
        .map(Movement::try_from)
        .collect::<anyhow::Result<_>>()?;
    for record in read_records::<DistributorRecord>(&dir.join(DISTRIBUTORS))? {
        tables.distributors.insert(record.id, record.into());
    }
    for record in read_records::<PurchaseOrderRecord>(&dir.join(PURCHASE_ORDERS))? {
        tables.purchase_orders.insert(record.id, record.into());
    }
    tables.returns = read_records::<ReturnRecord>(&dir.join(RETURNS))?
        .into_iter()
        .map(SaleReturn::from)
        .collect();
    Ok(tables)
}

pub fn save(tables: &Tables, dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    write_records(dir.join(BANKS), tables.banks.values().map(BankRecord::from))?;
    write_records(dir.join(SALES), tables.sales.values().map(SaleRecord::from))?;
    write_records(
        dir.join(INSTALLMENTS),
        tables.installments.iter().map(InstallmentRecord::from),
    )?;
    write_records(
        dir.join(MOVEMENTS),
        tables.movements.iter().map(MovementRecord::from),
    )?;
    write_records(
        dir.join(DISTRIBUTORS),
        tables.distributors.values().map(DistributorRecord::from),
    )?;
    write_records(
        dir.join(PURCHASE_ORDERS),
        tables.purchase_orders.values().map(PurchaseOrderRecord::from),
    )?;
    write_records(dir.join(RETURNS), tables.returns.iter().map(ReturnRecord::from))?;
    Ok(())
}
