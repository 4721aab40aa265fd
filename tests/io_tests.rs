mod common;

use common::{empty_engine, engine_over, money, run, sale, tables};
use vault_ledger::{
    domain::{
        BankId, ClientId, DistributorId, Event, ManualCredit, NewDistributor, NewPurchaseOrder,
        NewSale, Payment, PurchaseOrderId, ReturnRequest, SaleId, Transfer,
    },
    engine::Store,
    output, parsing, snapshot,
};

const EVENTS: &[u8] = include_bytes!("io_tests/events.csv");
const BANKS: &str = include_str!("io_tests/banks.csv");

fn parsed_events() -> Vec<Event> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(EVENTS);
    parsing::deserialize_csv(&mut rdr).collect()
}

// test input
#[test]
fn event_rows_become_typed_events() {
    let events = parsed_events();

    let expected: Vec<Event> = vec![
        NewSale {
            client: Some(ClientId::from(7)),
            ..sale(1, 15, 12000, 7000, 800)
        }
        .into(),
        Payment {
            sale: SaleId::from(1),
            amount: money(90000),
        }
        .into(),
        ManualCredit {
            bank: BankId::Azteca,
            amount: money(500),
            concept: "opening balance".into(),
        }
        .into(),
        Transfer {
            from: BankId::Azteca,
            to: BankId::Leftie,
            amount: vault_ledger::domain::Money::from_minor(20050),
            concept: "rebalance".into(),
        }
        .into(),
        NewDistributor {
            id: DistributorId::from(3),
            name: "Acme".into(),
        }
        .into(),
        NewPurchaseOrder {
            id: PurchaseOrderId::from(9),
            distributor: DistributorId::from(3),
            quantity: 10,
            unit_cost: money(4),
            unit_freight: money(1),
            initial_payment: Some((BankId::Azteca, money(20))),
        }
        .into(),
        Payment {
            sale: SaleId::from(2),
            amount: money(10),
        }
        .into(),
    ];

    assert_eq!(events, expected);
}

#[test]
fn row_missing_a_required_column_is_skipped() {
    let input = "type,sale,quantity\nreturn,1,\nreturn,1,2\n";
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());

    let events = parsing::deserialize_csv(&mut rdr).collect::<Vec<_>>();
    assert_eq!(
        events,
        vec![Event::from(ReturnRequest {
            sale: SaleId::from(1),
            quantity: 2,
        })]
    );
}

// test output
#[test]
fn processed_events_print_bank_balances() -> anyhow::Result<()> {
    let engine = empty_engine();
    let rejected = engine.process_events(parsed_events().into_iter());
    assert_eq!(rejected, 1);

    let mut output = Vec::new();
    output::print_banks(&engine.store().snapshot(), &mut output)?;
    let output = String::from_utf8(output)?;

    assert_eq!(output, BANKS);
    Ok(())
}

#[test]
fn snapshot_round_trips_through_a_directory() -> anyhow::Result<()> {
    let mut seeded = sale(1, 2, 300, 100, 20);
    seeded.initial_payment = Some(money(250));
    let engine = run(vec![
        seeded.into(),
        ReturnRequest {
            sale: SaleId::from(1),
            quantity: 1,
        }
        .into(),
        NewDistributor {
            id: DistributorId::from(1),
            name: "Acme".into(),
        }
        .into(),
        NewPurchaseOrder {
            id: PurchaseOrderId::from(1),
            distributor: DistributorId::from(1),
            quantity: 2,
            unit_cost: money(10),
            unit_freight: money(0),
            initial_payment: Some((BankId::BovedaMonte, money(5))),
        }
        .into(),
    ]);
    let state = tables(&engine);

    let dir = tempfile::tempdir()?;
    snapshot::save(&state, dir.path())?;
    let loaded = snapshot::load(dir.path())?;

    assert_eq!(loaded, state);
    assert!(engine_over(loaded).scan().is_clean());
    Ok(())
}

#[test]
fn missing_snapshot_directory_loads_empty_vaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let loaded = snapshot::load(&dir.path().join("absent"))?;

    assert_eq!(loaded, vault_ledger::engine::Tables::new());
    Ok(())
}

#[test]
fn drift_report_prints_one_row_per_entry() -> anyhow::Result<()> {
    let mut state = tables(&run(vec![
        ManualCredit {
            bank: BankId::Leftie,
            amount: money(10),
            concept: "seed".into(),
        }
        .into(),
    ]));
    state
        .banks
        .get_mut(&BankId::Leftie)
        .unwrap()
        .current_capital = money(4);

    let mut output = Vec::new();
    output::print_drift(&engine_over(state).scan(), &mut output)?;
    let output = String::from_utf8(output)?;

    assert_eq!(
        output,
        "subject,kind,stored,recomputed,gap,severity\n\
         bank Leftie,capital,4.00,10.00,6.00,confirmed\n"
    );
    Ok(())
}
