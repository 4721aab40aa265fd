use vault_ledger::{
    domain::{BankId, Event, Money, NewSale, SaleId},
    engine::{Engine, MemoryStore, Store, Tables},
};

#[allow(dead_code)]
pub fn run(events: Vec<Event>) -> Engine {
    let engine = empty_engine();
    let rejected = engine.process_events(events.into_iter());
    assert_eq!(rejected, 0, "every seeded event should be accepted");
    engine
}

#[allow(dead_code)]
pub fn empty_engine() -> Engine {
    Engine::default()
}

/// Shorthand for whole currency units.
#[allow(dead_code)]
pub fn money(major: i64) -> Money {
    Money::from_major(major)
}

#[allow(dead_code)]
pub fn sale(id: u64, quantity: u32, price: i64, cost: i64, freight: i64) -> NewSale {
    NewSale {
        id: SaleId::from(id),
        client: None,
        purchase_order: None,
        quantity,
        unit_sale_price: money(price),
        unit_cost_price: money(cost),
        unit_freight: money(freight),
        initial_payment: None,
    }
}

#[allow(dead_code)]
pub fn capital(engine: &Engine, bank: BankId) -> Money {
    engine.store().snapshot().banks[&bank].current_capital
}

#[allow(dead_code)]
pub fn tables(engine: &Engine) -> Tables {
    engine.store().snapshot()
}

/// A fresh engine over hand-edited tables.
#[allow(dead_code)]
pub fn engine_over(tables: Tables) -> Engine {
    Engine::new(MemoryStore::from(tables), Default::default())
}
