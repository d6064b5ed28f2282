//! row builders, one per entity
//!
//! A builder only sees its row number, the table cardinalities and an RNG seeded for that row,
//! so rows can be produced in any order and on any thread.

use crate::{
    text::{self, NATIONS},
    RowCounts,
};
use chrono::{Duration, NaiveDate};
use rand::{rngs::StdRng, Rng};
use tpcbench_catalog::{
    schema::{
        COMMIT_OFFSET_DAYS, LINE_STATUSES, MARKET_SEGMENTS, ORDER_PRIORITIES, ORDER_STATUSES,
        RECEIPT_OFFSET_DAYS, REGIONS, RETURN_FLAGS, SHIP_INSTRUCTIONS, SHIP_MODES,
    },
    Entity, Row, Value,
};

/// first order date
pub const START_DATE: (i32, u32, u32) = (1992, 1, 1);
/// number of days an order date may lie after `START_DATE`
pub const ORDER_DATE_SPAN: i64 = 2405;
/// number of days a ship date may lie after `START_DATE`, ends on 1998-12-01
pub const SHIP_DATE_SPAN: i64 = 2526;

/// parts per supplier key block in partsupp, each part has this many suppliers
pub const SUPPLIERS_PER_PART: u64 = 4;
/// lines per order in lineitem
pub const LINES_PER_ORDER: u64 = 4;

fn start_date() -> NaiveDate {
    let (year, month, day) = START_DATE;

    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn money(rng: &mut StdRng, min: f64, max: f64) -> Value {
    let cents = rng.gen_range((min * 100.0).round() as i64..=(max * 100.0).round() as i64);

    Value::Decimal(cents as f64 / 100.0)
}

fn key(number: u64) -> Value {
    Value::Integer(number as i64)
}

pub(crate) fn build(entity: Entity, row: u64, counts: &RowCounts, rng: &mut StdRng) -> Row {
    match entity {
        Entity::Region => region(row, rng),
        Entity::Nation => nation(row, rng),
        Entity::Part => part(row, rng),
        Entity::Supplier => supplier(row, rng),
        Entity::PartSupp => partsupp(row, counts, rng),
        Entity::Customer => customer(row, rng),
        Entity::Orders => orders(row, counts, rng),
        Entity::LineItem => lineitem(row, counts, rng),
    }
}

fn region(row: u64, rng: &mut StdRng) -> Row {
    vec![
        key(row),
        REGIONS[row as usize % REGIONS.len()].into(),
        text::comment(rng, 152).into(),
    ]
}

fn nation(row: u64, rng: &mut StdRng) -> Row {
    let (name, region) = NATIONS[row as usize % NATIONS.len()];

    vec![
        key(row),
        name.into(),
        Value::Integer(region),
        text::comment(rng, 152).into(),
    ]
}

fn part(row: u64, rng: &mut StdRng) -> Row {
    let partkey = row + 1;
    let manufacturer = rng.gen_range(1..=5);
    let retail_cents = 90_000 + (partkey / 10) % 20_001 + 100 * (partkey % 1_000);

    vec![
        key(partkey),
        text::part_name(rng).into(),
        format!("Manufacturer#{manufacturer}").into(),
        format!("Brand#{manufacturer}{}", rng.gen_range(1..=5)).into(),
        format!(
            "{} {} {}",
            text::pick(rng, text::TYPE_SIZES),
            text::pick(rng, text::TYPE_FINISHES),
            text::pick(rng, text::TYPE_METALS)
        )
        .into(),
        Value::Integer(rng.gen_range(1..=50)),
        format!(
            "{} {}",
            text::pick(rng, text::CONTAINER_SIZES),
            text::pick(rng, text::CONTAINER_KINDS)
        )
        .into(),
        Value::Decimal(retail_cents as f64 / 100.0),
        text::comment(rng, 23).into(),
    ]
}

fn supplier(row: u64, rng: &mut StdRng) -> Row {
    let suppkey = row + 1;
    let nation = rng.gen_range(0..NATIONS.len() as i64);

    vec![
        key(suppkey),
        format!("Supplier#{suppkey:09}").into(),
        text::address(rng, 10, 40).into(),
        Value::Integer(nation),
        text::phone(rng, nation).into(),
        money(rng, -999.99, 9999.99),
        text::comment(rng, 101).into(),
    ]
}

fn partsupp(row: u64, counts: &RowCounts, rng: &mut StdRng) -> Row {
    let partkey = row / SUPPLIERS_PER_PART + 1;
    let slot = row % SUPPLIERS_PER_PART;
    // suppliers of one part are spread a quarter of the supplier range apart
    let stride = (counts.supplier / SUPPLIERS_PER_PART).max(1);
    let suppkey = (partkey - 1 + slot * stride) % counts.supplier + 1;

    vec![
        key(partkey),
        key(suppkey),
        Value::Integer(rng.gen_range(1..=9999)),
        money(rng, 1.0, 1000.0),
        text::comment(rng, 199).into(),
    ]
}

fn customer(row: u64, rng: &mut StdRng) -> Row {
    let custkey = row + 1;
    let nation = rng.gen_range(0..NATIONS.len() as i64);

    vec![
        key(custkey),
        format!("Customer#{custkey:09}").into(),
        text::address(rng, 10, 40).into(),
        Value::Integer(nation),
        text::phone(rng, nation).into(),
        money(rng, -999.99, 9999.99),
        text::pick(rng, MARKET_SEGMENTS).into(),
        text::comment(rng, 117).into(),
    ]
}

fn orders(row: u64, counts: &RowCounts, rng: &mut StdRng) -> Row {
    let clerks = (counts.orders / 1_500).max(1);

    vec![
        key(row + 1),
        key(rng.gen_range(1..=counts.customer)),
        text::pick(rng, ORDER_STATUSES).into(),
        money(rng, 1000.0, 500_000.0),
        (start_date() + Duration::days(rng.gen_range(0..=ORDER_DATE_SPAN))).into(),
        text::pick(rng, ORDER_PRIORITIES).into(),
        format!("Clerk#{:09}", rng.gen_range(1..=clerks)).into(),
        Value::Integer(0),
        text::comment(rng, 79).into(),
    ]
}

fn lineitem(row: u64, counts: &RowCounts, rng: &mut StdRng) -> Row {
    let ship_date = start_date() + Duration::days(rng.gen_range(1..=SHIP_DATE_SPAN));

    vec![
        key(row / LINES_PER_ORDER + 1),
        key(rng.gen_range(1..=counts.part)),
        key(rng.gen_range(1..=counts.supplier)),
        key(row % LINES_PER_ORDER + 1),
        money(rng, 1.0, 50.0),
        money(rng, 100.0, 100_000.0),
        money(rng, 0.0, 0.1),
        money(rng, 0.0, 0.08),
        text::pick(rng, RETURN_FLAGS).into(),
        text::pick(rng, LINE_STATUSES).into(),
        ship_date.into(),
        // commit and receipt dates are derived, never drawn
        (ship_date + Duration::days(COMMIT_OFFSET_DAYS)).into(),
        (ship_date + Duration::days(RECEIPT_OFFSET_DAYS)).into(),
        text::pick(rng, SHIP_INSTRUCTIONS).into(),
        text::pick(rng, SHIP_MODES).into(),
        text::comment(rng, 44).into(),
    ]
}
