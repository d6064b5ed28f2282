//! Deterministic TPC-H data generator
//!
//! Every row is produced from an RNG seeded by the generator seed, the entity and the row
//! number. Any row-number range can therefore be generated on its own, on any thread, and the
//! concatenation of consecutive ranges is identical to the sequential sequence.

mod rows;
pub mod text;

pub use rows::{LINES_PER_ORDER, SUPPLIERS_PER_PART};

use itertools::Itertools;
use rand::{rngs::StdRng, SeedableRng};
use std::ops::{Range, RangeInclusive};
use thiserror::Error;
use tpcbench_catalog::{ConstraintViolation, Entity, Row};
use tracing::trace;

pub const DEFAULT_SEED: u64 = 42;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("row {row} of {entity} violates the schema: {violation}")]
    Constraint {
        entity: Entity,
        row: u64,
        #[source]
        violation: ConstraintViolation,
    },
    #[error("row {row} of {entity}: {column} = {value} references no row of {references}")]
    DanglingReference {
        entity: Entity,
        row: u64,
        column: &'static str,
        value: i64,
        references: Entity,
    },
}

/// Table cardinalities of one dataset.
///
/// Region and nation are fixed, partsupp and lineitem are derived from part and orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCounts {
    pub part: u64,
    pub supplier: u64,
    pub customer: u64,
    pub orders: u64,
}

impl RowCounts {
    const PART: f64 = 200_000.0;
    const SUPPLIER: f64 = 10_000.0;
    const CUSTOMER: f64 = 150_000.0;
    const ORDERS: f64 = 1_500_000.0;

    pub fn for_scale_factor(scale_factor: u32) -> Self {
        Self::scaled(f64::from(scale_factor.max(1)))
    }

    /// cardinalities for a (possibly fractional) scale factor, rounded up
    pub fn scaled(scale: f64) -> Self {
        let count = |base: f64, min: u64| ((base * scale).ceil() as u64).max(min);

        Self {
            part: count(Self::PART, 1),
            // partsupp spreads every part over four distinct suppliers
            supplier: count(Self::SUPPLIER, SUPPLIERS_PER_PART),
            customer: count(Self::CUSTOMER, 1),
            orders: count(Self::ORDERS, 1),
        }
    }

    /// smallest consistent dataset that holds at least `rows` rows of `entity`
    pub fn fitting(entity: Entity, rows: u64) -> Self {
        let rows = rows as f64;

        match entity {
            Entity::Region | Entity::Nation => Self::scaled(0.0),
            Entity::Part => Self::scaled(rows / Self::PART),
            Entity::Supplier => Self::scaled(rows / Self::SUPPLIER),
            Entity::PartSupp => {
                Self::scaled(rows / (Self::PART * SUPPLIERS_PER_PART as f64))
            }
            Entity::Customer => Self::scaled(rows / Self::CUSTOMER),
            Entity::Orders => Self::scaled(rows / Self::ORDERS),
            Entity::LineItem => Self::scaled(rows / (Self::ORDERS * LINES_PER_ORDER as f64)),
        }
    }

    pub fn rows(&self, entity: Entity) -> u64 {
        match entity {
            Entity::Region => 5,
            Entity::Nation => 25,
            Entity::Part => self.part,
            Entity::Supplier => self.supplier,
            Entity::PartSupp => self.part * SUPPLIERS_PER_PART,
            Entity::Customer => self.customer,
            Entity::Orders => self.orders,
            Entity::LineItem => self.orders * LINES_PER_ORDER,
        }
    }

    /// values of the (first) primary key column
    pub fn keys(&self, entity: Entity) -> RangeInclusive<i64> {
        match entity {
            Entity::Region => 0..=4,
            Entity::Nation => 0..=24,
            Entity::PartSupp => 1..=self.part as i64,
            Entity::LineItem => 1..=self.orders as i64,
            other => 1..=self.rows(other) as i64,
        }
    }

    pub fn total(&self) -> u64 {
        Entity::ALL.iter().map(|entity| self.rows(*entity)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataGenerator {
    counts: RowCounts,
    seed: u64,
}

impl DataGenerator {
    pub fn new(scale_factor: u32, seed: u64) -> Self {
        Self::with_counts(RowCounts::for_scale_factor(scale_factor), seed)
    }

    pub fn with_counts(counts: RowCounts, seed: u64) -> Self {
        Self { counts, seed }
    }

    pub fn counts(&self) -> &RowCounts {
        &self.counts
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// every row of `entity`
    pub fn rows(&self, entity: Entity) -> Rows {
        self.partition(entity, 0..self.counts.rows(entity))
    }

    /// rows with row numbers in `range`, clamped to the table cardinality
    pub fn partition(&self, entity: Entity, range: Range<u64>) -> Rows {
        let limit = self.counts.rows(entity);

        Rows {
            entity,
            counts: self.counts,
            seed: self.seed,
            next: range.start.min(limit),
            end: range.end.min(limit),
        }
    }

    /// split the row space of `entity` into consecutive ranges of at most `size` rows
    pub fn partitions(&self, entity: Entity, size: u64) -> Vec<Range<u64>> {
        let rows = self.counts.rows(entity);
        let size = size.max(1);

        (0..rows)
            .step_by(size as usize)
            .map(|start| start..(start + size).min(rows))
            .collect_vec()
    }

    /// materialize a partition, rejecting the first row that breaks a declared constraint
    pub fn checked_partition(
        &self,
        entity: Entity,
        range: Range<u64>,
    ) -> Result<Vec<Row>, GenerationError> {
        let rows = self.partition(entity, range);
        let start = rows.next;
        let mut checked = Vec::with_capacity(rows.len());

        for (number, row) in (start..).zip(rows) {
            validate(&self.counts, entity, number, &row)?;
            checked.push(row);
        }

        trace!(entity = %entity, start = start, rows = checked.len(), "Generated partition");

        Ok(checked)
    }
}

/// Lazy, restartable sequence of generated rows.
///
/// Cloning a `Rows` restarts generation from the clone's position.
#[derive(Debug, Clone)]
pub struct Rows {
    entity: Entity,
    counts: RowCounts,
    seed: u64,
    next: u64,
    end: u64,
}

impl Rows {
    pub fn entity(&self) -> Entity {
        self.entity
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let row = self.next;
        self.next += 1;

        let mut rng = StdRng::seed_from_u64(row_seed(self.seed, self.entity, row));

        Some(rows::build(self.entity, row, &self.counts, &mut rng))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next) as usize;

        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Rows {}

/// `target_row_count` rows of `entity` from a dataset just large enough to hold them
///
/// Region and nation have fixed cardinalities, asking for more rows yields all of them.
pub fn generate(entity: Entity, target_row_count: u64, seed: u64) -> Rows {
    DataGenerator::with_counts(RowCounts::fitting(entity, target_row_count), seed)
        .partition(entity, 0..target_row_count)
}

/// check a generated row against its table declaration and the key space of referenced tables
pub fn validate(
    counts: &RowCounts,
    entity: Entity,
    number: u64,
    row: &[tpcbench_catalog::Value],
) -> Result<(), GenerationError> {
    let table = entity.table();

    table
        .validate(row)
        .map_err(|violation| GenerationError::Constraint {
            entity,
            row: number,
            violation,
        })?;

    for foreign in table.foreign_keys {
        let value = table
            .column_index(foreign.column)
            .and_then(|index| row[index].as_i64())
            .unwrap_or(i64::MIN);

        if !counts.keys(foreign.references).contains(&value) {
            return Err(GenerationError::DanglingReference {
                entity,
                row: number,
                column: foreign.column,
                value,
                references: foreign.references,
            });
        }
    }

    Ok(())
}

/// splitmix64 over seed, entity and row number
fn row_seed(seed: u64, entity: Entity, row: u64) -> u64 {
    let mut z = seed
        .wrapping_add((entity as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(row.wrapping_mul(0xD1B5_4A32_D192_ED03));

    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
