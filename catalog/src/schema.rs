//! TPC-H table definitions
//!
//! Every table is declared once as a `TableDef` constant. Rows are checked against these
//! declarations before they are handed to a target, a row that violates a declaration is
//! rejected as a whole instead of being truncated or coerced.

use crate::{names::TableMap, value::Value};
use chrono::Duration;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub const REGIONS: [&str; 5] = ["AFRICA", "AMERICA", "ASIA", "EUROPE", "MIDDLE EAST"];
pub const MARKET_SEGMENTS: &[&str] = &[
    "AUTOMOBILE",
    "BUILDING",
    "FURNITURE",
    "HOUSEHOLD",
    "MACHINERY",
];
pub const ORDER_STATUSES: &[&str] = &["F", "O", "P"];
pub const ORDER_PRIORITIES: &[&str] = &["1-URGENT", "2-HIGH", "3-MEDIUM", "4-NOT SPECIFIED", "5-LOW"];
pub const RETURN_FLAGS: &[&str] = &["N", "A", "R"];
pub const LINE_STATUSES: &[&str] = &["O", "F"];
pub const SHIP_INSTRUCTIONS: &[&str] = &["DELIVER IN PERSON", "TAKE BACK RETURN", "COLLECT"];
pub const SHIP_MODES: &[&str] = &["AIR", "MAIL", "SHIP", "TRUCK"];

/// days between ship date and commit date of a line item
pub const COMMIT_OFFSET_DAYS: i64 = 10;
/// days between ship date and receipt date of a line item
pub const RECEIPT_OFFSET_DAYS: i64 = 20;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Region,
    Nation,
    Part,
    Supplier,
    PartSupp,
    Customer,
    Orders,
    LineItem,
}

impl Entity {
    /// all entities, referenced tables before referencing ones
    pub const ALL: [Entity; 8] = [
        Entity::Region,
        Entity::Nation,
        Entity::Part,
        Entity::Supplier,
        Entity::PartSupp,
        Entity::Customer,
        Entity::Orders,
        Entity::LineItem,
    ];

    /// logical table name, also used as placeholder in query templates
    pub fn name(self) -> &'static str {
        self.table().name
    }

    pub fn table(self) -> &'static TableDef {
        match self {
            Self::Region => &REGION,
            Self::Nation => &NATION,
            Self::Part => &PART,
            Self::Supplier => &SUPPLIER,
            Self::PartSupp => &PARTSUPP,
            Self::Customer => &CUSTOMER,
            Self::Orders => &ORDERS,
            Self::LineItem => &LINEITEM,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown TPC-H table '{0}'")]
pub struct UnknownEntity(pub String);

impl FromStr for Entity {
    type Err = UnknownEntity;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entity| entity.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownEntity(value.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnType {
    Integer,
    Decimal { precision: u8, scale: u8 },
    /// fixed length text, values may be shorter than the declared length
    Char(usize),
    Varchar(usize),
    Date,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            Self::Integer => "integer".to_owned(),
            Self::Decimal { precision, scale } => format!("decimal({precision}, {scale})"),
            Self::Char(length) => format!("char({length})"),
            Self::Varchar(length) => format!("varchar({length})"),
            Self::Date => "date".to_owned(),
        }
    }
}

const MONEY: ColumnType = ColumnType::Decimal {
    precision: 15,
    scale: 2,
};

/// value domain of a single column, on top of its type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Check {
    Range { min: f64, max: f64 },
    OneOf(&'static [&'static str]),
}

/// constraint over several columns of the same row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCheck {
    /// `column` must equal `base` shifted by `days`
    DaysAfter {
        column: &'static str,
        base: &'static str,
        days: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: Entity,
    pub referenced_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub check: Option<Check>,
    pub description: &'static str,
}

impl Column {
    const fn new(name: &'static str, ty: ColumnType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            check: None,
            description,
        }
    }

    const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    const fn range(self, min: f64, max: f64) -> Self {
        Self {
            check: Some(Check::Range { min, max }),
            ..self
        }
    }

    const fn one_of(self, values: &'static [&'static str]) -> Self {
        Self {
            check: Some(Check::OneOf(values)),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub entity: Entity,
    pub name: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub row_checks: &'static [RowCheck],
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintViolation {
    #[error("{table}: expected {expected} values, got {actual}")]
    Arity {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{table}.{column}: null in a non-nullable column")]
    Null {
        table: &'static str,
        column: &'static str,
    },
    #[error("{table}.{column}: expected {expected}, got {actual}")]
    Type {
        table: &'static str,
        column: &'static str,
        expected: String,
        actual: &'static str,
    },
    #[error("{table}.{column}: '{value}' is longer than {max} characters")]
    Length {
        table: &'static str,
        column: &'static str,
        value: String,
        max: usize,
    },
    #[error("{table}.{column}: {value} does not fit decimal({precision}, {scale})")]
    Decimal {
        table: &'static str,
        column: &'static str,
        value: f64,
        precision: u8,
        scale: u8,
    },
    #[error("{table}.{column}: {value} is outside of [{min}, {max}]")]
    Range {
        table: &'static str,
        column: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{table}.{column}: '{value}' is not one of {allowed:?}")]
    NotAllowed {
        table: &'static str,
        column: &'static str,
        value: String,
        allowed: &'static [&'static str],
    },
    #[error("{table}.{column}: expected {base} + {days} days")]
    DerivedDate {
        table: &'static str,
        column: &'static str,
        base: &'static str,
        days: i64,
    },
}

impl TableDef {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> {
        self.columns.iter().map(|column| column.name)
    }

    /// `create table` statement for this table under the names given by `tables`
    pub fn create_statement(&self, tables: &TableMap) -> String {
        let mut definitions = self
            .columns
            .iter()
            .map(|column| {
                format!(
                    "    {} {}{}",
                    column.name,
                    column.ty.sql(),
                    if column.nullable { "" } else { " not null" }
                )
            })
            .collect::<Vec<_>>();

        definitions.push(format!("    primary key ({})", self.primary_key.join(", ")));

        for key in self.foreign_keys {
            definitions.push(format!(
                "    foreign key ({}) references {} ({})",
                key.column,
                tables.physical(key.references),
                key.referenced_column
            ));
        }

        format!(
            "create table if not exists {} (\n{}\n)",
            tables.physical(self.entity),
            definitions.join(",\n")
        )
    }

    /// parameterized `insert` statement covering all columns in declaration order
    pub fn insert_statement(&self, tables: &TableMap) -> String {
        format!(
            "insert into {} ({}) values ({})",
            tables.physical(self.entity),
            self.column_names().join(", "),
            self.columns.iter().map(|_| "?").join(", ")
        )
    }

    /// check a row against all declared column and row constraints
    pub fn validate(&self, row: &[Value]) -> Result<(), ConstraintViolation> {
        if row.len() != self.columns.len() {
            return Err(ConstraintViolation::Arity {
                table: self.name,
                expected: self.columns.len(),
                actual: row.len(),
            });
        }

        for (column, value) in self.columns.iter().zip(row) {
            self.validate_value(column, value)?;
        }

        for check in self.row_checks {
            match *check {
                RowCheck::DaysAfter { column, base, days } => {
                    let derived = self.date_at(row, column);
                    let base_date = self.date_at(row, base);

                    match (derived, base_date) {
                        (Some(derived), Some(base_date))
                            if derived == base_date + Duration::days(days) => {}
                        // nullable dates are not part of any derived pair
                        (None, None) => {}
                        _ => {
                            return Err(ConstraintViolation::DerivedDate {
                                table: self.name,
                                column,
                                base,
                                days,
                            })
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn date_at(&self, row: &[Value], column: &str) -> Option<chrono::NaiveDate> {
        self.column_index(column)
            .and_then(|index| row.get(index))
            .and_then(Value::as_date)
    }

    fn validate_value(&self, column: &Column, value: &Value) -> Result<(), ConstraintViolation> {
        let type_error = || ConstraintViolation::Type {
            table: self.name,
            column: column.name,
            expected: column.ty.sql(),
            actual: value.kind(),
        };

        if value.is_null() {
            return if column.nullable {
                Ok(())
            } else {
                Err(ConstraintViolation::Null {
                    table: self.name,
                    column: column.name,
                })
            };
        }

        match column.ty {
            ColumnType::Integer => {
                value.as_i64().ok_or_else(type_error)?;
            }
            ColumnType::Decimal { precision, scale } => {
                let number = value.as_f64().ok_or_else(type_error)?;
                let scaled = number * 10f64.powi(scale as i32);
                let limit = 10f64.powi(precision as i32 - scale as i32);

                if !number.is_finite()
                    || (scaled - scaled.round()).abs() > 1e-6
                    || number.abs() >= limit
                {
                    return Err(ConstraintViolation::Decimal {
                        table: self.name,
                        column: column.name,
                        value: number,
                        precision,
                        scale,
                    });
                }
            }
            ColumnType::Char(max) | ColumnType::Varchar(max) => {
                let text = value.as_str().ok_or_else(type_error)?;

                if text.chars().count() > max {
                    return Err(ConstraintViolation::Length {
                        table: self.name,
                        column: column.name,
                        value: text.to_owned(),
                        max,
                    });
                }
            }
            ColumnType::Date => {
                value.as_date().ok_or_else(type_error)?;
            }
        }

        match column.check {
            Some(Check::Range { min, max }) => {
                // type check above guarantees a numeric value here
                let number = value.as_f64().unwrap_or(f64::NAN);

                if !(min..=max).contains(&number) {
                    return Err(ConstraintViolation::Range {
                        table: self.name,
                        column: column.name,
                        value: number,
                        min,
                        max,
                    });
                }
            }
            Some(Check::OneOf(allowed)) => {
                let text = value.as_str().unwrap_or_default();

                if !allowed.contains(&text) {
                    return Err(ConstraintViolation::NotAllowed {
                        table: self.name,
                        column: column.name,
                        value: text.to_owned(),
                        allowed,
                    });
                }
            }
            None => {}
        }

        Ok(())
    }
}

pub static REGION: TableDef = TableDef {
    entity: Entity::Region,
    name: "region",
    columns: &[
        Column::new("r_regionkey", ColumnType::Integer, "Region Key"),
        Column::new("r_name", ColumnType::Char(25), "Region Name"),
        Column::new("r_comment", ColumnType::Varchar(152), "Comment").nullable(),
    ],
    primary_key: &["r_regionkey"],
    foreign_keys: &[],
    row_checks: &[],
};

pub static NATION: TableDef = TableDef {
    entity: Entity::Nation,
    name: "nation",
    columns: &[
        Column::new("n_nationkey", ColumnType::Integer, "Nation Key"),
        Column::new("n_name", ColumnType::Char(25), "Nation Name"),
        Column::new("n_regionkey", ColumnType::Integer, "Region Key"),
        Column::new("n_comment", ColumnType::Varchar(152), "Comment").nullable(),
    ],
    primary_key: &["n_nationkey"],
    foreign_keys: &[ForeignKey {
        column: "n_regionkey",
        references: Entity::Region,
        referenced_column: "r_regionkey",
    }],
    row_checks: &[],
};

pub static PART: TableDef = TableDef {
    entity: Entity::Part,
    name: "part",
    columns: &[
        Column::new("p_partkey", ColumnType::Integer, "Part Key"),
        Column::new("p_name", ColumnType::Varchar(55), "Part Name"),
        Column::new("p_mfgr", ColumnType::Char(25), "Manufacturer"),
        Column::new("p_brand", ColumnType::Char(10), "Brand"),
        Column::new("p_type", ColumnType::Varchar(25), "Type"),
        Column::new("p_size", ColumnType::Integer, "Size").range(1.0, 50.0),
        Column::new("p_container", ColumnType::Char(10), "Container"),
        Column::new("p_retailprice", MONEY, "Retail Price"),
        Column::new("p_comment", ColumnType::Varchar(23), "Comment").nullable(),
    ],
    primary_key: &["p_partkey"],
    foreign_keys: &[],
    row_checks: &[],
};

pub static SUPPLIER: TableDef = TableDef {
    entity: Entity::Supplier,
    name: "supplier",
    columns: &[
        Column::new("s_suppkey", ColumnType::Integer, "Supplier Key"),
        Column::new("s_name", ColumnType::Char(25), "Supplier Name"),
        Column::new("s_address", ColumnType::Varchar(40), "Address"),
        Column::new("s_nationkey", ColumnType::Integer, "Nation Key"),
        Column::new("s_phone", ColumnType::Char(15), "Phone Number"),
        Column::new("s_acctbal", MONEY, "Account Balance").range(-999.99, 9999.99),
        Column::new("s_comment", ColumnType::Varchar(101), "Comment").nullable(),
    ],
    primary_key: &["s_suppkey"],
    foreign_keys: &[ForeignKey {
        column: "s_nationkey",
        references: Entity::Nation,
        referenced_column: "n_nationkey",
    }],
    row_checks: &[],
};

pub static PARTSUPP: TableDef = TableDef {
    entity: Entity::PartSupp,
    name: "partsupp",
    columns: &[
        Column::new("ps_partkey", ColumnType::Integer, "Part Key"),
        Column::new("ps_suppkey", ColumnType::Integer, "Supplier Key"),
        Column::new("ps_availqty", ColumnType::Integer, "Available Quantity").range(1.0, 9999.0),
        Column::new("ps_supplycost", MONEY, "Supply Cost").range(1.0, 1000.0),
        Column::new("ps_comment", ColumnType::Varchar(199), "Comment").nullable(),
    ],
    primary_key: &["ps_partkey", "ps_suppkey"],
    foreign_keys: &[
        ForeignKey {
            column: "ps_partkey",
            references: Entity::Part,
            referenced_column: "p_partkey",
        },
        ForeignKey {
            column: "ps_suppkey",
            references: Entity::Supplier,
            referenced_column: "s_suppkey",
        },
    ],
    row_checks: &[],
};

pub static CUSTOMER: TableDef = TableDef {
    entity: Entity::Customer,
    name: "customer",
    columns: &[
        Column::new("c_custkey", ColumnType::Integer, "Customer Key"),
        Column::new("c_name", ColumnType::Varchar(25), "Customer Name"),
        Column::new("c_address", ColumnType::Varchar(40), "Address"),
        Column::new("c_nationkey", ColumnType::Integer, "Nation Key"),
        Column::new("c_phone", ColumnType::Char(15), "Phone Number"),
        Column::new("c_acctbal", MONEY, "Account Balance").range(-999.99, 9999.99),
        Column::new("c_mktsegment", ColumnType::Char(10), "Market Segment")
            .one_of(MARKET_SEGMENTS),
        Column::new("c_comment", ColumnType::Varchar(117), "Comment").nullable(),
    ],
    primary_key: &["c_custkey"],
    foreign_keys: &[ForeignKey {
        column: "c_nationkey",
        references: Entity::Nation,
        referenced_column: "n_nationkey",
    }],
    row_checks: &[],
};

pub static ORDERS: TableDef = TableDef {
    entity: Entity::Orders,
    name: "orders",
    columns: &[
        Column::new("o_orderkey", ColumnType::Integer, "Order Key"),
        Column::new("o_custkey", ColumnType::Integer, "Customer Key"),
        Column::new("o_orderstatus", ColumnType::Char(1), "Order Status").one_of(ORDER_STATUSES),
        Column::new("o_totalprice", MONEY, "Total Price"),
        Column::new("o_orderdate", ColumnType::Date, "Order Date"),
        Column::new("o_orderpriority", ColumnType::Char(15), "Order Priority")
            .one_of(ORDER_PRIORITIES),
        Column::new("o_clerk", ColumnType::Char(15), "Clerk"),
        Column::new("o_shippriority", ColumnType::Integer, "Ship Priority"),
        Column::new("o_comment", ColumnType::Varchar(79), "Comment").nullable(),
    ],
    primary_key: &["o_orderkey"],
    foreign_keys: &[ForeignKey {
        column: "o_custkey",
        references: Entity::Customer,
        referenced_column: "c_custkey",
    }],
    row_checks: &[],
};

pub static LINEITEM: TableDef = TableDef {
    entity: Entity::LineItem,
    name: "lineitem",
    columns: &[
        Column::new("l_orderkey", ColumnType::Integer, "Order Key"),
        Column::new("l_partkey", ColumnType::Integer, "Part Key"),
        Column::new("l_suppkey", ColumnType::Integer, "Supplier Key"),
        Column::new("l_linenumber", ColumnType::Integer, "Line Number").range(1.0, 7.0),
        Column::new("l_quantity", MONEY, "Quantity").range(1.0, 50.0),
        Column::new("l_extendedprice", MONEY, "Extended Price").range(100.0, 100000.0),
        Column::new("l_discount", MONEY, "Discount").range(0.0, 0.1),
        Column::new("l_tax", MONEY, "Tax").range(0.0, 0.08),
        Column::new("l_returnflag", ColumnType::Char(1), "Return Flag").one_of(RETURN_FLAGS),
        Column::new("l_linestatus", ColumnType::Char(1), "Line Status").one_of(LINE_STATUSES),
        Column::new("l_shipdate", ColumnType::Date, "Ship Date"),
        Column::new("l_commitdate", ColumnType::Date, "Commit Date"),
        Column::new("l_receiptdate", ColumnType::Date, "Receipt Date"),
        Column::new("l_shipinstruct", ColumnType::Char(25), "Shipping Instructions")
            .one_of(SHIP_INSTRUCTIONS),
        Column::new("l_shipmode", ColumnType::Char(10), "Shipping Mode").one_of(SHIP_MODES),
        Column::new("l_comment", ColumnType::Varchar(44), "Comment").nullable(),
    ],
    primary_key: &["l_orderkey", "l_linenumber"],
    foreign_keys: &[
        ForeignKey {
            column: "l_orderkey",
            references: Entity::Orders,
            referenced_column: "o_orderkey",
        },
        ForeignKey {
            column: "l_partkey",
            references: Entity::Part,
            referenced_column: "p_partkey",
        },
        ForeignKey {
            column: "l_suppkey",
            references: Entity::Supplier,
            referenced_column: "s_suppkey",
        },
    ],
    row_checks: &[
        RowCheck::DaysAfter {
            column: "l_commitdate",
            base: "l_shipdate",
            days: COMMIT_OFFSET_DAYS,
        },
        RowCheck::DaysAfter {
            column: "l_receiptdate",
            base: "l_shipdate",
            days: RECEIPT_OFFSET_DAYS,
        },
    ],
};
