//! Databases under test
//!
//! The orchestrator and the loader only talk to a target through [`Target`], the CLI opens the
//! configured backend as one of the [`Targets`].

#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod sqlite;

use crate::config::ConnectionConfig;
use thiserror::Error;
use tpcbench_catalog::{Row, TableDef, TableMap};

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("SQLite target failed: {0}")]
    SQLite(#[from] rusqlite::Error),
    #[cfg(feature = "duckdb")]
    #[error("DuckDB target failed: {0}")]
    DuckDB(#[from] ::duckdb::Error),
    #[error("{0} targets are not available in this build")]
    Unsupported(&'static str),
    #[error("{0}")]
    Other(String),
}

/// Fully materialized result of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Cancels the statement a target is currently executing, callable from any thread
pub type Interrupter = Box<dyn Fn() + Send + 'static>;

pub trait Target {
    /// tag of the database system
    fn db_type(&self) -> &str;

    /// run `sql` and read its whole result
    fn execute(&mut self, sql: &str) -> Result<Table, TargetError>;

    fn create_table(&mut self, table: &TableDef, tables: &TableMap) -> Result<(), TargetError>;

    /// insert all `rows` in one transaction, returns the number of inserted rows
    fn bulk_insert(
        &mut self,
        table: &TableDef,
        tables: &TableMap,
        rows: &[Row],
    ) -> Result<usize, TargetError>;

    /// handle to cancel a running statement, if the backend supports it
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

#[derive(Debug)]
pub enum Targets {
    SQLite(sqlite::SQLiteTarget),
    #[cfg(feature = "duckdb")]
    DuckDB(self::duckdb::DuckDBTarget),
}

macro_rules! dispatch {
    ($self:ident, $target:ident => $call:expr) => {
        match $self {
            Targets::SQLite($target) => $call,
            #[cfg(feature = "duckdb")]
            Targets::DuckDB($target) => $call,
        }
    };
}

impl Targets {
    pub fn open(config: &ConnectionConfig) -> Result<Self, TargetError> {
        match config {
            ConnectionConfig::SQLite { path } => {
                Ok(Self::SQLite(sqlite::SQLiteTarget::open(path)?))
            }
            #[cfg(feature = "duckdb")]
            ConnectionConfig::DuckDB { path } => {
                Ok(Self::DuckDB(self::duckdb::DuckDBTarget::open(path)?))
            }
            #[cfg(not(feature = "duckdb"))]
            ConnectionConfig::DuckDB { .. } => Err(TargetError::Unsupported("DuckDB")),
        }
    }

    pub fn close(self) -> Result<(), TargetError> {
        dispatch!(self, target => target.close())
    }
}

impl Target for Targets {
    fn db_type(&self) -> &str {
        dispatch!(self, target => target.db_type())
    }

    fn execute(&mut self, sql: &str) -> Result<Table, TargetError> {
        dispatch!(self, target => target.execute(sql))
    }

    fn create_table(&mut self, table: &TableDef, tables: &TableMap) -> Result<(), TargetError> {
        dispatch!(self, target => target.create_table(table, tables))
    }

    fn bulk_insert(
        &mut self,
        table: &TableDef,
        tables: &TableMap,
        rows: &[Row],
    ) -> Result<usize, TargetError> {
        dispatch!(self, target => target.bulk_insert(table, tables, rows))
    }

    fn interrupter(&self) -> Option<Interrupter> {
        dispatch!(self, target => target.interrupter())
    }
}
