use super::{Interrupter, Table, Target, TargetError};
use itertools::Itertools;
use rusqlite::{
    params_from_iter,
    types::{Value as SqlValue, ValueRef},
    Connection, DropBehavior,
};
use std::path::Path;
use tpcbench_catalog::{Row, TableDef, TableMap, Value};
use tracing::{debug, error, info};

pub struct SQLiteTarget {
    connection: Connection,
}

impl std::fmt::Debug for SQLiteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SQLiteTarget")
            .field("path", &self.connection.path())
            .finish()
    }
}

impl SQLiteTarget {
    pub fn open(path: &Path) -> Result<Self, TargetError> {
        let connection = Connection::open(path)?;

        info!(path = %path.to_string_lossy(), "Opened SQLite target");

        Ok(Self { connection })
    }

    pub fn in_memory() -> Result<Self, TargetError> {
        Ok(Self {
            connection: Connection::open_in_memory()?,
        })
    }

    pub fn close(mut self) -> Result<(), TargetError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close SQLite target: {error}, trying again {counter}/3");

            if counter == 3 {
                return Err(TargetError::SQLite(error));
            }
        }

        info!("Closed SQLite target");

        Ok(())
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Decimal(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Date(value) => SqlValue::Text(value.format("%Y-%m-%d").to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Decimal(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl Target for SQLiteTarget {
    fn db_type(&self) -> &str {
        "sqlite"
    }

    fn execute(&mut self, sql: &str) -> Result<Table, TargetError> {
        let mut statement = self.connection.prepare(sql)?;
        let columns = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect_vec();
        let width = columns.len();

        let mut result = Vec::new();
        let mut rows = statement.query([])?;

        while let Some(row) = rows.next()? {
            result.push(
                (0..width)
                    .map(|index| row.get_ref(index).map(from_sql))
                    .collect::<Result<Row, _>>()?,
            );
        }

        Ok(Table {
            columns,
            rows: result,
        })
    }

    fn create_table(&mut self, table: &TableDef, tables: &TableMap) -> Result<(), TargetError> {
        self.connection
            .execute_batch(&table.create_statement(tables))?;

        debug!(table = %tables.physical(table.entity), "Created table");

        Ok(())
    }

    fn bulk_insert(
        &mut self,
        table: &TableDef,
        tables: &TableMap,
        rows: &[Row],
    ) -> Result<usize, TargetError> {
        let mut tx = self.connection.transaction()?;
        tx.set_drop_behavior(DropBehavior::Rollback);

        {
            let mut statement = tx.prepare_cached(&table.insert_statement(tables))?;

            for row in rows {
                statement.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }

        tx.commit()?;

        Ok(rows.len())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = self.connection.get_interrupt_handle();

        Some(Box::new(move || handle.interrupt()))
    }
}
