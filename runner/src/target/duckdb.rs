use super::{Table, Target, TargetError};
use chrono::{Duration, NaiveDate};
use duckdb::{params_from_iter, types::Value as SqlValue, Connection};
use std::path::Path;
use tpcbench_catalog::{Row, TableDef, TableMap, Value};
use tracing::{debug, error, info};

pub struct DuckDBTarget {
    connection: Connection,
}

impl std::fmt::Debug for DuckDBTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDBTarget").finish_non_exhaustive()
    }
}

impl DuckDBTarget {
    pub fn open(path: &Path) -> Result<Self, TargetError> {
        let connection = Connection::open(path)?;

        info!(path = %path.to_string_lossy(), "Opened DuckDB target");

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
            error!(error = ?error, "Failed to close DuckDB target: {error}, trying again {counter}/3");

            if counter == 3 {
                return Err(TargetError::DuckDB(error));
            }
        }

        info!("Closed DuckDB target");

        Ok(())
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::BigInt(*value),
        Value::Decimal(value) => SqlValue::Double(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        // cast to date by the insert
        Value::Date(value) => SqlValue::Text(value.format("%Y-%m-%d").to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(value) => Value::Integer(i64::from(value)),
        SqlValue::TinyInt(value) => Value::Integer(value.into()),
        SqlValue::SmallInt(value) => Value::Integer(value.into()),
        SqlValue::Int(value) => Value::Integer(value.into()),
        SqlValue::BigInt(value) => Value::Integer(value),
        SqlValue::UTinyInt(value) => Value::Integer(value.into()),
        SqlValue::USmallInt(value) => Value::Integer(value.into()),
        SqlValue::UInt(value) => Value::Integer(value.into()),
        SqlValue::UBigInt(value) => {
            i64::try_from(value).map_or(Value::Decimal(value as f64), Value::Integer)
        }
        SqlValue::HugeInt(value) => {
            i64::try_from(value).map_or(Value::Decimal(value as f64), Value::Integer)
        }
        SqlValue::Float(value) => Value::Decimal(value.into()),
        SqlValue::Double(value) => Value::Decimal(value),
        SqlValue::Decimal(value) => value
            .to_string()
            .parse()
            .map_or(Value::Text(value.to_string()), Value::Decimal),
        SqlValue::Date32(days) => Value::Date(epoch() + Duration::days(days.into())),
        SqlValue::Text(value) => Value::Text(value),
        SqlValue::Blob(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
        other => Value::Text(format!("{other:?}")),
    }
}

impl Target for DuckDBTarget {
    fn db_type(&self) -> &str {
        "duckdb"
    }

    fn execute(&mut self, sql: &str) -> Result<Table, TargetError> {
        let mut statement = self.connection.prepare(sql)?;
        let mut rows = statement.query([])?;
        // column metadata is only available once the statement ran
        let columns = rows
            .as_ref()
            .map(|statement| {
                statement
                    .column_names()
                    .into_iter()
                    .map(|name| name.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let width = columns.len();

        let mut result = Vec::new();

        while let Some(row) = rows.next()? {
            result.push(
                (0..width)
                    .map(|index| row.get::<_, SqlValue>(index).map(from_sql))
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
        let tx = self.connection.transaction()?;

        {
            let mut statement = tx.prepare_cached(&table.insert_statement(tables))?;

            for row in rows {
                statement.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }

        tx.commit()?;

        Ok(rows.len())
    }
}
