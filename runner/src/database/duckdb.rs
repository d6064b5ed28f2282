use super::{
    timestamp, BenchmarkRun, MetricColumns, QueryMetric, RunColumns, Transition, COMPLETE_RUN,
    FAIL_RUN, INSERT_METRIC, INSERT_RUN, SELECT_METRICS, SELECT_RUN, SELECT_RUNS, START_RUN,
};
use crate::{config::ConnectionConfig, database::ConnectionError};
use duckdb::params;
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, RawFairMutex};
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, error, info, trace};
use tracing_unwrap::ResultExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
/// Transparent, thread safe wrapper over `InnerConnection`
pub struct SharedConnection(Arc<FairMutex<InnerConnection>>);

#[derive(Debug)]
pub struct InnerConnection {
    connection: duckdb::Connection,
}

impl From<duckdb::Error> for ConnectionError {
    fn from(value: duckdb::Error) -> Self {
        ConnectionError::DuckDB(value)
    }
}

impl SharedConnection {
    pub fn new(inner_connection: InnerConnection) -> Self {
        Self(Arc::new(FairMutex::new(inner_connection)))
    }

    fn lock(&self) -> ArcMutexGuard<RawFairMutex, InnerConnection> {
        self.0.lock_arc()
    }

    pub fn init(&self) -> Result<(), ConnectionError> {
        self.lock().init()
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        Arc::try_unwrap(self.0).unwrap_or_log().into_inner().close()
    }

    pub fn load(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection::load(config)?))
    }

    pub fn in_memory() -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection {
            connection: duckdb::Connection::open_in_memory()?,
        }))
    }

    pub fn create_run(&self, run: &BenchmarkRun) -> Result<(), ConnectionError> {
        self.lock().create_run(run)
    }

    pub fn transition(
        &self,
        job_id: Uuid,
        transition: Transition,
    ) -> Result<BenchmarkRun, ConnectionError> {
        self.lock().transition(job_id, transition)
    }

    pub fn store_metric(
        &self,
        job_id: Uuid,
        query_number: u8,
        execution_time_seconds: f64,
    ) -> Result<i64, ConnectionError> {
        self.lock()
            .store_metric(job_id, query_number, execution_time_seconds)
    }

    pub fn run(&self, job_id: Uuid) -> Result<Option<BenchmarkRun>, ConnectionError> {
        self.lock().run(job_id)
    }

    pub fn metrics(&self, job_id: Uuid) -> Result<Vec<QueryMetric>, ConnectionError> {
        self.lock().metrics(job_id)
    }

    pub fn runs(&self) -> Result<Vec<BenchmarkRun>, ConnectionError> {
        self.lock().runs()
    }
}

impl InnerConnection {
    pub fn init(&self) -> Result<(), ConnectionError> {
        let mut counter = 1;

        for table in SQL_SCHEMA {
            match self.connection.execute(table, []) {
                Ok(_) => info!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(e) => {
                    error!("Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {e}",);
                    trace!("schema: {table}");

                    return Err(ConnectionError::DuckDB(e));
                }
            };

            counter += 1;
        }

        Ok(())
    }

    pub fn close(mut self) -> Result<(), ConnectionError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close DuckDB connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Failed to close DuckDB connection, giving up");

                return Err(ConnectionError::DuckDB(error));
            }
        }

        info!("Closed DuckDB connection");

        Ok(())
    }

    pub fn load(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        match config {
            ConnectionConfig::DuckDB { path } => Ok(Self {
                connection: duckdb::Connection::open(path)?,
            }),
            ConnectionConfig::SQLite { .. } => Err(ConnectionError::Unsupported("SQLite")),
        }
    }

    pub fn create_run(&self, run: &BenchmarkRun) -> Result<(), ConnectionError> {
        self.connection.prepare_cached(INSERT_RUN)?.execute(params![
            run.job_id.to_string(),
            run.db_type,
            run.scale_factor,
            run.status.as_str(),
            run.power_score,
            run.throughput_score,
            timestamp(&run.created_at),
            run.completed_at.as_ref().map(timestamp),
        ])?;

        info!(run = %run.job_id, db_type = %run.db_type, scale_factor = run.scale_factor, "Created run");

        Ok(())
    }

    pub fn transition(
        &self,
        job_id: Uuid,
        transition: Transition,
    ) -> Result<BenchmarkRun, ConnectionError> {
        let id = job_id.to_string();

        let changed = match transition {
            Transition::Start => self.connection.prepare_cached(START_RUN)?.execute(params![id])?,
            Transition::Complete {
                power_score,
                throughput_score,
                completed_at,
            } => self.connection.prepare_cached(COMPLETE_RUN)?.execute(params![
                power_score,
                throughput_score,
                timestamp(&completed_at),
                id
            ])?,
            Transition::Fail { completed_at } => self
                .connection
                .prepare_cached(FAIL_RUN)?
                .execute(params![timestamp(&completed_at), id])?,
        };

        let run = self.run(job_id)?.ok_or(ConnectionError::UnknownRun(job_id))?;

        if changed == 0 {
            return Err(ConnectionError::InvalidTransition {
                run: job_id,
                from: run.status,
                to: transition.target(),
            });
        }

        debug!(run = %job_id, status = %run.status, "Updated run");

        Ok(run)
    }

    pub fn store_metric(
        &self,
        job_id: Uuid,
        query_number: u8,
        execution_time_seconds: f64,
    ) -> Result<i64, ConnectionError> {
        let id: i64 = self.connection.prepare_cached(INSERT_METRIC)?.query_row(
            params![job_id.to_string(), query_number, execution_time_seconds],
            |row| row.get(0),
        )?;

        debug!(id = id, run = %job_id, query = query_number, "Inserted metric");

        Ok(id)
    }

    pub fn run(&self, job_id: Uuid) -> Result<Option<BenchmarkRun>, ConnectionError> {
        self.connection
            .prepare_cached(SELECT_RUN)?
            .query_map(params![job_id.to_string()], run_columns)?
            .next()
            .transpose()?
            .map(BenchmarkRun::try_from)
            .transpose()
    }

    pub fn runs(&self) -> Result<Vec<BenchmarkRun>, ConnectionError> {
        self.connection
            .prepare_cached(SELECT_RUNS)?
            .query_map([], run_columns)?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(BenchmarkRun::try_from(result?)?);

                Ok::<Vec<BenchmarkRun>, ConnectionError>(init)
            })
    }

    pub fn metrics(&self, job_id: Uuid) -> Result<Vec<QueryMetric>, ConnectionError> {
        self.connection
            .prepare_cached(SELECT_METRICS)?
            .query_map(params![job_id.to_string()], |row| {
                Ok::<MetricColumns, duckdb::Error>((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            })?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(QueryMetric::try_from(result?)?);

                Ok::<Vec<QueryMetric>, ConnectionError>(init)
            })
    }
}

fn run_columns(row: &duckdb::Row<'_>) -> Result<RunColumns, duckdb::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

// ref: https://duckdb.org/docs/sql/statements/create_table.html
//      https://duckdb.org/docs/sql/data_types/overview
// DuckDB rewrites an update of an indexed column as delete + insert, which trips the primary key
// of the run and any foreign key on query_metric.job_id. Neither the reference nor an index on
// the mutable status column is declared here.
pub const SQL_SCHEMA: [&str; 4] = [
    "create table if not exists benchmark_run (
    job_id varchar primary key,
    db_type varchar not null,
    scale_factor bigint not null check (scale_factor > 0),
    status varchar not null default 'pending'
        check (status in ('pending', 'running', 'completed', 'failed')),
    power_score double,
    throughput_score double,
    created_at varchar not null,
    completed_at varchar
);",
    "create index if not exists idx_benchmark_run_db_type on benchmark_run (db_type);",
    "create sequence if not exists seq_query_metric start 1 no cycle;",
    "create table if not exists query_metric (
    metric_id bigint primary key default(nextval('seq_query_metric')),
    job_id varchar not null,
    query_number bigint not null check (query_number between 1 and 22),
    execution_time_seconds double not null check (execution_time_seconds >= 0),
    unique (job_id, query_number)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
