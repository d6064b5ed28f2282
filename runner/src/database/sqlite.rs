use super::{
    timestamp, BenchmarkRun, MetricColumns, QueryMetric, RunColumns, Transition, COMPLETE_RUN,
    FAIL_RUN, INSERT_METRIC, INSERT_RUN, SELECT_METRICS, SELECT_RUN, SELECT_RUNS, START_RUN,
};
use crate::{config::ConnectionConfig, database::ConnectionError};
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, RawFairMutex};
use rusqlite::{params, Connection, OptionalExtension};
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, error, info};
use tracing_unwrap::ResultExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
/// Transparent, thread safe wrapper over `InnerConnection`
pub struct SharedConnection(Arc<FairMutex<InnerConnection>>);

#[derive(Debug)]
pub struct InnerConnection {
    connection: Connection,
}

impl From<rusqlite::Error> for ConnectionError {
    fn from(error: rusqlite::Error) -> Self {
        ConnectionError::SQLite(error)
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

    /// close the connection, every other handle of it must be dropped before
    pub fn close(self) -> Result<(), ConnectionError> {
        Arc::try_unwrap(self.0).unwrap_or_log().into_inner().close()
    }

    pub fn load(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection::load(config)?))
    }

    pub fn in_memory() -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection::new(Connection::open_in_memory()?)?))
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
    fn new(connection: Connection) -> Result<Self, ConnectionError> {
        // metrics are removed together with their run
        connection.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self { connection })
    }

    pub fn init(&self) -> Result<(), ConnectionError> {
        let mut counter = 1;

        for table in SQL_SCHEMA {
            match self.connection.execute(table, []) {
                Ok(_) => info!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {error}");

                    return Err(ConnectionError::SQLite(error));
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
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Failed to close SQLite connection, giving up");

                return Err(ConnectionError::SQLite(error));
            }
        }

        info!("Closed SQLite connection");

        Ok(())
    }

    pub fn load(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        match config {
            ConnectionConfig::SQLite { path } => Self::new(Connection::open(path)?),
            ConnectionConfig::DuckDB { .. } => Err(ConnectionError::Unsupported("DuckDB")),
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
            .query_row(params![job_id.to_string()], run_columns)
            .optional()?
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
                Ok::<MetricColumns, rusqlite::Error>((
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

fn run_columns(row: &rusqlite::Row<'_>) -> Result<RunColumns, rusqlite::Error> {
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

pub const SQL_SCHEMA: [&str; 5] = [
    "create table if not exists benchmark_run (
    -- unique identifier of the run
    job_id text primary key,
    -- tag of the database under test
    db_type text not null,
    scale_factor integer not null check (scale_factor > 0),
    -- pending, running, completed or failed
    status text not null default 'pending'
        check (status in ('pending', 'running', 'completed', 'failed')),
    -- geometric mean of the query times in seconds
    power_score real,
    -- queries per hour
    throughput_score real,
    created_at text not null,
    completed_at text
);",
    "create index if not exists idx_benchmark_run_db_type on benchmark_run (db_type);",
    "create index if not exists idx_benchmark_run_status on benchmark_run (status);",
    "create table if not exists query_metric (
    metric_id integer primary key autoincrement,
    job_id text not null references benchmark_run (job_id) on delete cascade,
    query_number integer not null check (query_number between 1 and 22),
    execution_time_seconds real not null check (execution_time_seconds >= 0),
    unique (job_id, query_number)
);",
    "create index if not exists idx_query_metric_job_id on query_metric (job_id);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::RunStatus;

    #[test]
    fn metrics_are_deleted_with_their_run() {
        let store = SharedConnection::in_memory().unwrap();
        store.init().unwrap();
        let kept = BenchmarkRun::new("sqlite", 1);
        let removed = BenchmarkRun::new("sqlite", 1);

        for run in [&kept, &removed] {
            store.create_run(run).unwrap();
            store.store_metric(run.job_id, 1, 0.5).unwrap();
            store.store_metric(run.job_id, 2, 0.5).unwrap();
        }

        let deleted = store
            .lock()
            .connection
            .execute(
                "delete from benchmark_run where job_id = ?",
                params![removed.job_id.to_string()],
            )
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.run(removed.job_id).unwrap(), None);
        assert!(store.metrics(removed.job_id).unwrap().is_empty());
        assert_eq!(store.metrics(kept.job_id).unwrap().len(), 2);
        assert_eq!(
            store.run(kept.job_id).unwrap().map(|run| run.status),
            Some(RunStatus::Pending)
        );
    }
}
