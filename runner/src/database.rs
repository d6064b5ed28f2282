#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod sqlite;

use crate::config::ConnectionConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("SQLite results store failed: {0}")]
    SQLite(rusqlite::Error),
    #[cfg(feature = "duckdb")]
    #[error("DuckDB results store failed: {0}")]
    DuckDB(::duckdb::Error),
    #[error("{0} results store is not available in this build")]
    Unsupported(&'static str),
    #[error("run {0} does not exist")]
    UnknownRun(Uuid),
    #[error("run {run} is {from}, it cannot become {to}")]
    InvalidTransition {
        run: Uuid,
        from: RunStatus,
        to: RunStatus,
    },
    #[error("stored {column} '{value}' is invalid")]
    Corrupt { column: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ConnectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ConnectionError::Corrupt {
                column: "status",
                value: other.to_owned(),
            }),
        }
    }
}

/// One execution of the full query suite against one target at one scale factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub job_id: Uuid,
    pub db_type: String,
    pub scale_factor: u32,
    pub status: RunStatus,
    /// geometric mean of the query times, only set once completed
    pub power_score: Option<f64>,
    /// queries per hour, only set once completed
    pub throughput_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// set on the transition into a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl BenchmarkRun {
    /// new pending run with a fresh identifier
    pub fn new(db_type: impl Into<String>, scale_factor: u32) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            db_type: db_type.into(),
            scale_factor,
            status: RunStatus::Pending,
            power_score: None,
            throughput_score: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Timing of one query within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetric {
    pub metric_id: i64,
    pub job_id: Uuid,
    pub query_number: u8,
    pub execution_time_seconds: f64,
}

/// A state change of a run, applied only if the run is in one of `sources()`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Start,
    Complete {
        power_score: f64,
        throughput_score: f64,
        completed_at: DateTime<Utc>,
    },
    Fail {
        completed_at: DateTime<Utc>,
    },
}

impl Transition {
    pub fn target(&self) -> RunStatus {
        match self {
            Self::Start => RunStatus::Running,
            Self::Complete { .. } => RunStatus::Completed,
            Self::Fail { .. } => RunStatus::Failed,
        }
    }

    pub fn sources(&self) -> &'static [RunStatus] {
        match self {
            Self::Start => &[RunStatus::Pending],
            Self::Complete { .. } => &[RunStatus::Running],
            Self::Fail { .. } => &[RunStatus::Pending, RunStatus::Running],
        }
    }
}

// The update statements are shared by all adapters, the status condition makes every terminal
// state write-once.
pub(crate) const START_RUN: &str = "update benchmark_run
    set status = 'running'
    where job_id = ? and status = 'pending'";
pub(crate) const COMPLETE_RUN: &str = "update benchmark_run
    set status = 'completed', power_score = ?, throughput_score = ?, completed_at = ?
    where job_id = ? and status = 'running'";
pub(crate) const FAIL_RUN: &str = "update benchmark_run
    set status = 'failed', completed_at = ?
    where job_id = ? and status in ('pending', 'running')";

pub(crate) const INSERT_RUN: &str = "insert into benchmark_run
    (job_id, db_type, scale_factor, status, power_score, throughput_score, created_at, completed_at)
    values (?, ?, ?, ?, ?, ?, ?, ?)";
pub(crate) const INSERT_METRIC: &str = "insert into query_metric
    (job_id, query_number, execution_time_seconds)
    values (?, ?, ?)
    returning metric_id";
pub(crate) const SELECT_RUN: &str = "select
    job_id, db_type, scale_factor, status, power_score, throughput_score, created_at, completed_at
    from benchmark_run where job_id = ?";
pub(crate) const SELECT_RUNS: &str = "select
    job_id, db_type, scale_factor, status, power_score, throughput_score, created_at, completed_at
    from benchmark_run order by created_at, job_id";
pub(crate) const SELECT_METRICS: &str = "select
    metric_id, job_id, query_number, execution_time_seconds
    from query_metric where job_id = ? order by query_number";

/// `benchmark_run` row as read from a store, before parsing
pub(crate) type RunColumns = (
    String,
    String,
    i64,
    String,
    Option<f64>,
    Option<f64>,
    String,
    Option<String>,
);

/// `query_metric` row as read from a store, before parsing
pub(crate) type MetricColumns = (i64, String, i64, f64);

pub(crate) fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, ConnectionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| ConnectionError::Corrupt {
            column,
            value: value.to_owned(),
        })
}

fn parse_uuid(value: &str) -> Result<Uuid, ConnectionError> {
    Uuid::parse_str(value).map_err(|_| ConnectionError::Corrupt {
        column: "job_id",
        value: value.to_owned(),
    })
}

impl TryFrom<RunColumns> for BenchmarkRun {
    type Error = ConnectionError;

    fn try_from(
        (job_id, db_type, scale_factor, status, power_score, throughput_score, created_at, completed_at): RunColumns,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            job_id: parse_uuid(&job_id)?,
            db_type,
            scale_factor: u32::try_from(scale_factor).map_err(|_| ConnectionError::Corrupt {
                column: "scale_factor",
                value: scale_factor.to_string(),
            })?,
            status: status.parse()?,
            power_score,
            throughput_score,
            created_at: parse_timestamp("created_at", &created_at)?,
            completed_at: completed_at
                .map(|value| parse_timestamp("completed_at", &value))
                .transpose()?,
        })
    }
}

impl TryFrom<MetricColumns> for QueryMetric {
    type Error = ConnectionError;

    fn try_from(
        (metric_id, job_id, query_number, execution_time_seconds): MetricColumns,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            metric_id,
            job_id: parse_uuid(&job_id)?,
            query_number: u8::try_from(query_number).map_err(|_| ConnectionError::Corrupt {
                column: "query_number",
                value: query_number.to_string(),
            })?,
            execution_time_seconds,
        })
    }
}

/// Results store, one variant per supported backend
#[derive(Debug, Clone)]
pub enum StorageAdapters {
    SQLite(sqlite::SharedConnection),
    #[cfg(feature = "duckdb")]
    DuckDB(self::duckdb::SharedConnection),
}

macro_rules! dispatch {
    ($self:ident, $connection:ident => $call:expr) => {
        match $self {
            StorageAdapters::SQLite($connection) => $call,
            #[cfg(feature = "duckdb")]
            StorageAdapters::DuckDB($connection) => $call,
        }
    };
}

impl StorageAdapters {
    pub fn load(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        match config {
            ConnectionConfig::SQLite { .. } => {
                Ok(Self::SQLite(sqlite::SharedConnection::load(config)?))
            }
            #[cfg(feature = "duckdb")]
            ConnectionConfig::DuckDB { .. } => {
                Ok(Self::DuckDB(self::duckdb::SharedConnection::load(config)?))
            }
            #[cfg(not(feature = "duckdb"))]
            ConnectionConfig::DuckDB { .. } => Err(ConnectionError::Unsupported("DuckDB")),
        }
    }

    /// apply the results schema, existing tables are kept
    pub fn init(&self) -> Result<(), ConnectionError> {
        dispatch!(self, connection => connection.init())
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        dispatch!(self, connection => connection.close())
    }

    pub fn create_run(&self, run: &BenchmarkRun) -> Result<(), ConnectionError> {
        dispatch!(self, connection => connection.create_run(run))
    }

    /// apply `transition` and return the updated run
    pub fn transition(
        &self,
        job_id: Uuid,
        transition: Transition,
    ) -> Result<BenchmarkRun, ConnectionError> {
        dispatch!(self, connection => connection.transition(job_id, transition))
    }

    pub fn store_metric(
        &self,
        job_id: Uuid,
        query_number: u8,
        execution_time_seconds: f64,
    ) -> Result<i64, ConnectionError> {
        dispatch!(self, connection => connection.store_metric(job_id, query_number, execution_time_seconds))
    }

    pub fn run(&self, job_id: Uuid) -> Result<Option<BenchmarkRun>, ConnectionError> {
        dispatch!(self, connection => connection.run(job_id))
    }

    pub fn metrics(&self, job_id: Uuid) -> Result<Vec<QueryMetric>, ConnectionError> {
        dispatch!(self, connection => connection.metrics(job_id))
    }

    pub fn runs(&self) -> Result<Vec<BenchmarkRun>, ConnectionError> {
        dispatch!(self, connection => connection.runs())
    }
}

#[cfg(test)]
mod database_test;
