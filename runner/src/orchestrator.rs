//! Runs the query suite against a target and scores it
//!
//! A run moves `pending -> running -> completed | failed`. Every transition is a conditional
//! update in the results store, a run that reached a terminal state is never written again.

use crate::{
    config::ConfigErrors,
    database::{BenchmarkRun, ConnectionError, QueryMetric, StorageAdapters, Transition},
    scoring::{compute_power_score, compute_throughput_score, ScoreError},
    target::{Interrupter, Target, TargetError},
};
use chrono::Utc;
use std::{
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tpcbench_catalog::{Query, ResolveError, TableMap, CATALOG};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid run configuration: {0}")]
    Configuration(#[from] ConfigErrors),
    #[error("Query {query} could not be resolved: {source}")]
    Resolve {
        query: u8,
        #[source]
        source: ResolveError,
    },
    #[error("Query {query} failed: {source}")]
    QueryExecution {
        query: u8,
        #[source]
        source: TargetError,
    },
    #[error("Query {query} exceeded its timeout of {timeout:?} ({elapsed:?})")]
    QueryTimeout {
        query: u8,
        timeout: Duration,
        elapsed: Duration,
    },
    #[error("Failed to compute scores: {0}")]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Storage(#[from] ConnectionError),
}

#[derive(Debug)]
pub struct Orchestrator {
    storage: StorageAdapters,
    tables: TableMap,
    query_timeout: Option<Duration>,
    queries: &'static [Query],
}

impl Orchestrator {
    pub fn new(storage: StorageAdapters, tables: TableMap) -> Self {
        Self {
            storage,
            tables,
            query_timeout: None,
            queries: &CATALOG,
        }
    }

    /// fail any query running longer than `timeout`
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn storage(&self) -> &StorageAdapters {
        &self.storage
    }

    pub fn into_storage(self) -> StorageAdapters {
        self.storage
    }

    /// Create a pending run. The target is not touched.
    pub fn start_run(&self, db_type: &str, scale_factor: u32) -> Result<Uuid, OrchestratorError> {
        if scale_factor == 0 {
            return Err(ConfigErrors::ZeroScaleFactor.into());
        }
        if db_type.trim().is_empty() {
            return Err(ConfigErrors::EmptyDbType.into());
        }

        let run = BenchmarkRun::new(db_type.trim(), scale_factor);
        self.storage.create_run(&run)?;

        Ok(run.job_id)
    }

    /// Execute every query of the suite in order and complete the run with its scores.
    ///
    /// The first failing or timed out query fails the run, metrics of the queries before it are
    /// kept. A run left in any other way than completing, including a panic of the target, is
    /// marked as failed.
    #[instrument(skip_all, level = "info", fields(run = %run_id))]
    pub fn execute<T: Target + ?Sized>(
        &self,
        run_id: Uuid,
        target: &mut T,
    ) -> Result<BenchmarkRun, OrchestratorError> {
        let run = self.storage.transition(run_id, Transition::Start)?;
        let started = Instant::now();
        let guard = RunGuard::new(&self.storage, run_id);

        info!(db_type = %run.db_type, target = target.db_type(), "Started run");

        let watchdog = match (self.query_timeout, target.interrupter()) {
            (Some(_), Some(interrupter)) => Some(Watchdog::spawn(interrupter)),
            _ => None,
        };

        let mut timings = Vec::with_capacity(self.queries.len());

        for query in self.queries {
            let sql = query
                .sql(&self.tables)
                .map_err(|source| OrchestratorError::Resolve {
                    query: query.number,
                    source,
                })?;

            debug!(query = query.number, name = query.name, "Executing query");

            let start = Instant::now();
            if let (Some(watchdog), Some(timeout)) = (&watchdog, self.query_timeout) {
                watchdog.arm(start + timeout);
            }
            let result = target.execute(&sql);
            let elapsed = start.elapsed();
            if let Some(watchdog) = &watchdog {
                watchdog.disarm();
            }

            let timed_out = self.query_timeout.filter(|timeout| elapsed > *timeout);

            match (result, timed_out) {
                (_, Some(timeout)) => {
                    error!(query = query.number, elapsed = ?elapsed, "Query exceeded its timeout of {timeout:?}");

                    return Err(OrchestratorError::QueryTimeout {
                        query: query.number,
                        timeout,
                        elapsed,
                    });
                }
                (Err(source), None) => {
                    error!(query = query.number, error = %source, "Query failed");

                    return Err(OrchestratorError::QueryExecution {
                        query: query.number,
                        source,
                    });
                }
                (Ok(table), None) => {
                    let seconds = elapsed.as_secs_f64();

                    self.storage.store_metric(run_id, query.number, seconds)?;
                    timings.push(seconds);

                    debug!(query = query.number, rows = table.len(), seconds = seconds, "Finished query");
                }
            }
        }

        drop(watchdog);

        let total = started.elapsed().as_secs_f64();
        let power_score = compute_power_score(&timings)?;
        let throughput_score = compute_throughput_score(total, run.scale_factor, timings.len())?;

        let run = self.storage.transition(
            run_id,
            Transition::Complete {
                power_score,
                throughput_score,
                completed_at: Utc::now(),
            },
        )?;
        guard.disarm();

        info!(
            power_score = power_score,
            throughput_score = throughput_score,
            "Completed run in {total:.3}s"
        );

        Ok(run)
    }

    /// force a pending or running run into failed
    pub fn abort(&self, run_id: Uuid) -> Result<BenchmarkRun, OrchestratorError> {
        let run = self.storage.transition(
            run_id,
            Transition::Fail {
                completed_at: Utc::now(),
            },
        )?;

        warn!(run = %run_id, "Aborted run");

        Ok(run)
    }

    pub fn run(&self, run_id: Uuid) -> Result<BenchmarkRun, OrchestratorError> {
        self.storage
            .run(run_id)?
            .ok_or(ConnectionError::UnknownRun(run_id).into())
    }

    pub fn metrics(&self, run_id: Uuid) -> Result<Vec<QueryMetric>, OrchestratorError> {
        // distinguish an unknown run from one without metrics
        self.run(run_id)?;

        Ok(self.storage.metrics(run_id)?)
    }

    pub fn runs(&self) -> Result<Vec<BenchmarkRun>, OrchestratorError> {
        Ok(self.storage.runs()?)
    }
}

/// Marks its run as failed when dropped while armed
struct RunGuard<'a> {
    storage: &'a StorageAdapters,
    run: Uuid,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(storage: &'a StorageAdapters, run: Uuid) -> Self {
        Self {
            storage,
            run,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match self.storage.transition(
            self.run,
            Transition::Fail {
                completed_at: Utc::now(),
            },
        ) {
            Ok(_) => warn!(run = %self.run, "Marked run as failed"),
            // aborted while running
            Err(ConnectionError::InvalidTransition { from, .. }) => {
                debug!(run = %self.run, status = %from, "Run already finished")
            }
            Err(error) => {
                error!(run = %self.run, error = ?error, "Failed to mark run as failed: {error}")
            }
        }
    }
}

enum Signal {
    Arm(Instant),
    Disarm,
}

/// Interrupts the target once an armed deadline passes
struct Watchdog {
    sender: Option<Sender<Signal>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn spawn(interrupt: Interrupter) -> Self {
        let (sender, receiver) = mpsc::channel();

        let handle = thread::spawn(move || {
            let mut deadline = None;

            loop {
                let signal = match deadline {
                    None => match receiver.recv() {
                        Ok(signal) => signal,
                        Err(_) => break,
                    },
                    Some(deadline_at) => {
                        match receiver.recv_timeout(deadline_at.saturating_duration_since(Instant::now())) {
                            Ok(signal) => signal,
                            Err(RecvTimeoutError::Timeout) => {
                                warn!("Query timeout reached, interrupting target");
                                interrupt();
                                deadline = None;
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                };

                deadline = match signal {
                    Signal::Arm(at) => Some(at),
                    Signal::Disarm => None,
                };
            }
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    fn arm(&self, deadline: Instant) {
        self.send(Signal::Arm(deadline));
    }

    fn disarm(&self) {
        self.send(Signal::Disarm);
    }

    fn send(&self, signal: Signal) {
        if let Some(sender) = &self.sender {
            if sender.send(signal).is_err() {
                warn!("Query watchdog stopped, timeouts are only checked after a query finished");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // closing the channel stops the thread
        drop(self.sender.take());

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Query watchdog panicked");
            }
        }
    }
}

#[cfg(test)]
mod orchestrator_test;
