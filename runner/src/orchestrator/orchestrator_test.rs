use super::{Orchestrator, OrchestratorError};
use crate::{
    config::ConfigErrors,
    database::{sqlite::SharedConnection, ConnectionError, RunStatus, StorageAdapters},
    scoring::compute_power_score,
    target::{sqlite::SQLiteTarget, Interrupter, Table, Target, TargetError},
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tpcbench_catalog::{Row, TableDef, TableMap, Value, QUERY_COUNT};
use uuid::Uuid;

/// In-process target that answers every query after a short pause
#[derive(Default)]
struct ScriptedTarget {
    executed: Vec<String>,
    fail_on: Option<u8>,
    panic_on: Option<u8>,
    // query number and how long it takes unless interrupted
    slow_on: Option<(u8, Duration)>,
    interruptible: bool,
    interrupted: Arc<AtomicBool>,
}

impl Target for ScriptedTarget {
    fn db_type(&self) -> &str {
        "scripted"
    }

    fn execute(&mut self, sql: &str) -> Result<Table, TargetError> {
        self.executed.push(sql.to_owned());
        let number = self.executed.len() as u8;

        if self.panic_on == Some(number) {
            panic!("target crashed on query {number}");
        }
        if self.fail_on == Some(number) {
            return Err(TargetError::Other(format!("query {number} failed")));
        }

        match self.slow_on {
            Some((slow, duration)) if slow == number => {
                let start = Instant::now();

                while start.elapsed() < duration {
                    if self.interrupted.load(Ordering::SeqCst) {
                        return Err(TargetError::Other("interrupted".to_owned()));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
            _ => thread::sleep(Duration::from_micros(50)),
        }

        Ok(Table {
            columns: vec!["value".to_owned()],
            rows: vec![vec![Value::Integer(i64::from(number))]],
        })
    }

    fn create_table(&mut self, _: &TableDef, _: &TableMap) -> Result<(), TargetError> {
        Ok(())
    }

    fn bulk_insert(&mut self, _: &TableDef, _: &TableMap, rows: &[Row]) -> Result<usize, TargetError> {
        Ok(rows.len())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        if !self.interruptible {
            return None;
        }

        let interrupted = self.interrupted.clone();

        Some(Box::new(move || interrupted.store(true, Ordering::SeqCst)))
    }
}

fn orchestrator() -> Orchestrator {
    let storage = StorageAdapters::SQLite(SharedConnection::in_memory().unwrap());
    storage.init().unwrap();

    Orchestrator::new(storage, TableMap::default())
}

#[test]
fn completed_run_has_all_metrics_and_scores() {
    let orchestrator = orchestrator();
    let mut target = ScriptedTarget::default();
    let id = orchestrator.start_run("scripted", 1).unwrap();

    assert_eq!(orchestrator.run(id).unwrap().status, RunStatus::Pending);

    let run = orchestrator.execute(id, &mut target).unwrap();
    let metrics = orchestrator.metrics(id).unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());
    assert_eq!(
        metrics.iter().map(|metric| metric.query_number).collect::<Vec<_>>(),
        (1..=QUERY_COUNT as u8).collect::<Vec<_>>()
    );
    assert!(metrics.iter().all(|metric| metric.execution_time_seconds > 0.0));

    let timings = metrics
        .iter()
        .map(|metric| metric.execution_time_seconds)
        .collect::<Vec<_>>();
    assert_eq!(run.power_score, Some(compute_power_score(&timings).unwrap()));

    // the suite spans at least the sum of its queries
    let total: f64 = timings.iter().sum();
    let throughput = run.throughput_score.unwrap();
    assert!(throughput > 0.0 && throughput <= QUERY_COUNT as f64 * 3600.0 / total);

    assert_eq!(orchestrator.run(id).unwrap(), run);
}

#[test]
fn queries_run_in_catalog_order_with_resolved_names() {
    let storage = StorageAdapters::SQLite(SharedConnection::in_memory().unwrap());
    storage.init().unwrap();
    let orchestrator = Orchestrator::new(storage, TableMap::default().with_schema("bench"));
    let mut target = ScriptedTarget::default();
    let id = orchestrator.start_run("scripted", 1).unwrap();

    orchestrator.execute(id, &mut target).unwrap();

    assert_eq!(target.executed.len(), QUERY_COUNT);
    assert!(target.executed[0].contains("bench.lineitem"));
    assert!(target.executed.iter().all(|sql| !sql.contains('{')));
    assert_eq!(
        target.executed[0],
        tpcbench_catalog::CATALOG[0]
            .sql(&TableMap::default().with_schema("bench"))
            .unwrap()
    );
}

#[test]
fn failing_query_fails_the_run_and_keeps_prior_metrics() {
    let orchestrator = orchestrator();
    let mut target = ScriptedTarget {
        fail_on: Some(13),
        ..ScriptedTarget::default()
    };
    let id = orchestrator.start_run("scripted", 1).unwrap();

    assert!(matches!(
        orchestrator.execute(id, &mut target),
        Err(OrchestratorError::QueryExecution { query: 13, .. })
    ));

    let run = orchestrator.run(id).unwrap();
    let metrics = orchestrator.metrics(id).unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.power_score, None);
    assert_eq!(run.throughput_score, None);
    assert!(run.completed_at.is_some());
    assert_eq!(
        metrics.iter().map(|metric| metric.query_number).collect::<Vec<_>>(),
        (1..=12).collect::<Vec<_>>()
    );
    // fail fast, nothing after the failing query runs
    assert_eq!(target.executed.len(), 13);
}

#[test]
fn timeout_interrupts_the_target() {
    let orchestrator = orchestrator().with_query_timeout(Some(Duration::from_millis(50)));
    let mut target = ScriptedTarget {
        slow_on: Some((3, Duration::from_secs(10))),
        interruptible: true,
        ..ScriptedTarget::default()
    };
    let id = orchestrator.start_run("scripted", 1).unwrap();
    let start = Instant::now();

    assert!(matches!(
        orchestrator.execute(id, &mut target),
        Err(OrchestratorError::QueryTimeout { query: 3, .. })
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(target.interrupted.load(Ordering::SeqCst));

    let run = orchestrator.run(id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(orchestrator.metrics(id).unwrap().len(), 2);
}

#[test]
fn timeout_is_checked_without_interrupt_support() {
    let orchestrator = orchestrator().with_query_timeout(Some(Duration::from_millis(20)));
    let mut target = ScriptedTarget {
        slow_on: Some((1, Duration::from_millis(60))),
        ..ScriptedTarget::default()
    };
    let id = orchestrator.start_run("scripted", 1).unwrap();

    assert!(matches!(
        orchestrator.execute(id, &mut target),
        Err(OrchestratorError::QueryTimeout { query: 1, elapsed, .. }) if elapsed >= Duration::from_millis(60)
    ));
    assert!(!target.interrupted.load(Ordering::SeqCst));
    assert_eq!(orchestrator.run(id).unwrap().status, RunStatus::Failed);
    assert!(orchestrator.metrics(id).unwrap().is_empty());
}

#[test]
fn generous_timeout_does_not_interfere() {
    let orchestrator = orchestrator().with_query_timeout(Some(Duration::from_secs(30)));
    let mut target = ScriptedTarget {
        interruptible: true,
        ..ScriptedTarget::default()
    };
    let id = orchestrator.start_run("scripted", 1).unwrap();

    assert_eq!(
        orchestrator.execute(id, &mut target).unwrap().status,
        RunStatus::Completed
    );
    assert!(!target.interrupted.load(Ordering::SeqCst));
}

#[test]
fn panicking_target_fails_the_run() {
    let orchestrator = orchestrator();
    let mut target = ScriptedTarget {
        panic_on: Some(5),
        ..ScriptedTarget::default()
    };
    let id = orchestrator.start_run("scripted", 1).unwrap();

    assert!(catch_unwind(AssertUnwindSafe(|| orchestrator.execute(id, &mut target))).is_err());

    assert_eq!(orchestrator.run(id).unwrap().status, RunStatus::Failed);
    assert_eq!(orchestrator.metrics(id).unwrap().len(), 4);
}

#[test]
fn aborted_run_cannot_be_executed() {
    let orchestrator = orchestrator();
    let mut target = ScriptedTarget::default();
    let id = orchestrator.start_run("scripted", 1).unwrap();

    let aborted = orchestrator.abort(id).unwrap();
    assert_eq!(aborted.status, RunStatus::Failed);

    assert!(matches!(
        orchestrator.execute(id, &mut target),
        Err(OrchestratorError::Storage(ConnectionError::InvalidTransition {
            from: RunStatus::Failed,
            to: RunStatus::Running,
            ..
        }))
    ));
    assert!(target.executed.is_empty());
    assert_eq!(orchestrator.run(id).unwrap(), aborted);
}

#[test]
fn terminal_state_is_final() {
    let orchestrator = orchestrator();
    let mut target = ScriptedTarget::default();
    let id = orchestrator.start_run("scripted", 2).unwrap();
    let completed = orchestrator.execute(id, &mut target).unwrap();

    assert!(matches!(
        orchestrator.abort(id),
        Err(OrchestratorError::Storage(ConnectionError::InvalidTransition {
            from: RunStatus::Completed,
            ..
        }))
    ));
    assert!(orchestrator.execute(id, &mut target).is_err());

    assert_eq!(orchestrator.run(id).unwrap(), completed);
    assert_eq!(orchestrator.metrics(id).unwrap().len(), QUERY_COUNT);
    assert_eq!(target.executed.len(), QUERY_COUNT);
}

#[test]
fn invalid_runs_are_not_created() {
    let orchestrator = orchestrator();

    assert!(matches!(
        orchestrator.start_run("sqlite", 0),
        Err(OrchestratorError::Configuration(ConfigErrors::ZeroScaleFactor))
    ));
    assert!(matches!(
        orchestrator.start_run("  ", 1),
        Err(OrchestratorError::Configuration(ConfigErrors::EmptyDbType))
    ));
    assert!(orchestrator.runs().unwrap().is_empty());
}

#[test]
fn unknown_runs_are_reported() {
    let orchestrator = orchestrator();
    let mut target = ScriptedTarget::default();
    let missing = Uuid::new_v4();

    for result in [
        orchestrator.run(missing).map(|_| ()),
        orchestrator.metrics(missing).map(|_| ()),
        orchestrator.execute(missing, &mut target).map(|_| ()),
    ] {
        assert!(matches!(
            result,
            Err(OrchestratorError::Storage(ConnectionError::UnknownRun(id))) if id == missing
        ));
    }
}

#[test]
fn runs_are_independent() {
    let orchestrator = orchestrator();
    let first = orchestrator.start_run("scripted", 1).unwrap();
    let second = orchestrator.start_run("other", 3).unwrap();

    orchestrator
        .execute(
            first,
            &mut ScriptedTarget {
                fail_on: Some(1),
                ..ScriptedTarget::default()
            },
        )
        .unwrap_err();
    orchestrator
        .execute(second, &mut ScriptedTarget::default())
        .unwrap();

    let runs = orchestrator.runs().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(orchestrator.run(first).unwrap().status, RunStatus::Failed);
    assert_eq!(orchestrator.run(second).unwrap().status, RunStatus::Completed);
    assert_eq!(orchestrator.run(second).unwrap().scale_factor, 3);
    assert!(orchestrator.metrics(first).unwrap().is_empty());
}

#[test]
fn unsupported_dialect_fails_on_first_query() {
    let orchestrator = orchestrator();
    let mut target = SQLiteTarget::in_memory().unwrap();
    let id = orchestrator.start_run(target.db_type(), 1).unwrap();

    assert!(matches!(
        orchestrator.execute(id, &mut target),
        Err(OrchestratorError::QueryExecution {
            query: 1,
            source: TargetError::SQLite(_)
        })
    ));
    assert_eq!(orchestrator.run(id).unwrap().status, RunStatus::Failed);
}

#[cfg(feature = "duckdb")]
#[test]
fn catalog_completes_on_duckdb() {
    use crate::{config::LoadConfig, loader, target::duckdb::DuckDBTarget};
    use tpcbench_datagen::{DataGenerator, RowCounts};

    let orchestrator = orchestrator();
    let mut target = DuckDBTarget::in_memory().unwrap();
    let generator = DataGenerator::with_counts(RowCounts::scaled(0.001), 42);
    let config = LoadConfig {
        threads: Some(2),
        batch_size: 1_000,
        ..LoadConfig::default()
    };

    let summary = loader::load(&mut target, &TableMap::default(), &generator, &config).unwrap();
    assert_eq!(summary.total(), generator.counts().total());

    let lineitems = Value::Integer(summary.rows[&tpcbench_catalog::Entity::LineItem] as i64);
    assert_eq!(
        target
            .execute(
                "select count(*) from lineitem
                 where l_commitdate - l_shipdate = 10 and l_receiptdate - l_shipdate = 20"
            )
            .unwrap()
            .rows,
        vec![vec![lineitems]]
    );

    let id = orchestrator.start_run(target.db_type(), 1).unwrap();
    let run = orchestrator.execute(id, &mut target).unwrap();
    let metrics = orchestrator.metrics(id).unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        metrics.iter().map(|metric| metric.query_number).collect::<Vec<_>>(),
        (1..=QUERY_COUNT as u8).collect::<Vec<_>>()
    );
    assert!(run.power_score.unwrap() > 0.0);
    assert!(run.throughput_score.unwrap() > 0.0);

    target.close().unwrap();
}
