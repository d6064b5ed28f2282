use super::{BenchmarkRun, ConnectionError, RunStatus, StorageAdapters, Transition};
use crate::config::ConnectionConfig;
use chrono::Utc;
use uuid::Uuid;

fn complete() -> Transition {
    Transition::Complete {
        power_score: 1.5,
        throughput_score: 22.0,
        completed_at: Utc::now(),
    }
}

fn fail() -> Transition {
    Transition::Fail {
        completed_at: Utc::now(),
    }
}

// Every adapter has to behave the same, the lifecycle tests run once per backend.
macro_rules! store_tests {
    ($module:ident, $config:ident, $in_memory:expr) => {
        mod $module {
            use super::*;

            fn store() -> StorageAdapters {
                let store = $in_memory;
                store.init().unwrap();
                store
            }

            #[test]
            fn schema_can_be_applied_twice() {
                let store = store();

                store.init().unwrap();
            }

            #[test]
            fn created_run_reads_back_pending() {
                let store = store();
                let run = BenchmarkRun::new("duckdb", 3);
                store.create_run(&run).unwrap();

                let stored = store.run(run.job_id).unwrap().unwrap();

                assert_eq!(stored.job_id, run.job_id);
                assert_eq!(stored.db_type, "duckdb");
                assert_eq!(stored.scale_factor, 3);
                assert_eq!(stored.status, RunStatus::Pending);
                assert_eq!(stored.power_score, None);
                assert_eq!(stored.completed_at, None);
                // stored with microsecond precision
                assert!((stored.created_at - run.created_at).num_milliseconds().abs() < 1);
                assert_eq!(store.run(Uuid::new_v4()).unwrap(), None);
            }

            #[test]
            fn lifecycle_sets_scores_and_completion() {
                let store = store();
                let run = BenchmarkRun::new("sqlite", 1);
                store.create_run(&run).unwrap();

                let running = store.transition(run.job_id, Transition::Start).unwrap();
                assert_eq!(running.status, RunStatus::Running);
                assert_eq!(running.completed_at, None);

                let completed = store.transition(run.job_id, complete()).unwrap();
                assert_eq!(completed.status, RunStatus::Completed);
                assert_eq!(completed.power_score, Some(1.5));
                assert_eq!(completed.throughput_score, Some(22.0));
                assert!(completed.completed_at.is_some());
                assert_eq!(store.runs().unwrap(), vec![completed]);
            }

            #[test]
            fn transitions_keep_metrics_of_the_run() {
                let store = store();
                let run = BenchmarkRun::new("duckdb", 1);
                store.create_run(&run).unwrap();
                store.transition(run.job_id, Transition::Start).unwrap();
                store.store_metric(run.job_id, 1, 0.5).unwrap();
                store.store_metric(run.job_id, 2, 0.75).unwrap();

                store.transition(run.job_id, fail()).unwrap();

                assert_eq!(store.metrics(run.job_id).unwrap().len(), 2);
                assert_eq!(store.runs().unwrap().len(), 1);
            }

            #[test]
            fn terminal_state_is_written_once() {
                let store = store();
                let run = BenchmarkRun::new("sqlite", 1);
                store.create_run(&run).unwrap();
                store.transition(run.job_id, Transition::Start).unwrap();
                let failed = store.transition(run.job_id, fail()).unwrap();

                assert!(matches!(
                    store.transition(run.job_id, complete()),
                    Err(ConnectionError::InvalidTransition {
                        from: RunStatus::Failed,
                        to: RunStatus::Completed,
                        ..
                    })
                ));
                assert!(matches!(
                    store.transition(run.job_id, fail()),
                    Err(ConnectionError::InvalidTransition { .. })
                ));

                assert_eq!(store.run(run.job_id).unwrap().unwrap(), failed);
            }

            #[test]
            fn pending_runs_cannot_complete() {
                let store = store();
                let run = BenchmarkRun::new("sqlite", 1);
                store.create_run(&run).unwrap();

                assert!(matches!(
                    store.transition(run.job_id, complete()),
                    Err(ConnectionError::InvalidTransition {
                        from: RunStatus::Pending,
                        ..
                    })
                ));

                let failed = store.transition(run.job_id, fail()).unwrap();
                assert_eq!(failed.status, RunStatus::Failed);
                assert!(failed.completed_at.is_some());
                assert_eq!(failed.power_score, None);
            }

            #[test]
            fn unknown_runs_are_reported() {
                let store = store();
                let missing = Uuid::new_v4();

                assert!(matches!(
                    store.transition(missing, Transition::Start),
                    Err(ConnectionError::UnknownRun(id)) if id == missing
                ));
            }

            #[test]
            fn metrics_belong_to_their_run() {
                let store = store();
                let first = BenchmarkRun::new("sqlite", 1);
                let second = BenchmarkRun::new("sqlite", 1);
                store.create_run(&first).unwrap();
                store.create_run(&second).unwrap();

                let ids = [2, 1, 3]
                    .into_iter()
                    .map(|number| store.store_metric(first.job_id, number, 0.5).unwrap())
                    .collect::<Vec<_>>();
                store.store_metric(second.job_id, 1, 0.25).unwrap();

                assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

                let metrics = store.metrics(first.job_id).unwrap();
                assert_eq!(
                    metrics.iter().map(|metric| metric.query_number).collect::<Vec<_>>(),
                    vec![1, 2, 3]
                );
                assert!(metrics.iter().all(|metric| metric.job_id == first.job_id));
                assert_eq!(store.metrics(second.job_id).unwrap().len(), 1);
            }

            #[test]
            fn metrics_are_unique_per_query() {
                let store = store();
                let run = BenchmarkRun::new("sqlite", 1);
                store.create_run(&run).unwrap();
                store.store_metric(run.job_id, 7, 0.5).unwrap();

                assert!(store.store_metric(run.job_id, 7, 0.6).is_err());
                assert!(store.store_metric(run.job_id, 23, 0.6).is_err());
                assert_eq!(store.metrics(run.job_id).unwrap().len(), 1);
            }

            #[test]
            fn runs_are_listed_in_creation_order() {
                let store = store();
                let ids = (0..3)
                    .map(|_| {
                        let run = BenchmarkRun::new("sqlite", 1);
                        store.create_run(&run).unwrap();
                        run.job_id
                    })
                    .collect::<Vec<_>>();

                let listed = store
                    .runs()
                    .unwrap()
                    .into_iter()
                    .map(|run| run.job_id)
                    .collect::<Vec<_>>();

                let mut expected = ids.clone();
                // creation timestamps may collide, ties are ordered by id
                expected.sort_by_key(|id| {
                    let run = store.run(*id).unwrap().unwrap();
                    (run.created_at, id.to_string())
                });

                assert_eq!(listed, expected);
            }

            #[test]
            fn runs_survive_reopening() {
                let directory = tempfile::tempdir().unwrap();
                let config = ConnectionConfig::$config {
                    path: directory.path().join("results.db"),
                };

                let store = StorageAdapters::load(&config).unwrap();
                store.init().unwrap();
                let run = BenchmarkRun::new("sqlite", 2);
                store.create_run(&run).unwrap();
                store.transition(run.job_id, Transition::Start).unwrap();
                store.store_metric(run.job_id, 1, 0.125).unwrap();
                store.close().unwrap();

                let store = StorageAdapters::load(&config).unwrap();
                store.init().unwrap();

                assert_eq!(
                    store.run(run.job_id).unwrap().map(|run| run.status),
                    Some(RunStatus::Running)
                );
                assert_eq!(store.metrics(run.job_id).unwrap()[0].execution_time_seconds, 0.125);
                store.close().unwrap();
            }
        }
    };
}

store_tests!(
    sqlite_store,
    SQLite,
    StorageAdapters::SQLite(crate::database::sqlite::SharedConnection::in_memory().unwrap())
);

#[cfg(feature = "duckdb")]
store_tests!(
    duckdb_store,
    DuckDB,
    StorageAdapters::DuckDB(crate::database::duckdb::SharedConnection::in_memory().unwrap())
);

#[test]
fn sqlite_metrics_reference_an_existing_run() {
    let store =
        StorageAdapters::SQLite(crate::database::sqlite::SharedConnection::in_memory().unwrap());
    store.init().unwrap();

    assert!(matches!(
        store.store_metric(Uuid::new_v4(), 1, 0.6),
        Err(ConnectionError::SQLite(_))
    ));
}
