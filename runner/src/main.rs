use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;
use tpcbench_catalog::{Entity, ResolveError, TableMap, CATALOG};
use tpcbench_datagen::DataGenerator;
use tpcbench_runner::{
    config::{BenchmarkConfig, ConfigErrors},
    database::{BenchmarkRun, ConnectionError, QueryMetric, StorageAdapters},
    loader::{self, LoadError},
    orchestrator::{Orchestrator, OrchestratorError},
    target::{Target, TargetError, Targets},
};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "TPC-H benchmark execution and scoring")]
struct Cli {
    /// Benchmark configuration
    #[arg(short, long, default_value = "tpcbench.yaml")]
    config: PathBuf,
    /// Results store, `sqlite:///path`, `duckdb:///path` or a plain path
    #[arg(long, env = "RESULTS_DB_URL")]
    results_db: Option<String>,
    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the results schema and the benchmark tables
    Init,
    /// Generate and load the dataset into the target
    Load,
    /// Execute the query suite and score it
    Run {
        /// Database type recorded for the run, defaults to the target type
        #[arg(long)]
        db_type: Option<String>,
        #[arg(long)]
        scale_factor: Option<u32>,
    },
    /// Print a run and its metrics
    Show { run_id: Uuid },
    /// List all runs
    List,
    /// Mark a pending or running run as failed
    Abort { run_id: Uuid },
    /// List the benchmark queries
    Queries {
        /// Print the SQL sent to the target
        #[arg(long)]
        sql: bool,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Storage(#[from] ConnectionError),
    #[error("Target failed: {0}")]
    Target(#[from] TargetError),
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Failed to render output: {0}")]
    Render(#[from] serde_yaml::Error),
}

#[derive(Serialize)]
struct RunReport {
    #[serde(flatten)]
    run: BenchmarkRun,
    metrics: Vec<QueryMetric>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let result = dispatch(cli);

    #[cfg(feature = "jaeger")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "{error}");

            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "jaeger")]
    {
        let telemetry = match opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name("tpcbench")
            .install_simple()
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(error) => {
                eprintln!("Failed to install jaeger exporter: {error}");
                None
            }
        };

        registry.with(telemetry).init();
    }

    #[cfg(not(feature = "jaeger"))]
    registry.init();
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    if let Command::Queries { sql } = cli.command {
        // the catalog is usable without a config, table names fall back to the defaults
        let tables = if cli.config.exists() {
            BenchmarkConfig::load(&cli.config)?.tables
        } else {
            TableMap::default()
        };

        return print_queries(&tables, sql);
    }

    let mut config = BenchmarkConfig::load(&cli.config)?;

    if let Some(url) = &cli.results_db {
        config.override_results_db(url)?;
    }

    if config.preflight_checks() {
        return Err(ConfigErrors::Preflight.into());
    }

    debug!(config = ?config, "Loaded config");

    let storage = StorageAdapters::load(&config.database)?;
    if let Err(error) = storage.init() {
        storage.close()?;

        return Err(error.into());
    }

    let orchestrator = Orchestrator::new(storage, config.tables.clone())
        .with_query_timeout(config.query_timeout());

    let result = execute(cli.command, &config, &orchestrator);
    let closed = orchestrator.into_storage().close();

    result?;
    closed?;

    Ok(())
}

fn execute(
    command: Command,
    config: &BenchmarkConfig,
    orchestrator: &Orchestrator,
) -> Result<(), CliError> {
    match command {
        Command::Init => with_target(config, |target| {
            for entity in Entity::ALL {
                target.create_table(entity.table(), &config.tables)?;
            }

            info!("Created {} benchmark tables", Entity::ALL.len());

            Ok(())
        }),
        Command::Load => with_target(config, |target| {
            let generator = DataGenerator::new(config.run.scale_factor, config.load.seed);
            let summary = loader::load(target, &config.tables, &generator, &config.load)?;

            for (entity, rows) in &summary.rows {
                println!("{:<10} {rows:>12}", config.tables.physical(*entity));
            }
            println!(
                "Loaded {} rows in {:.3}s",
                summary.total(),
                summary.elapsed.as_secs_f64()
            );

            Ok(())
        }),
        Command::Run {
            db_type,
            scale_factor,
        } => with_target(config, |target| {
            let db_type = db_type.unwrap_or_else(|| config.db_type());
            let run_id = orchestrator.start_run(&db_type, config.run_scale_factor(scale_factor))?;

            println!("Run {run_id}");

            let result = orchestrator.execute(run_id, target);
            let run = report_run(orchestrator, run_id, result)?;
            println!(
                "Power score:      {:.6}\nThroughput score: {:.6}",
                run.power_score.unwrap_or_default(),
                run.throughput_score.unwrap_or_default()
            );

            Ok(())
        }),
        Command::Show { run_id } => {
            let report = RunReport {
                run: orchestrator.run(run_id)?,
                metrics: orchestrator.metrics(run_id)?,
            };

            print!("{}", serde_yaml::to_string(&report)?);

            Ok(())
        }
        Command::List => {
            for run in orchestrator.runs()? {
                println!(
                    "{} {:<9} {:<10} sf={:<5} power={:<12} throughput={:<12} {}",
                    run.job_id,
                    run.status,
                    run.db_type,
                    run.scale_factor,
                    format_score(run.power_score),
                    format_score(run.throughput_score),
                    run.created_at.to_rfc3339()
                );
            }

            Ok(())
        }
        Command::Abort { run_id } => {
            let run = orchestrator.abort(run_id)?;

            println!("Run {} is {}", run.job_id, run.status);

            Ok(())
        }
        Command::Queries { sql } => print_queries(&config.tables, sql),
    }
}

/// Open the target, hand it to `action` and close it whatever `action` returned
fn with_target(
    config: &BenchmarkConfig,
    action: impl FnOnce(&mut Targets) -> Result<(), CliError>,
) -> Result<(), CliError> {
    let mut target = Targets::open(&config.target)?;

    let result = action(&mut target);
    let closed = target.close();

    result?;
    closed?;

    Ok(())
}

/// Print the metrics of a finished run, the outcome of the run itself is returned unchanged
fn report_run(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    result: Result<BenchmarkRun, OrchestratorError>,
) -> Result<BenchmarkRun, OrchestratorError> {
    match orchestrator.metrics(run_id) {
        Ok(metrics) => print_metrics(&metrics),
        Err(error) => error!(run = %run_id, error = ?error, "Failed to read metrics: {error}"),
    }

    result
}

fn print_metrics(metrics: &[QueryMetric]) {
    for metric in metrics {
        println!(
            "Q{:<2} {:>12.6}s",
            metric.query_number, metric.execution_time_seconds
        );
    }
}

fn print_queries(tables: &TableMap, sql: bool) -> Result<(), CliError> {
    for query in &CATALOG {
        println!("Q{:<2} {}", query.number, query.name);

        if sql {
            println!("{}\n", query.sql(tables)?.trim());
        }
    }

    Ok(())
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_owned(), |score| format!("{score:.6}"))
}
