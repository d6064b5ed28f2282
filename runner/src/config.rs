use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tpcbench_catalog::TableMap;
use tpcbench_datagen::DEFAULT_SEED;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config failed the preflight checks")]
    Preflight,
    #[error("Scale factor must be positive")]
    ZeroScaleFactor,
    #[error("Database type tag must not be empty")]
    EmptyDbType,
    #[error("Unsupported results database url '{0}'")]
    UnsupportedUrl(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ConnectionConfig {
    SQLite { path: PathBuf },
    DuckDB { path: PathBuf },
}

impl ConnectionConfig {
    /// tag of the backend, used as default database type of a run
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SQLite { .. } => "sqlite",
            Self::DuckDB { .. } => "duckdb",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::SQLite { path } | Self::DuckDB { path } => path,
        }
    }

    /// parse `sqlite:///path`, `duckdb:///path` or a plain path, which keeps the backend of `self`
    pub fn with_url(&self, url: &str) -> Result<Self, ConfigErrors> {
        match url.split_once("://") {
            Some(("sqlite", path)) => Ok(Self::SQLite {
                path: url_path(path),
            }),
            Some(("duckdb", path)) => Ok(Self::DuckDB {
                path: url_path(path),
            }),
            Some(_) => Err(ConfigErrors::UnsupportedUrl(url.to_owned())),
            None => Ok(match self {
                Self::SQLite { .. } => Self::SQLite { path: url.into() },
                Self::DuckDB { .. } => Self::DuckDB { path: url.into() },
            }),
        }
    }
}

// `sqlite:///relative.db` and `sqlite:////absolute.db`
fn url_path(path: &str) -> PathBuf {
    PathBuf::from(path.strip_prefix('/').unwrap_or(path))
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    /// database under test
    pub target: ConnectionConfig,

    /// store for runs and their metrics
    #[serde(alias = "db", default = "default_database")]
    pub database: ConnectionConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub tables: TableMap,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    // tag stored with every run, defaults to the type of the target
    pub db_type: Option<String>,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: u32,
    // seconds a single query may take before the run fails
    pub query_timeout: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            db_type: None,
            scale_factor: default_scale_factor(),
            query_timeout: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    // worker threads for data generation, defaults to the number of cpus
    pub threads: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_true")]
    pub create_tables: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            threads: None,
            batch_size: default_batch_size(),
            create_tables: true,
        }
    }
}

impl LoadConfig {
    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl BenchmarkConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// point the results store somewhere else, e.g. from `RESULTS_DB_URL`
    pub fn override_results_db(&mut self, url: &str) -> Result<(), ConfigErrors> {
        self.database = self.database.with_url(url)?;

        Ok(())
    }

    pub fn db_type(&self) -> String {
        self.run
            .db_type
            .clone()
            .unwrap_or_else(|| self.target.kind().to_owned())
    }

    /// scale factor recorded for a run, `requested` overrides the configured one
    pub fn run_scale_factor(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(scale_factor) if scale_factor != self.run.scale_factor => {
                warn!(
                    scale_factor = scale_factor,
                    loaded = self.run.scale_factor,
                    "Recording a scale factor that differs from the one the dataset is generated with"
                );

                scale_factor
            }
            _ => self.run.scale_factor,
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.run
            .query_timeout
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn preflight_checks(&mut self) -> bool {
        // report every problem at once instead of failing on the first one
        let mut contains_error = false;

        if self.run.scale_factor == 0 {
            error!("run.scale_factor must be a positive integer");
            contains_error = true;
        }

        if let Some(db_type) = self.run.db_type.as_mut() {
            *db_type = db_type.trim().to_owned();

            if db_type.is_empty() {
                error!("run.db_type must not be empty, omit it to use the target type");
                contains_error = true;
            }
        }

        if let Some(timeout) = self.run.query_timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                error!("run.query_timeout ({timeout}) must be a positive number of seconds");
                contains_error = true;
            }
        }

        if self.load.batch_size == 0 {
            error!("load.batch_size must be positive");
            contains_error = true;
        }

        if self.load.threads == Some(0) {
            warn!("load.threads is 0, falling back to the number of cpus");
            self.load.threads = None;
        }

        for name in self.tables.invalid_names() {
            error!("tables: '{name}' is not a valid table name");
            contains_error = true;
        }

        for (section, connection) in [("target", &self.target), ("database", &self.database)] {
            if connection.path().as_os_str().is_empty() {
                error!("{section}.path must not be empty");
                contains_error = true;
            }

            if matches!(connection, ConnectionConfig::DuckDB { .. }) && !cfg!(feature = "duckdb") {
                error!("{section}.type is duckdb, but DuckDB support was not compiled in");
                contains_error = true;
            }
        }

        if self.target == self.database {
            warn!(
                "target and database both point to {}, results will be stored next to the benchmark tables",
                self.target.path().to_string_lossy()
            );
        }

        contains_error
    }
}

fn default_database() -> ConnectionConfig {
    ConnectionConfig::SQLite {
        path: PathBuf::from("tpcbench.db"),
    }
}

fn default_scale_factor() -> u32 {
    1
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_batch_size() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpcbench_catalog::Entity;

    const FULL: &str = "
target:
  type: duckdb
  path: tpch.duckdb
db:
  type: sqlite
  path: results.db
run:
  db_type: duckdb-0.7
  scale_factor: 10
  query_timeout: 2.5
load:
  seed: 7
  threads: 4
  batch_size: 500
  create_tables: false
tables:
  schema: tpch
  names:
    lineitem: lineitem_sf10
";

    #[test]
    fn full_config_parses() {
        let config = BenchmarkConfig::parse(FULL).unwrap();

        assert_eq!(
            config.target,
            ConnectionConfig::DuckDB {
                path: "tpch.duckdb".into()
            }
        );
        assert_eq!(config.database.kind(), "sqlite");
        assert_eq!(config.db_type(), "duckdb-0.7");
        assert_eq!(config.run.scale_factor, 10);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.load.threads(), 4);
        assert!(!config.load.create_tables);
        assert_eq!(config.tables.physical(Entity::LineItem), "lineitem_sf10");
        assert_eq!(config.tables.physical(Entity::Orders), "tpch.orders");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = BenchmarkConfig::parse("target: { type: sqlite, path: tpch.db }").unwrap();

        assert_eq!(config.database, default_database());
        assert_eq!(config.db_type(), "sqlite");
        assert_eq!(config.run, RunConfig::default());
        assert_eq!(config.load, LoadConfig::default());
        assert_eq!(config.load.seed, 42);
        assert_eq!(config.load.batch_size, 10_000);
        assert_eq!(config.query_timeout(), None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(BenchmarkConfig::parse("target: { type: sqlite, path: a.db, user: x }").is_err());
        assert!(BenchmarkConfig::parse("target: { type: postgres, path: a.db }").is_err());
        assert!(BenchmarkConfig::parse(
            "target: { type: sqlite, path: a.db }\nrun: { scale: 1 }"
        )
        .is_err());
    }

    #[test]
    fn preflight_reports_invalid_values() {
        let mut config = BenchmarkConfig::parse(
            "target: { type: sqlite, path: a.db }\nrun: { scale_factor: 0 }",
        )
        .unwrap();
        assert!(config.preflight_checks());

        let mut config = BenchmarkConfig::parse(
            "target: { type: sqlite, path: a.db }\nrun: { db_type: '  ', query_timeout: -1 }",
        )
        .unwrap();
        assert!(config.preflight_checks());

        let mut config = BenchmarkConfig::parse(
            "target: { type: sqlite, path: a.db }\ntables: { names: { part: 'part; drop' } }",
        )
        .unwrap();
        assert!(config.preflight_checks());
    }

    #[test]
    fn preflight_accepts_valid_config() {
        let mut config = BenchmarkConfig::parse(
            "target: { type: sqlite, path: a.db }\nrun: { db_type: ' sqlite ' }\nload: { threads: 0 }",
        )
        .unwrap();

        assert!(!config.preflight_checks());
        assert_eq!(config.db_type(), "sqlite");
        assert_eq!(config.load.threads, None);
    }

    #[test]
    fn results_db_url_overrides_database() {
        let mut config = BenchmarkConfig::parse("target: { type: sqlite, path: a.db }").unwrap();

        config.override_results_db("sqlite:///runs.db").unwrap();
        assert_eq!(config.database, ConnectionConfig::SQLite { path: "runs.db".into() });

        config.override_results_db("duckdb:////tmp/runs.duckdb").unwrap();
        assert_eq!(
            config.database,
            ConnectionConfig::DuckDB {
                path: "/tmp/runs.duckdb".into()
            }
        );

        config.override_results_db("other.duckdb").unwrap();
        assert_eq!(config.database.kind(), "duckdb");
        assert_eq!(config.database.path(), Path::new("other.duckdb"));

        assert!(matches!(
            config.override_results_db("postgresql://localhost/results"),
            Err(ConfigErrors::UnsupportedUrl(_))
        ));
    }

    #[test]
    fn run_scale_factor_defaults_to_the_loaded_one() {
        let config =
            BenchmarkConfig::parse("target: { type: sqlite, path: a.db }\nrun: { scale_factor: 10 }")
                .unwrap();

        assert_eq!(config.run_scale_factor(None), 10);
        assert_eq!(config.run_scale_factor(Some(10)), 10);
        assert_eq!(config.run_scale_factor(Some(3)), 3);
    }

    #[test]
    fn shipped_config_passes_preflight() {
        let mut config = BenchmarkConfig::parse(include_str!("../../tpcbench.yaml")).unwrap();

        // fails when DuckDB support is not compiled in
        assert!(!config.preflight_checks());
        assert_eq!(config.target.kind(), "duckdb");
        assert_eq!(config.database.path(), Path::new("tpcbench.db"));
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(600)));
    }
}
