use crate::{
    config::LoadConfig,
    target::{Target, TargetError},
};
use rayon::{prelude::*, ThreadPoolBuildError, ThreadPoolBuilder};
use std::{
    collections::BTreeMap,
    ops::Range,
    time::{Duration, Instant},
};
use thiserror::Error;
use tpcbench_catalog::{Entity, Row, TableMap};
use tpcbench_datagen::{DataGenerator, GenerationError};
use tracing::{debug, error, info, instrument};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Generated data is invalid: {0}")]
    Generation(#[from] GenerationError),
    #[error("Failed to write to the target: {0}")]
    Target(#[from] TargetError),
    #[error("Failed to start the generator pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows: BTreeMap<Entity, u64>,
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn total(&self) -> u64 {
        self.rows.values().sum()
    }
}

/// Generate the whole dataset and insert it into `target`, referenced tables first.
///
/// Partitions of `batch_size` rows are generated and validated in waves on a local worker pool,
/// one partition per worker, and inserted in row order on the calling thread.
#[instrument(skip_all, level = "info", fields(seed = generator.seed()))]
pub fn load<T: Target + ?Sized>(
    target: &mut T,
    tables: &TableMap,
    generator: &DataGenerator,
    config: &LoadConfig,
) -> Result<LoadSummary, LoadError> {
    let threads = config.threads();
    let start = Instant::now();

    debug!("Starting generator pool with {threads} threads");

    let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
    let mut summary = LoadSummary::default();

    if config.create_tables {
        for entity in Entity::ALL {
            target.create_table(entity.table(), tables)?;
        }

        info!("Created {} tables", Entity::ALL.len());
    }

    for entity in Entity::ALL {
        let total = generator.counts().rows(entity);
        let partitions = generator.partitions(entity, config.batch_size);
        let mut loaded = 0;

        for wave in partitions.chunks(threads) {
            let batches = pool.install(|| generate_wave(generator, entity, wave))?;

            for rows in batches {
                loaded += target.bulk_insert(entity.table(), tables, &rows)? as u64;
            }

            debug!(table = %entity, "Loaded {loaded}/{total} rows");
        }

        info!(table = %tables.physical(entity), rows = loaded, "Loaded table");
        summary.rows.insert(entity, loaded);
    }

    summary.elapsed = start.elapsed();

    info!(
        rows = summary.total(),
        "Loaded dataset in {:.3}s",
        summary.elapsed.as_secs_f64()
    );

    Ok(summary)
}

fn generate_wave(
    generator: &DataGenerator,
    entity: Entity,
    wave: &[Range<u64>],
) -> Result<Vec<Vec<Row>>, GenerationError> {
    wave.par_iter()
        .map(|range| generator.checked_partition(entity, range.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| {
            error!(error = %error, "Rejected generated row");
            error
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::sqlite::SQLiteTarget;
    use tpcbench_catalog::Value;
    use tpcbench_datagen::RowCounts;

    fn config(batch_size: u64) -> LoadConfig {
        LoadConfig {
            threads: Some(3),
            batch_size,
            ..LoadConfig::default()
        }
    }

    fn count(target: &mut SQLiteTarget, sql: &str) -> Value {
        target.execute(sql).unwrap().rows.remove(0).remove(0)
    }

    #[test]
    fn every_table_is_loaded_completely() {
        let mut target = SQLiteTarget::in_memory().unwrap();
        let generator = DataGenerator::with_counts(RowCounts::scaled(0.0002), 9);

        let summary = load(&mut target, &TableMap::default(), &generator, &config(17)).unwrap();

        for entity in Entity::ALL {
            let expected = generator.counts().rows(entity);

            assert_eq!(summary.rows[&entity], expected, "{entity}");
            assert_eq!(
                count(&mut target, &format!("select count(*) from {entity}")),
                Value::Integer(expected as i64)
            );
        }
        assert_eq!(summary.total(), generator.counts().total());
    }

    #[test]
    fn loaded_data_is_referentially_intact() {
        let mut target = SQLiteTarget::in_memory().unwrap();
        let generator = DataGenerator::with_counts(RowCounts::scaled(0.0002), 11);

        load(&mut target, &TableMap::default(), &generator, &config(50)).unwrap();

        assert_eq!(
            count(
                &mut target,
                "select count(*) from lineitem
                 left join orders on l_orderkey = o_orderkey
                 left join partsupp on l_partkey = ps_partkey
                 where o_orderkey is null or ps_partkey is null"
            ),
            Value::Integer(0)
        );
        assert_eq!(
            count(
                &mut target,
                "select count(*) from orders left join customer on o_custkey = c_custkey
                 where c_custkey is null"
            ),
            Value::Integer(0)
        );
    }

    #[test]
    fn batch_size_does_not_change_the_data() {
        let generator = DataGenerator::with_counts(RowCounts::scaled(0.0001), 5);
        let query = "select l_orderkey, l_linenumber, l_extendedprice, l_shipdate
                     from lineitem order by l_orderkey, l_linenumber";

        let mut small = SQLiteTarget::in_memory().unwrap();
        load(&mut small, &TableMap::default(), &generator, &config(7)).unwrap();
        let mut large = SQLiteTarget::in_memory().unwrap();
        load(&mut large, &TableMap::default(), &generator, &config(10_000)).unwrap();

        assert_eq!(small.execute(query).unwrap(), large.execute(query).unwrap());
    }

    #[test]
    fn existing_tables_are_required_without_create() {
        let mut target = SQLiteTarget::in_memory().unwrap();
        let generator = DataGenerator::with_counts(RowCounts::scaled(0.0001), 5);
        let config = LoadConfig {
            create_tables: false,
            ..config(100)
        };

        assert!(matches!(
            load(&mut target, &TableMap::default(), &generator, &config),
            Err(LoadError::Target(_))
        ));
    }
}
