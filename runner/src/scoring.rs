//! Composite scores of a benchmark run
//!
//! Both functions are pure, they only look at their arguments.

use thiserror::Error;
use tpcbench_catalog::QUERY_COUNT;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("expected {expected} query timings, got {actual}")]
    TimingCount { expected: usize, actual: usize },
    #[error("timing of query {query} must be a positive number of seconds, got {value}")]
    NonPositiveTiming { query: usize, value: f64 },
    #[error("total elapsed time must be a positive number of seconds, got {0}")]
    NonPositiveElapsed(f64),
    #[error("scale factor must be positive")]
    ZeroScaleFactor,
    #[error("query count must be positive")]
    ZeroQueryCount,
}

/// Geometric mean of the per-query execution times in seconds.
///
/// The mean is taken in log space over the sorted timings, the result does not depend on the
/// order the timings are passed in.
pub fn compute_power_score(timings: &[f64]) -> Result<f64, ScoreError> {
    if timings.len() != QUERY_COUNT {
        return Err(ScoreError::TimingCount {
            expected: QUERY_COUNT,
            actual: timings.len(),
        });
    }

    if let Some((index, value)) = timings
        .iter()
        .enumerate()
        .find(|(_, value)| !(value.is_finite() && **value > 0.0))
    {
        return Err(ScoreError::NonPositiveTiming {
            query: index + 1,
            value: *value,
        });
    }

    let mut sorted = timings.to_vec();
    sorted.sort_by(f64::total_cmp);

    let log_sum: f64 = sorted.iter().map(|value| value.ln()).sum();

    Ok((log_sum / sorted.len() as f64).exp())
}

/// Queries per hour over the wall-clock span of the whole suite.
///
/// The scale factor does not enter the formula, it is only checked for consistency with the run.
pub fn compute_throughput_score(
    total_elapsed_seconds: f64,
    scale_factor: u32,
    query_count: usize,
) -> Result<f64, ScoreError> {
    if !(total_elapsed_seconds.is_finite() && total_elapsed_seconds > 0.0) {
        return Err(ScoreError::NonPositiveElapsed(total_elapsed_seconds));
    }
    if scale_factor == 0 {
        return Err(ScoreError::ZeroScaleFactor);
    }
    if query_count == 0 {
        return Err(ScoreError::ZeroQueryCount);
    }

    Ok(query_count as f64 * 3600.0 / total_elapsed_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> Vec<f64> {
        (1..=QUERY_COUNT).map(|n| n as f64 * 0.137).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn constant_timings_are_their_own_mean() {
        for x in [1e-6, 0.25, 1.0, 3.5, 1e4] {
            let score = compute_power_score(&[x; QUERY_COUNT]).unwrap();

            assert!(close(score, x), "{score} != {x}");
        }
    }

    #[test]
    fn power_score_is_permutation_invariant() {
        let forward = timings();
        let mut backward = forward.clone();
        backward.reverse();
        let mut interleaved = forward.clone();
        interleaved.rotate_left(7);
        interleaved.swap(0, 13);

        let expected = compute_power_score(&forward).unwrap();

        assert_eq!(compute_power_score(&backward).unwrap(), expected);
        assert_eq!(compute_power_score(&interleaved).unwrap(), expected);
    }

    #[test]
    fn power_score_matches_product_definition() {
        let timings = timings();
        let product: f64 = timings.iter().product();
        let expected = product.powf(1.0 / QUERY_COUNT as f64);

        assert!(close(compute_power_score(&timings).unwrap(), expected));
    }

    #[test]
    fn power_score_rejects_malformed_timings() {
        assert_eq!(
            compute_power_score(&timings()[..21]),
            Err(ScoreError::TimingCount {
                expected: 22,
                actual: 21
            })
        );

        let mut zero = timings();
        zero[4] = 0.0;
        assert_eq!(
            compute_power_score(&zero),
            Err(ScoreError::NonPositiveTiming {
                query: 5,
                value: 0.0
            })
        );

        let mut negative = timings();
        negative[21] = -1.0;
        assert!(matches!(
            compute_power_score(&negative),
            Err(ScoreError::NonPositiveTiming { query: 22, .. })
        ));

        let mut nan = timings();
        nan[0] = f64::NAN;
        assert!(compute_power_score(&nan).is_err());
    }

    #[test]
    fn one_hour_for_the_suite_is_22_per_hour() {
        assert_eq!(compute_throughput_score(3600.0, 1, 22), Ok(22.0));
        assert_eq!(compute_throughput_score(3600.0, 100, 22), Ok(22.0));
        assert_eq!(compute_throughput_score(1800.0, 1, 22), Ok(44.0));
    }

    #[test]
    fn throughput_rejects_degenerate_input() {
        assert_eq!(
            compute_throughput_score(0.0, 1, 22),
            Err(ScoreError::NonPositiveElapsed(0.0))
        );
        assert!(compute_throughput_score(-3.0, 1, 22).is_err());
        assert!(compute_throughput_score(f64::INFINITY, 1, 22).is_err());
        assert_eq!(
            compute_throughput_score(10.0, 0, 22),
            Err(ScoreError::ZeroScaleFactor)
        );
        assert_eq!(
            compute_throughput_score(10.0, 1, 0),
            Err(ScoreError::ZeroQueryCount)
        );
    }

    #[test]
    fn scores_are_idempotent() {
        let timings = timings();

        assert_eq!(
            compute_power_score(&timings),
            compute_power_score(&timings)
        );
        assert_eq!(
            compute_throughput_score(123.4, 3, 22),
            compute_throughput_score(123.4, 3, 22)
        );
    }
}
