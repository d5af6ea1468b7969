use std::time::Duration;

use anyhow::{bail, Result};

use super::metrics::ProbeMetrics;
use crate::client::{Matrix, Vector};
use crate::clock::unix_millis;
use crate::generate::MetricKind;

/// Compare an observed value against the expected one with a bounded
/// relative tolerance.
pub fn compare_sample_values(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance * expected.abs().max(1.0)
}

/// Verify a range query result against the generated model.
///
/// The summed query collapses all series into one; each returned sample
/// must match `num_series * generate_value(t)` and adjacent samples must
/// be exactly one write interval apart. One result check is counted per
/// inspected sample; the first mismatch is counted as failed and aborts.
pub(crate) fn verify_range_result(
    matrix: &Matrix,
    kind: MetricKind,
    num_series: usize,
    step: Duration,
    metrics: &ProbeMetrics,
) -> Result<()> {
    if matrix.len() != 1 {
        bail!(
            "expected 1 series in the range query result but got {}",
            matrix.len(),
        );
    }

    let tolerance = kind.comparison_tolerance();
    let mut previous = None;

    for sample in &matrix[0].samples {
        metrics.query_result_checks_total.inc();

        let expected = kind.generate_value(sample.timestamp) * num_series as f64;
        if !compare_sample_values(sample.value, expected, tolerance) {
            metrics.query_result_checks_failed_total.inc();
            bail!(
                "sample at {} has value {} while {} was expected",
                unix_millis(sample.timestamp),
                sample.value,
                expected,
            );
        }

        if let Some(previous) = previous {
            if sample.timestamp.duration_since(previous).ok() != Some(step) {
                metrics.query_result_checks_failed_total.inc();
                bail!(
                    "samples at {} and {} are not contiguous",
                    unix_millis(previous),
                    unix_millis(sample.timestamp),
                );
            }
        }

        previous = Some(sample.timestamp);
    }

    Ok(())
}

/// Verify an instant query result against the generated model.
pub(crate) fn verify_instant_result(
    vector: &Vector,
    kind: MetricKind,
    num_series: usize,
    metrics: &ProbeMetrics,
) -> Result<()> {
    if vector.len() != 1 {
        bail!(
            "expected 1 sample in the instant query result but got {}",
            vector.len(),
        );
    }

    let sample = &vector[0];
    metrics.query_result_checks_total.inc();

    let expected = kind.generate_value(sample.timestamp) * num_series as f64;
    if !compare_sample_values(sample.value, expected, kind.comparison_tolerance()) {
        metrics.query_result_checks_failed_total.inc();
        bail!(
            "sample at {} has value {} while {} was expected",
            unix_millis(sample.timestamp),
            sample.value,
            expected,
        );
    }

    Ok(())
}
