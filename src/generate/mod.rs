//! Deterministic series and value generators.
//!
//! Every generator is a pure function of the metric name, timestamp and
//! series index: the same inputs always produce the same payload, which
//! is what lets written data be verified by recomputing it at query time.

use std::f64::consts::PI;
use std::time::{Duration, SystemTime};

use crate::client::{
    BucketCounts, BucketSpan, CountValue, HistogramValue, Label, Series, SeriesValue,
};
use crate::clock::unix_millis;

/// Metric name of the sine-wave float sample family.
pub const METRIC_NAME_SAMPLE: &str = "mimir_continuous_test_sine_wave";

/// Label distinguishing the N parallel series of a family.
pub const SERIES_ID_LABEL: &str = "series_id";

/// Period of the written sine wave.
const SINE_WAVE_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Observations carried by every generated histogram.
const HISTOGRAM_OBSERVATIONS: u64 = 10;

/// Relative tolerance when comparing queried float samples.
const SAMPLE_TOLERANCE: f64 = 1e-6;

/// Relative tolerance when comparing queried histogram sums. Histogram
/// sums pass through server-side bucket re-aggregation, which loses more
/// precision than plain float samples.
const HISTOGRAM_TOLERANCE: f64 = 1e-4;

/// A tracked metric family variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Sine-wave float samples.
    Sample,
    /// Native histograms whose sum follows the generated value.
    Histogram(HistogramVariant),
}

/// The four generated native-histogram variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramVariant {
    IntCounter,
    FloatCounter,
    IntGauge,
    FloatGauge,
}

impl HistogramVariant {
    pub const ALL: [HistogramVariant; 4] = [
        HistogramVariant::IntCounter,
        HistogramVariant::FloatCounter,
        HistogramVariant::IntGauge,
        HistogramVariant::FloatGauge,
    ];

    pub fn metric_name(self) -> &'static str {
        match self {
            Self::IntCounter => "mimir_continuous_test_histogram_int_counter",
            Self::FloatCounter => "mimir_continuous_test_histogram_float_counter",
            Self::IntGauge => "mimir_continuous_test_histogram_int_gauge",
            Self::FloatGauge => "mimir_continuous_test_histogram_float_gauge",
        }
    }

    /// Index into per-variant storage, matching the order of `ALL`.
    pub fn index(self) -> usize {
        match self {
            Self::IntCounter => 0,
            Self::FloatCounter => 1,
            Self::IntGauge => 2,
            Self::FloatGauge => 3,
        }
    }

    pub fn has_float_buckets(self) -> bool {
        matches!(self, Self::FloatCounter | Self::FloatGauge)
    }

    pub fn is_gauge(self) -> bool {
        matches!(self, Self::IntGauge | Self::FloatGauge)
    }
}

impl MetricKind {
    pub fn metric_name(self) -> &'static str {
        match self {
            Self::Sample => METRIC_NAME_SAMPLE,
            Self::Histogram(variant) => variant.metric_name(),
        }
    }

    /// The query whose correct result at time `t` is
    /// `num_series * generate_value(t)`.
    ///
    /// The 1s range selector pins evaluation to the sample written
    /// exactly at each step instead of letting lookback paper over gaps.
    pub fn query_sum(self) -> String {
        let name = self.metric_name();
        match self {
            Self::Sample => format!("sum(max_over_time({name}[1s]))"),
            Self::Histogram(_) => format!("sum(histogram_sum(last_over_time({name}[1s])))"),
        }
    }

    /// The expected per-series value at the given instant.
    pub fn generate_value(self, t: SystemTime) -> f64 {
        match self {
            Self::Sample => generate_sine_wave_value(t),
            Self::Histogram(variant) if variant.has_float_buckets() => {
                generate_histogram_float_value(t)
            }
            Self::Histogram(_) => generate_histogram_int_value(t),
        }
    }

    /// Produce the `num_series` series to write at the given instant.
    pub fn generate_series(self, t: SystemTime, num_series: usize) -> Vec<Series> {
        let value = match self {
            Self::Sample => SeriesValue::Float(self.generate_value(t)),
            Self::Histogram(variant) => {
                SeriesValue::Histogram(generate_histogram_value(variant, t))
            }
        };

        (0..num_series)
            .map(|series_id| Series {
                labels: vec![
                    Label::new("__name__", self.metric_name()),
                    Label::new(SERIES_ID_LABEL, series_id.to_string()),
                ],
                timestamp: t,
                value: value.clone(),
            })
            .collect()
    }

    /// Relative tolerance for comparing queried results of this family.
    pub fn comparison_tolerance(self) -> f64 {
        match self {
            Self::Sample => SAMPLE_TOLERANCE,
            Self::Histogram(_) => HISTOGRAM_TOLERANCE,
        }
    }
}

/// Sine wave with a fixed period, evaluated at millisecond precision.
pub fn generate_sine_wave_value(t: SystemTime) -> f64 {
    let radians =
        2.0 * PI * unix_millis(t) as f64 / SINE_WAVE_PERIOD.as_millis() as f64;
    radians.sin()
}

/// Float histogram sum: the sine wave shifted and scaled so the value is
/// never zero (division by the expected value is used to recover the
/// series cardinality during recovery).
pub fn generate_histogram_float_value(t: SystemTime) -> f64 {
    (generate_sine_wave_value(t) + 2.0) * 100.0
}

/// Integer histogram sum, as a float.
pub fn generate_histogram_int_value(t: SystemTime) -> f64 {
    generate_histogram_float_value(t).round()
}

fn generate_histogram_value(variant: HistogramVariant, t: SystemTime) -> HistogramValue {
    let sum = if variant.has_float_buckets() {
        generate_histogram_float_value(t)
    } else {
        generate_histogram_int_value(t)
    };

    let (count, zero_count, positive_buckets) = if variant.has_float_buckets() {
        (
            CountValue::Float(HISTOGRAM_OBSERVATIONS as f64),
            CountValue::Float(0.0),
            BucketCounts::Counts(vec![HISTOGRAM_OBSERVATIONS as f64]),
        )
    } else {
        (
            CountValue::Int(HISTOGRAM_OBSERVATIONS),
            CountValue::Int(0),
            BucketCounts::Deltas(vec![HISTOGRAM_OBSERVATIONS as i64]),
        )
    };

    HistogramValue {
        count,
        sum,
        schema: 0,
        zero_threshold: 0.0,
        zero_count,
        positive_spans: vec![BucketSpan {
            offset: 0,
            length: 1,
        }],
        positive_buckets,
        gauge: variant.is_gauge(),
    }
}
