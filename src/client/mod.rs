pub mod http;
pub mod remote_write;

use std::future::Future;
use std::time::{Duration, SystemTime};

use anyhow::Result;

/// A metric label (name=value pair).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One series carrying a single value at a single timestamp, as produced
/// by the generators and pushed over remote write.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: Vec<Label>,
    pub timestamp: SystemTime,
    pub value: SeriesValue,
}

/// The payload of a written series: a float sample or a native histogram.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Float(f64),
    Histogram(HistogramValue),
}

/// A native histogram payload.
///
/// Only positive buckets are ever generated; the negative side of the
/// wire format is left empty on encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramValue {
    pub count: CountValue,
    pub sum: f64,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: CountValue,
    pub positive_spans: Vec<BucketSpan>,
    pub positive_buckets: BucketCounts,
    pub gauge: bool,
}

/// A span of consecutive histogram buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpan {
    pub offset: i32,
    pub length: u32,
}

/// Integer- or float-valued histogram count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CountValue {
    Int(u64),
    Float(f64),
}

/// Bucket values: deltas for integer histograms, absolute counts for
/// float histograms.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketCounts {
    Deltas(Vec<i64>),
    Counts(Vec<f64>),
}

/// A sample returned by an instant query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorSample {
    pub timestamp: SystemTime,
    pub value: f64,
}

/// Instant query result.
pub type Vector = Vec<VectorSample>;

/// A (timestamp, value) pair within a range query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePair {
    pub timestamp: SystemTime,
    pub value: f64,
}

/// One series within a range query result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatrixSeries {
    pub labels: Vec<Label>,
    pub samples: Vec<SamplePair>,
}

/// Range query result.
pub type Matrix = Vec<MatrixSeries>;

/// Per-query options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Whether the query may be served from the server-side results cache.
    pub results_cache_enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            results_cache_enabled: true,
        }
    }
}

impl QueryOptions {
    /// Options bypassing the server-side results cache.
    pub fn no_cache() -> Self {
        Self {
            results_cache_enabled: false,
        }
    }
}

/// Error returned by a failed remote write.
///
/// The run loop classifies these: 4xx rejections are permanent (the
/// payload is never retried), everything else halts the write phase.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("remote write rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote write request failed: {source}")]
    Transport {
        #[source]
        source: anyhow::Error,
    },
}

impl WriteError {
    /// HTTP status code of the failure, 0 for transport errors.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            Self::Transport { .. } => 0,
        }
    }

    /// Whether the server definitively rejected the payload (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// Remote TSDB capability: push series and read them back.
pub trait RemoteClient: Send + Sync {
    /// Push the given series over remote write. Returns the HTTP status
    /// code on 2xx, a `WriteError` otherwise.
    fn write_series(
        &self,
        series: &[Series],
    ) -> impl Future<Output = Result<u16, WriteError>> + Send;

    /// Evaluate an instant query at the given time.
    fn query(
        &self,
        query: &str,
        at: SystemTime,
        options: QueryOptions,
    ) -> impl Future<Output = Result<Vector>> + Send;

    /// Evaluate a range query over `[start, end]` at the given step.
    fn query_range(
        &self,
        query: &str,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
        options: QueryOptions,
    ) -> impl Future<Output = Result<Matrix>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_status_code() {
        let err = WriteError::Status {
            status: 400,
            body: "bad request".to_string(),
        };
        assert_eq!(err.status_code(), 400);
        assert!(err.is_client_error());

        let err = WriteError::Status {
            status: 500,
            body: String::new(),
        };
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_client_error());

        let err = WriteError::Transport {
            source: anyhow::anyhow!("connection refused"),
        };
        assert_eq!(err.status_code(), 0);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_query_options_default_enables_cache() {
        assert!(QueryOptions::default().results_cache_enabled);
        assert!(!QueryOptions::no_cache().results_cache_enabled);
    }
}
