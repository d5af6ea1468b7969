//! Prometheus remote-write wire format.
//!
//! The prompb messages are declared by hand instead of being generated
//! from the upstream proto files: the prober only ever encodes write
//! requests, and declaring the handful of messages keeps native
//! histogram support without a build-time protoc dependency.

use anyhow::{Context, Result};
use prost::Message;

use super::{BucketCounts, CountValue, Series, SeriesValue};
use crate::clock::unix_millis;

/// Content type of a remote-write request body.
pub const CONTENT_TYPE: &str = "application/x-protobuf";

/// Content encoding of a remote-write request body.
pub const CONTENT_ENCODING: &str = "snappy";

/// Remote-write protocol version header.
pub const VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";

/// Remote-write protocol version sent with every request.
pub const VERSION: &str = "0.1.0";

pub mod prompb {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
        #[prost(message, repeated, tag = "4")]
        pub histograms: Vec<Histogram>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        #[prost(double, tag = "1")]
        pub value: f64,
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Histogram {
        #[prost(oneof = "histogram::Count", tags = "1, 2")]
        pub count: Option<histogram::Count>,
        #[prost(double, tag = "3")]
        pub sum: f64,
        #[prost(sint32, tag = "4")]
        pub schema: i32,
        #[prost(double, tag = "5")]
        pub zero_threshold: f64,
        #[prost(oneof = "histogram::ZeroCount", tags = "6, 7")]
        pub zero_count: Option<histogram::ZeroCount>,
        #[prost(message, repeated, tag = "8")]
        pub negative_spans: Vec<BucketSpan>,
        #[prost(sint64, repeated, tag = "9")]
        pub negative_deltas: Vec<i64>,
        #[prost(double, repeated, tag = "10")]
        pub negative_counts: Vec<f64>,
        #[prost(message, repeated, tag = "11")]
        pub positive_spans: Vec<BucketSpan>,
        #[prost(sint64, repeated, tag = "12")]
        pub positive_deltas: Vec<i64>,
        #[prost(double, repeated, tag = "13")]
        pub positive_counts: Vec<f64>,
        #[prost(enumeration = "ResetHint", tag = "14")]
        pub reset_hint: i32,
        #[prost(int64, tag = "15")]
        pub timestamp: i64,
    }

    pub mod histogram {
        #[derive(Clone, Copy, PartialEq, prost::Oneof)]
        pub enum Count {
            #[prost(uint64, tag = "1")]
            CountInt(u64),
            #[prost(double, tag = "2")]
            CountFloat(f64),
        }

        #[derive(Clone, Copy, PartialEq, prost::Oneof)]
        pub enum ZeroCount {
            #[prost(uint64, tag = "6")]
            ZeroCountInt(u64),
            #[prost(double, tag = "7")]
            ZeroCountFloat(f64),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct BucketSpan {
        #[prost(sint32, tag = "1")]
        pub offset: i32,
        #[prost(uint32, tag = "2")]
        pub length: u32,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
    #[repr(i32)]
    pub enum ResetHint {
        Unknown = 0,
        Yes = 1,
        No = 2,
        Gauge = 3,
    }
}

/// Build a prompb write request from the generated series.
pub fn build_write_request(series: &[Series]) -> prompb::WriteRequest {
    let timeseries = series
        .iter()
        .map(|s| {
            let mut labels: Vec<prompb::Label> = s
                .labels
                .iter()
                .map(|l| prompb::Label {
                    name: l.name.clone(),
                    value: l.value.clone(),
                })
                .collect();
            // The remote-write spec requires labels sorted by name.
            labels.sort_by(|a, b| a.name.cmp(&b.name));

            let timestamp = unix_millis(s.timestamp);
            let mut out = prompb::TimeSeries {
                labels,
                samples: Vec::new(),
                histograms: Vec::new(),
            };

            match &s.value {
                SeriesValue::Float(value) => out.samples.push(prompb::Sample {
                    value: *value,
                    timestamp,
                }),
                SeriesValue::Histogram(h) => {
                    out.histograms.push(to_prompb_histogram(h, timestamp));
                }
            }

            out
        })
        .collect();

    prompb::WriteRequest { timeseries }
}

fn to_prompb_histogram(
    h: &super::HistogramValue,
    timestamp: i64,
) -> prompb::Histogram {
    let count = match h.count {
        CountValue::Int(v) => prompb::histogram::Count::CountInt(v),
        CountValue::Float(v) => prompb::histogram::Count::CountFloat(v),
    };
    let zero_count = match h.zero_count {
        CountValue::Int(v) => prompb::histogram::ZeroCount::ZeroCountInt(v),
        CountValue::Float(v) => prompb::histogram::ZeroCount::ZeroCountFloat(v),
    };

    let positive_spans = h
        .positive_spans
        .iter()
        .map(|s| prompb::BucketSpan {
            offset: s.offset,
            length: s.length,
        })
        .collect();

    let (positive_deltas, positive_counts) = match &h.positive_buckets {
        BucketCounts::Deltas(d) => (d.clone(), Vec::new()),
        BucketCounts::Counts(c) => (Vec::new(), c.clone()),
    };

    let reset_hint = if h.gauge {
        prompb::ResetHint::Gauge
    } else {
        prompb::ResetHint::Unknown
    };

    prompb::Histogram {
        count: Some(count),
        sum: h.sum,
        schema: h.schema,
        zero_threshold: h.zero_threshold,
        zero_count: Some(zero_count),
        negative_spans: Vec::new(),
        negative_deltas: Vec::new(),
        negative_counts: Vec::new(),
        positive_spans,
        positive_deltas,
        positive_counts,
        reset_hint: reset_hint as i32,
        timestamp,
    }
}

/// Encode the series as a snappy-compressed remote-write request body.
pub fn encode_write_request(series: &[Series]) -> Result<Vec<u8>> {
    let request = build_write_request(series);

    let mut buf = Vec::with_capacity(request.encoded_len());
    request
        .encode(&mut buf)
        .context("encoding remote write request")?;

    snap::raw::Encoder::new()
        .compress_vec(&buf)
        .context("compressing remote write request")
}
