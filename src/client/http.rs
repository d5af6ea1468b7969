use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::{
    remote_write, Label, Matrix, MatrixSeries, QueryOptions, SamplePair, Series, Vector,
    VectorSample, WriteError,
};
use crate::clock::{from_unix_millis, unix_millis};
use crate::config::RemoteConfig;

/// HTTP implementation of the remote client: Prometheus remote write for
/// pushes, the Prometheus HTTP API for instant and range queries.
pub struct HttpClient {
    http: reqwest::Client,
    cfg: RemoteConfig,
}

impl HttpClient {
    /// Create a new client from the remote endpoint configuration.
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            cfg: cfg.clone(),
        })
    }

    /// Apply tenant and auth headers shared by all requests.
    fn apply_common_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.cfg.tenant_id.is_empty() {
            request = request.header("X-Scope-OrgID", &self.cfg.tenant_id);
        }

        if !self.cfg.username.is_empty() {
            request = request.basic_auth(&self.cfg.username, Some(&self.cfg.password));
        }

        request
    }

    /// Perform a query API GET request and decode the envelope.
    async fn get_api(
        &self,
        path: &str,
        params: &[(&str, String)],
        options: QueryOptions,
    ) -> Result<ApiData> {
        let url = format!("{}{}", self.cfg.query_url.trim_end_matches('/'), path);

        let mut request = self.http.get(&url).query(params);
        request = self.apply_common_headers(request);

        if !options.results_cache_enabled {
            request = request.header("Cache-Control", "no-store");
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from {}: {}", status, path, body);
        }

        let envelope: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))?;

        if envelope.status != "success" {
            bail!("query API returned status {:?}: {}", envelope.status, envelope.error);
        }

        envelope
            .data
            .with_context(|| format!("response from {path} is missing the data field"))
    }
}

impl super::RemoteClient for HttpClient {
    async fn write_series(&self, series: &[Series]) -> Result<u16, WriteError> {
        let body = remote_write::encode_write_request(series)
            .map_err(|source| WriteError::Transport { source })?;

        debug!(series = series.len(), bytes = body.len(), "pushing series");

        let mut request = self
            .http
            .post(&self.cfg.write_url)
            .header("Content-Type", remote_write::CONTENT_TYPE)
            .header("Content-Encoding", remote_write::CONTENT_ENCODING)
            .header(remote_write::VERSION_HEADER, remote_write::VERSION)
            .body(body);
        request = self.apply_common_headers(request);

        let response = request.send().await.map_err(|e| WriteError::Transport {
            source: anyhow::Error::new(e).context("sending remote write request"),
        })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(WriteError::Status { status, body })
    }

    async fn query(&self, query: &str, at: SystemTime, options: QueryOptions) -> Result<Vector> {
        debug!(query, time = unix_millis(at), "running instant query");

        let params = [
            ("query", query.to_string()),
            ("time", format_timestamp(at)),
        ];

        let data = self
            .get_api("/api/v1/query", &params, options)
            .await
            .with_context(|| format!("instant query {query:?}"))?;

        decode_vector(&data)
    }

    async fn query_range(
        &self,
        query: &str,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
        options: QueryOptions,
    ) -> Result<Matrix> {
        debug!(
            query,
            start = unix_millis(start),
            end = unix_millis(end),
            "running range query",
        );

        let params = [
            ("query", query.to_string()),
            ("start", format_timestamp(start)),
            ("end", format_timestamp(end)),
            ("step", format!("{}", step.as_secs_f64())),
        ];

        let data = self
            .get_api("/api/v1/query_range", &params, options)
            .await
            .with_context(|| format!("range query {query:?}"))?;

        decode_matrix(&data)
    }
}

/// Format a timestamp as fractional Unix seconds, as the query API expects.
fn format_timestamp(t: SystemTime) -> String {
    format!("{:.3}", unix_millis(t) as f64 / 1000.0)
}

// --- JSON response structures ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorItem {
    #[allow(dead_code)]
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixItem {
    #[serde(default)]
    metric: HashMap<String, String>,
    values: Vec<(f64, String)>,
}

/// Decode an instant query result into a vector.
fn decode_vector(data: &ApiData) -> Result<Vector> {
    if data.result_type != "vector" {
        bail!("expected a vector result but got {:?}", data.result_type);
    }

    let items: Vec<VectorItem> =
        serde_json::from_value(data.result.clone()).context("decoding vector result")?;

    items
        .into_iter()
        .map(|item| {
            Ok(VectorSample {
                timestamp: timestamp_from_seconds(item.value.0),
                value: parse_sample_value(&item.value.1)?,
            })
        })
        .collect()
}

/// Decode a range query result into a matrix.
fn decode_matrix(data: &ApiData) -> Result<Matrix> {
    if data.result_type != "matrix" {
        bail!("expected a matrix result but got {:?}", data.result_type);
    }

    let items: Vec<MatrixItem> =
        serde_json::from_value(data.result.clone()).context("decoding matrix result")?;

    items
        .into_iter()
        .map(|item| {
            let mut labels: Vec<Label> = item
                .metric
                .into_iter()
                .map(|(name, value)| Label { name, value })
                .collect();
            labels.sort();

            let samples = item
                .values
                .into_iter()
                .map(|(ts, value)| {
                    Ok(SamplePair {
                        timestamp: timestamp_from_seconds(ts),
                        value: parse_sample_value(&value)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(MatrixSeries { labels, samples })
        })
        .collect()
}

fn timestamp_from_seconds(seconds: f64) -> SystemTime {
    from_unix_millis((seconds * 1000.0).round() as i64)
}

fn parse_sample_value(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .with_context(|| format!("parsing sample value {raw:?}"))
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    fn api_data(json: &str) -> ApiData {
        let envelope: ApiResponse = serde_json::from_str(json).expect("valid envelope");
        assert_eq!(envelope.status, "success");
        envelope.data.expect("data present")
    }

    #[test]
    fn test_decode_vector() {
        let data = api_data(
            r#"{
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [
                        {"metric": {}, "value": [1000.0, "1.5"]},
                        {"metric": {"series_id": "1"}, "value": [1000.5, "-0.25"]}
                    ]
                }
            }"#,
        );

        let vector = decode_vector(&data).expect("valid vector");
        assert_eq!(vector.len(), 2);
        assert_eq!(vector[0].timestamp, UNIX_EPOCH + Duration::from_secs(1000));
        assert_eq!(vector[0].value, 1.5);
        assert_eq!(
            vector[1].timestamp,
            UNIX_EPOCH + Duration::from_millis(1_000_500),
        );
        assert_eq!(vector[1].value, -0.25);
    }

    #[test]
    fn test_decode_vector_rejects_matrix_result() {
        let data = api_data(
            r#"{
                "status": "success",
                "data": {"resultType": "matrix", "result": []}
            }"#,
        );

        let err = decode_vector(&data).expect_err("should fail");
        assert!(err.to_string().contains("expected a vector"));
    }

    #[test]
    fn test_decode_matrix() {
        let data = api_data(
            r#"{
                "status": "success",
                "data": {
                    "resultType": "matrix",
                    "result": [{
                        "metric": {"series_id": "0", "__name__": "x"},
                        "values": [[980.0, "0.5"], [1000.0, "0.75"]]
                    }]
                }
            }"#,
        );

        let matrix = decode_matrix(&data).expect("valid matrix");
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].labels[0], Label::new("__name__", "x"));
        assert_eq!(matrix[0].samples.len(), 2);
        assert_eq!(
            matrix[0].samples[1].timestamp,
            UNIX_EPOCH + Duration::from_secs(1000),
        );
        assert_eq!(matrix[0].samples[1].value, 0.75);
    }

    #[test]
    fn test_decode_matrix_empty_result() {
        let data = api_data(
            r#"{
                "status": "success",
                "data": {"resultType": "matrix", "result": []}
            }"#,
        );

        let matrix = decode_matrix(&data).expect("valid matrix");
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_parse_sample_value_special_values() {
        assert_eq!(parse_sample_value("12345").expect("valid"), 12345.0);
        assert!(parse_sample_value("NaN").expect("valid").is_nan());
        assert!(parse_sample_value("not-a-number").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        let t = UNIX_EPOCH + Duration::from_millis(1_000_500);
        assert_eq!(format_timestamp(t), "1000.500");
    }
}
