use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the probeoor prober.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Remote TSDB endpoints and authentication.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Write/read series test configuration.
    #[serde(default)]
    pub test: WriteReadConfig,

    /// Prometheus metrics server configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Remote TSDB endpoints and authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Remote-write endpoint (e.g. "http://mimir:8080/api/v1/push").
    #[serde(default)]
    pub write_url: String,

    /// Query API base URL (e.g. "http://mimir:8080/prometheus").
    #[serde(default)]
    pub query_url: String,

    /// Tenant ID sent as X-Scope-OrgID on every request, if set.
    #[serde(default)]
    pub tenant_id: String,

    /// Basic auth username.
    #[serde(default)]
    pub username: String,

    /// Basic auth password.
    #[serde(default)]
    pub password: String,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Write/read series test configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteReadConfig {
    /// Number of series written per metric family per timestamp.
    /// Default: 1000.
    #[serde(default = "default_num_series")]
    pub num_series: usize,

    /// Write and verify float samples. Default: true.
    #[serde(default = "default_true")]
    pub with_samples: bool,

    /// Write and verify native histograms. Default: false.
    #[serde(default)]
    pub with_histograms: bool,

    /// How far back queries may reach, and how far state recovery walks
    /// on startup. Default: 72h.
    #[serde(default = "default_max_query_age", with = "humantime_serde")]
    pub max_query_age: Duration,

    /// Interval all written timestamps are aligned to. Must divide 24h
    /// evenly. Default: 20s.
    #[serde(default = "default_write_interval", with = "humantime_serde")]
    pub write_interval: Duration,

    /// How often a test iteration runs. Missed write timestamps are
    /// backfilled, so this can be longer than the write interval.
    /// Default: 5m.
    #[serde(default = "default_run_interval", with = "humantime_serde")]
    pub run_interval: Duration,

    /// Run a single iteration and exit, reporting failure through the
    /// process exit code. Default: false.
    #[serde(default)]
    pub smoke_test: bool,
}

/// Prometheus metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Listen address. Default: ":9900".
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_num_series() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_query_age() -> Duration {
    Duration::from_secs(72 * 60 * 60)
}

fn default_write_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_run_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_metrics_addr() -> String {
    ":9900".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            remote: RemoteConfig::default(),
            test: WriteReadConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            write_url: String::new(),
            query_url: String::new(),
            tenant_id: String::new(),
            username: String::new(),
            password: String::new(),
            timeout: default_remote_timeout(),
        }
    }
}

impl Default for WriteReadConfig {
    fn default() -> Self {
        Self {
            num_series: default_num_series(),
            with_samples: true,
            with_histograms: false,
            max_query_age: default_max_query_age(),
            write_interval: default_write_interval(),
            run_interval: default_run_interval(),
            smoke_test: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.remote.write_url.is_empty() {
            bail!("remote.write_url is required");
        }

        if self.remote.query_url.is_empty() {
            bail!("remote.query_url is required");
        }

        if self.test.num_series == 0 {
            bail!("test.num_series must be at least 1");
        }

        if !self.test.with_samples && !self.test.with_histograms {
            bail!("at least one of test.with_samples and test.with_histograms must be enabled");
        }

        if self.test.max_query_age < Duration::from_secs(60 * 60) {
            bail!("test.max_query_age must be at least 1h");
        }

        let interval_secs = self.test.write_interval.as_secs();
        if interval_secs == 0 || self.test.write_interval.subsec_nanos() != 0 {
            bail!("test.write_interval must be a positive whole number of seconds");
        }

        // Recovery walks backward in 24h chunks; an interval that does
        // not divide the chunk size would misalign chunk boundaries.
        if 24 * 60 * 60 % interval_secs != 0 {
            bail!("test.write_interval must divide 24h evenly");
        }

        if self.test.run_interval.is_zero() {
            bail!("test.run_interval must be positive");
        }

        Ok(())
    }
}
