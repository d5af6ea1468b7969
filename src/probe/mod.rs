pub mod metrics;
pub mod planner;
pub mod verify;

use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use prometheus::Registry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::client::{QueryOptions, RemoteClient};
use crate::clock::{align_to_interval, unix_millis, DAY, HOUR};
use crate::config::WriteReadConfig;
use crate::generate::{HistogramVariant, MetricKind};

use self::metrics::ProbeMetrics;

/// Per-metric record of confirmed write/query history.
///
/// All timestamps are aligned to the write interval; `None` means no
/// confirmed history. Between `query_min_time` and `query_max_time`
/// every written data point is believed to be present remotely with the
/// currently configured series cardinality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricHistory {
    /// Latest timestamp this prober has successfully written, across
    /// restarts. Monotonically non-decreasing within a process lifetime.
    pub last_written_timestamp: Option<SystemTime>,
    /// Inclusive lower bound of the validated query window.
    pub query_min_time: Option<SystemTime>,
    /// Inclusive upper bound of the validated query window.
    pub query_max_time: Option<SystemTime>,
}

/// Continuous write/read correctness prober.
///
/// Each tick writes synthetic series with known generated values at
/// every missed write-interval timestamp, then queries them back over
/// several time horizons and compares the results against the model.
/// State is never persisted locally: `init` reconstructs it by querying
/// the remote system.
pub struct WriteReadSeriesProbe<C> {
    cfg: WriteReadConfig,
    client: C,
    metrics: ProbeMetrics,
    rng: StdRng,
    sample_metric: MetricHistory,
    histogram_metrics: [MetricHistory; 4],
}

impl<C: RemoteClient> WriteReadSeriesProbe<C> {
    /// Create a probe with an entropy-seeded query planner.
    pub fn new(cfg: WriteReadConfig, client: C, registry: &Registry) -> Result<Self> {
        Self::with_rng(cfg, client, registry, StdRng::from_entropy())
    }

    /// Create a probe with a deterministic planner seed, for
    /// reproducible randomized query windows.
    pub fn with_seed(
        cfg: WriteReadConfig,
        client: C,
        registry: &Registry,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(cfg, client, registry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        cfg: WriteReadConfig,
        client: C,
        registry: &Registry,
        rng: StdRng,
    ) -> Result<Self> {
        let metrics =
            ProbeMetrics::new(registry).context("registering continuous test metrics")?;

        Ok(Self {
            cfg,
            client,
            metrics,
            rng,
            sample_metric: MetricHistory::default(),
            histogram_metrics: [MetricHistory::default(); 4],
        })
    }

    /// The remote client this probe writes to and queries.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn enabled_kinds(&self) -> Vec<MetricKind> {
        let mut kinds = Vec::with_capacity(5);
        if self.cfg.with_samples {
            kinds.push(MetricKind::Sample);
        }
        if self.cfg.with_histograms {
            kinds.extend(HistogramVariant::ALL.map(MetricKind::Histogram));
        }
        kinds
    }

    fn history(&self, kind: MetricKind) -> &MetricHistory {
        match kind {
            MetricKind::Sample => &self.sample_metric,
            MetricKind::Histogram(variant) => &self.histogram_metrics[variant.index()],
        }
    }

    fn history_mut(&mut self, kind: MetricKind) -> &mut MetricHistory {
        match kind {
            MetricKind::Sample => &mut self.sample_metric,
            MetricKind::Histogram(variant) => &mut self.histogram_metrics[variant.index()],
        }
    }

    /// Recover the per-metric histories by querying the remote system.
    ///
    /// Must be called exactly once before the first `run`. Query
    /// failures are never fatal: recovery keeps whatever contiguous
    /// history it validated before the failing chunk, possibly none.
    pub async fn init(&mut self, now: SystemTime) -> Result<()> {
        for kind in self.enabled_kinds() {
            let (from, to) = self.find_previously_written_time_range(now, kind).await;

            let (Some(from), Some(to)) = (from, to) else {
                info!(
                    metric = kind.metric_name(),
                    "no previously written samples found, starting fresh",
                );
                continue;
            };

            if to <= now - HOUR {
                info!(
                    metric = kind.metric_name(),
                    newest = unix_millis(to),
                    "previously written samples are too old to trust, starting fresh",
                );
                continue;
            }

            let records = self.history_mut(kind);
            records.last_written_timestamp = Some(to);
            records.query_min_time = Some(from);
            records.query_max_time = Some(to);

            info!(
                metric = kind.metric_name(),
                query_min_time = unix_millis(from),
                query_max_time = unix_millis(to),
                "recovered previously written sample history",
            );
        }

        Ok(())
    }

    /// Walk backward from `now` in 24h chunks, validating returned
    /// samples against the generated model under the current series
    /// cardinality. Returns the inclusive bounds of the newest
    /// contiguous run of valid samples.
    async fn find_previously_written_time_range(
        &self,
        now: SystemTime,
        kind: MetricKind,
    ) -> (Option<SystemTime>, Option<SystemTime>) {
        let interval = self.cfg.write_interval;
        let oldest_allowed = now - self.cfg.max_query_age;
        let query = kind.query_sum();

        let mut from: Option<SystemTime> = None;
        let mut to: Option<SystemTime> = None;
        let mut end = align_to_interval(now, interval);

        loop {
            // The start offset by one interval keeps chunks from
            // double-counting the boundary sample.
            let start = oldest_allowed.max(end - DAY + interval);
            if start >= end {
                return (from, to);
            }

            let matrix = match self
                .client
                .query_range(&query, start, end, interval, QueryOptions::no_cache())
                .await
            {
                Ok(matrix) => matrix,
                Err(err) => {
                    warn!(
                        metric = kind.metric_name(),
                        error = format!("{err:#}"),
                        "history recovery query failed, keeping what was validated so far",
                    );
                    return (from, to);
                }
            };

            if matrix.len() != 1 {
                return (from, to);
            }

            let samples = &matrix[0].samples;
            if samples.is_empty() {
                return (from, to);
            }

            for sample in samples.iter().rev() {
                // Recover the cardinality the sample was written with.
                // A mismatch marks the end of data written under the
                // current configuration (e.g. a restart with a
                // different series count).
                let single = kind.generate_value(sample.timestamp);
                if (sample.value / single).round() != self.cfg.num_series as f64 {
                    return (from, to);
                }

                // Samples must be contiguous on the write-interval grid.
                if let Some(oldest_found) = from {
                    if oldest_found.duration_since(sample.timestamp).ok()
                        != Some(interval)
                    {
                        return (from, to);
                    }
                }

                if to.is_none() {
                    to = Some(sample.timestamp);
                }
                from = Some(sample.timestamp);
            }

            // A chunk that does not reach its own start has a gap below.
            if from != Some(start) {
                return (from, to);
            }

            end = start - interval;
        }
    }

    /// Run one tick: write the backfill, then query and compare.
    ///
    /// Returns an error if any write failed, any query failed or any
    /// result comparison failed; a returned error does not imply the
    /// query phase was skipped.
    pub async fn run(&mut self, now: SystemTime) -> Result<()> {
        let mut errs = ErrorList::default();

        for kind in self.enabled_kinds() {
            if let Err(err) = self.run_metric(now, kind).await {
                warn!(
                    metric = kind.metric_name(),
                    error = format!("{err:#}"),
                    "continuous test iteration failed",
                );
                errs.push(err);
            }
        }

        errs.into_result()
    }

    async fn run_metric(&mut self, now: SystemTime, kind: MetricKind) -> Result<()> {
        let mut records = *self.history(kind);
        let write_result = self.write_phase(now, kind, &mut records).await;
        *self.history_mut(kind) = records;

        let mut errs = ErrorList::default();
        match write_result {
            Ok(soft_errors) => errs.extend(soft_errors),
            // A 5xx or transport failure halts the write phase; what was
            // not written will be retried next tick, and querying now
            // would flag false gaps.
            Err(err) => return Err(err),
        }

        match planner::get_query_time_ranges(
            now,
            &records,
            self.cfg.max_query_age,
            self.cfg.write_interval,
            &mut self.rng,
        ) {
            Err(reason) => {
                debug!(metric = kind.metric_name(), %reason, "skipping queries");
            }
            Ok((ranges, instants)) => {
                for (start, end) in ranges {
                    for cache_enabled in [true, false] {
                        if let Err(err) =
                            self.run_range_query(kind, start, end, cache_enabled).await
                        {
                            errs.push(err);
                        }
                    }
                }

                for instant in instants {
                    for cache_enabled in [true, false] {
                        if let Err(err) =
                            self.run_instant_query(kind, instant, cache_enabled).await
                        {
                            errs.push(err);
                        }
                    }
                }
            }
        }

        errs.into_result()
    }

    /// Write series at every missed interval-aligned timestamp up to
    /// `now`, in chronological order. Returns the non-fatal (4xx) write
    /// errors, or the fatal error that halted the phase.
    async fn write_phase(
        &self,
        now: SystemTime,
        kind: MetricKind,
        records: &mut MetricHistory,
    ) -> Result<Vec<anyhow::Error>> {
        let interval = self.cfg.write_interval;
        let mut soft_errors = Vec::new();

        loop {
            let timestamp = match records.last_written_timestamp {
                None => align_to_interval(now, interval),
                Some(last) => last + interval,
            };
            if timestamp > now {
                break;
            }

            let series = kind.generate_series(timestamp, self.cfg.num_series);
            self.metrics.writes_total.inc();

            match self.client.write_series(&series).await {
                Ok(_) => {
                    debug!(
                        metric = kind.metric_name(),
                        timestamp = unix_millis(timestamp),
                        "wrote series",
                    );
                    records.last_written_timestamp = Some(timestamp);
                    records.query_max_time = Some(timestamp);
                    if records.query_min_time.is_none() {
                        records.query_min_time = Some(timestamp);
                    }
                }
                Err(err) => {
                    let status_code = err.status_code();
                    self.metrics
                        .writes_failed_total
                        .with_label_values(&[&status_code.to_string()])
                        .inc();
                    warn!(
                        metric = kind.metric_name(),
                        timestamp = unix_millis(timestamp),
                        status_code,
                        error = %err,
                        "failed to write series",
                    );

                    let context = format!(
                        "writing {} series at {}",
                        kind.metric_name(),
                        unix_millis(timestamp),
                    );

                    if err.is_client_error() {
                        // The server definitively rejected the payload;
                        // writing it again would fail the same way.
                        records.last_written_timestamp = Some(timestamp);
                        soft_errors.push(anyhow!(err).context(context));
                    } else {
                        return Err(anyhow!(err).context(context));
                    }
                }
            }
        }

        Ok(soft_errors)
    }

    async fn run_range_query(
        &self,
        kind: MetricKind,
        start: SystemTime,
        end: SystemTime,
        cache_enabled: bool,
    ) -> Result<()> {
        let query = kind.query_sum();
        let step = self.cfg.write_interval;
        let options = QueryOptions {
            results_cache_enabled: cache_enabled,
        };

        self.metrics.queries_total.inc();

        let matrix = match self.client.query_range(&query, start, end, step, options).await {
            Ok(matrix) => matrix,
            Err(err) => {
                self.metrics.queries_failed_total.inc();
                return Err(err.context(format!(
                    "range query {query} over [{}, {}]",
                    unix_millis(start),
                    unix_millis(end),
                )));
            }
        };

        verify::verify_range_result(&matrix, kind, self.cfg.num_series, step, &self.metrics)
            .with_context(|| {
                format!(
                    "verifying range query {query} over [{}, {}] (results cache {})",
                    unix_millis(start),
                    unix_millis(end),
                    cache_state(cache_enabled),
                )
            })
    }

    async fn run_instant_query(
        &self,
        kind: MetricKind,
        instant: SystemTime,
        cache_enabled: bool,
    ) -> Result<()> {
        let query = kind.query_sum();
        let options = QueryOptions {
            results_cache_enabled: cache_enabled,
        };

        self.metrics.queries_total.inc();

        let vector = match self.client.query(&query, instant, options).await {
            Ok(vector) => vector,
            Err(err) => {
                self.metrics.queries_failed_total.inc();
                return Err(err.context(format!(
                    "instant query {query} at {}",
                    unix_millis(instant),
                )));
            }
        };

        verify::verify_instant_result(&vector, kind, self.cfg.num_series, &self.metrics)
            .with_context(|| {
                format!(
                    "verifying instant query {query} at {} (results cache {})",
                    unix_millis(instant),
                    cache_state(cache_enabled),
                )
            })
    }
}

fn cache_state(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Collects the non-fatal errors of a tick so one failing comparison
/// does not stop the remaining queries.
#[derive(Debug, Default)]
struct ErrorList(Vec<anyhow::Error>);

impl ErrorList {
    fn push(&mut self, err: anyhow::Error) {
        self.0.push(err);
    }

    fn extend(&mut self, errs: Vec<anyhow::Error>) {
        self.0.extend(errs);
    }

    fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            return Ok(());
        }

        let joined = self
            .0
            .iter()
            .map(|err| format!("{err:#}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(anyhow!(joined))
    }
}
