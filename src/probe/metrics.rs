use anyhow::Result;
use prometheus::{Counter, CounterVec, Opts, Registry};

/// Namespace shared by all exported counters. The names are a stable
/// interface consumed by dashboards and alerts; never rename them.
const NAMESPACE: &str = "mimir_continuous_test";

/// Value of the `test` label attached to every counter.
const TEST_NAME: &str = "write-read-series";

/// Counters exported by the write/read prober.
#[derive(Clone)]
pub struct ProbeMetrics {
    pub writes_total: Counter,
    pub writes_failed_total: CounterVec,
    pub queries_total: Counter,
    pub queries_failed_total: Counter,
    pub query_result_checks_total: Counter,
    pub query_result_checks_failed_total: Counter,
}

impl ProbeMetrics {
    /// Create the counters and register them with the given registry.
    pub fn new(registry: &Registry) -> Result<Self> {
        let writes_total = Counter::with_opts(opts(
            "writes_total",
            "Total number of attempted write requests.",
        ))?;
        let writes_failed_total = CounterVec::new(
            opts(
                "writes_failed_total",
                "Total number of failed write requests.",
            ),
            &["status_code"],
        )?;
        let queries_total = Counter::with_opts(opts(
            "queries_total",
            "Total number of attempted query requests.",
        ))?;
        let queries_failed_total = Counter::with_opts(opts(
            "queries_failed_total",
            "Total number of failed query requests.",
        ))?;
        let query_result_checks_total = Counter::with_opts(opts(
            "query_result_checks_total",
            "Total number of query results checked for correctness.",
        ))?;
        let query_result_checks_failed_total = Counter::with_opts(opts(
            "query_result_checks_failed_total",
            "Total number of query results failed when checking for correctness.",
        ))?;

        registry.register(Box::new(writes_total.clone()))?;
        registry.register(Box::new(writes_failed_total.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(queries_failed_total.clone()))?;
        registry.register(Box::new(query_result_checks_total.clone()))?;
        registry.register(Box::new(query_result_checks_failed_total.clone()))?;

        Ok(Self {
            writes_total,
            writes_failed_total,
            queries_total,
            queries_failed_total,
            query_result_checks_total,
            query_result_checks_failed_total,
        })
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .namespace(NAMESPACE)
        .const_label("test", TEST_NAME)
}
