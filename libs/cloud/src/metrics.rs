//! Latency and error metrics for cloud API calls.
//!
//! Metrics are registered into a caller-owned [`Registry`]; nothing here
//! touches a process-global registry.

use std::future::Future;
use std::time::Instant;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::types::ApiVersion;

/// Label value recorded when a call has no region or zone.
pub const UNUSED_METRIC_LABEL: &str = "<n/a>";

/// Label names shared by the latency histogram and the error counter.
pub const METRIC_LABELS: [&str; 4] = ["request", "region", "zone", "version"];

const LATENCY_BUCKETS: [f64; 16] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0, 320.0,
];

/// Collectors for cloud API calls.
#[derive(Clone)]
pub struct ApiMetrics {
    latency: HistogramVec,
    errors: IntCounterVec,
}

impl ApiMetrics {
    /// Build the collectors and register them into `registry`.
    ///
    /// Registering twice into the same registry fails with `AlreadyReg`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "cloud_api_request_duration_seconds",
                "Latency of a cloud API call",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &METRIC_LABELS,
        )?;
        let errors = IntCounterVec::new(
            Opts::new("cloud_api_request_errors", "Number of errors for an API call"),
            &METRIC_LABELS,
        )?;

        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self { latency, errors })
    }

    /// Number of latency observations recorded for `labels`.
    pub fn observed_calls(&self, labels: [&str; 4]) -> u64 {
        self.latency.with_label_values(&labels).get_sample_count()
    }

    /// Number of errors recorded for `labels`.
    pub fn error_count(&self, labels: [&str; 4]) -> u64 {
        self.errors.with_label_values(&labels).get()
    }
}

/// Timing context for a single API call.
pub struct MetricContext<'a> {
    metrics: &'a ApiMetrics,
    start: Instant,
    // Fixed arity: label cardinality always matches METRIC_LABELS.
    labels: [String; 4],
}

impl<'a> MetricContext<'a> {
    /// Start timing `<resource>_<request>` in the given region and zone.
    pub fn new(
        metrics: &'a ApiMetrics,
        resource: &str,
        request: &str,
        region: Option<&str>,
        zone: Option<&str>,
        version: ApiVersion,
    ) -> Self {
        let or_unused = |v: Option<&str>| {
            v.filter(|s| !s.is_empty())
                .unwrap_or(UNUSED_METRIC_LABEL)
                .to_string()
        };

        Self {
            metrics,
            start: Instant::now(),
            labels: [
                format!("{resource}_{request}"),
                or_unused(region),
                or_unused(zone),
                version.as_str().to_string(),
            ],
        }
    }

    /// Record the outcome of a finished call and hand the result back.
    pub fn observe_result<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        let labels = self.labels.each_ref().map(String::as_str);
        self.metrics
            .latency
            .with_label_values(&labels)
            .observe(self.start.elapsed().as_secs_f64());
        if result.is_err() {
            self.metrics.errors.with_label_values(&labels).inc();
        }
        result
    }

    /// Await `future` and record its outcome.
    pub async fn observe<F, T, E>(self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let result = future.await;
        self.observe_result(result)
    }
}
