use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

/// In-process metrics sink the orchestrator and admission engine record
/// into. Counters are `IntCounterVec`s keyed by channel, matching the
/// Prometheus usage pattern for per-target dispatch metrics.
pub struct Metrics {
    registry: Registry,
    deliveries_total: IntCounterVec,
    failures_total: IntCounterVec,
    provider_latency: Histogram,
    admissions_rejected_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deliveries_total = IntCounterVec::new(
            Opts::new("frn_deliveries_total", "Successful deliveries by channel"),
            &["channel"],
        )
        .expect("static metric definition");
        let failures_total = IntCounterVec::new(
            Opts::new("frn_failures_total", "Terminal delivery failures by channel and error type"),
            &["channel", "error_type"],
        )
        .expect("static metric definition");
        let provider_latency = Histogram::with_opts(HistogramOpts::new(
            "frn_provider_latency_seconds",
            "Provider send() latency",
        ))
        .expect("static metric definition");
        let admissions_rejected_total = IntCounterVec::new(
            Opts::new("frn_admissions_rejected_total", "Admission rejections by reason code"),
            &["code"],
        )
        .expect("static metric definition");

        registry.register(Box::new(deliveries_total.clone())).ok();
        registry.register(Box::new(failures_total.clone())).ok();
        registry.register(Box::new(provider_latency.clone())).ok();
        registry.register(Box::new(admissions_rejected_total.clone())).ok();

        Self {
            registry,
            deliveries_total,
            failures_total,
            provider_latency,
            admissions_rejected_total,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_delivery_success(&self, channel: &str, latency_seconds: f64) {
        self.deliveries_total.with_label_values(&[channel]).inc();
        self.provider_latency.observe(latency_seconds);
    }

    pub fn record_delivery_failure(&self, channel: &str, error_type: &str) {
        self.failures_total.with_label_values(&[channel, error_type]).inc();
    }

    pub fn record_admission_rejection(&self, code: &str) {
        self.admissions_rejected_total.with_label_values(&[code]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free, per-worker-process counters the orchestrator updates on every
/// successful lease acquisition and every provider-timeout. Process-local,
/// so unlike `Metrics` it isn't scraped over HTTP — it exists for a worker's
/// own logs/diagnostics rather than the ingest process's `/v1/admin/queues/stats`.
#[derive(Default)]
pub struct WorkerStats {
    pub leases_acquired: AtomicU64,
    pub leases_timed_out: AtomicU64,
}

impl WorkerStats {
    pub fn record_lease(&self) {
        self.leases_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.leases_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.leases_acquired.load(Ordering::Relaxed),
            self.leases_timed_out.load(Ordering::Relaxed),
        )
    }
}
