use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Request metrics
    pub requests_total: IntCounter,
    pub failed_requests: IntCounter,
    pub request_duration: Histogram,

    // Plugin chain metrics
    pub short_circuits_total: IntCounter,
    pub transport_errors_total: IntCounter,
    pub recovered_errors_total: IntCounter,

    // Stream metrics
    pub active_streams: IntGauge,
    pub stream_chunks_total: IntCounter,
    pub stream_errors_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric creation failed")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = counter("hai3_api_requests_total", "Total number of REST requests");
        let failed_requests = counter(
            "hai3_api_requests_failed",
            "Total number of REST requests that ended in an error",
        );
        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "hai3_api_request_duration_seconds",
            "REST request duration in seconds",
        ))
        .expect("metric creation failed");

        let short_circuits_total = counter(
            "hai3_api_short_circuits_total",
            "Total number of calls answered by a plugin instead of the network",
        );
        let transport_errors_total = counter(
            "hai3_api_transport_errors_total",
            "Total number of transport failures",
        );
        let recovered_errors_total = counter(
            "hai3_api_recovered_errors_total",
            "Total number of transport failures recovered by a plugin",
        );

        let active_streams = IntGauge::new("hai3_api_active_streams", "Number of open SSE connections")
            .expect("metric creation failed");
        let stream_chunks_total = counter(
            "hai3_api_stream_chunks_total",
            "Total number of SSE messages delivered",
        );
        let stream_errors_total = counter(
            "hai3_api_stream_errors_total",
            "Total number of SSE connections torn down by an error",
        );

        // Register all metrics
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(requests_total.clone()),
            Box::new(failed_requests.clone()),
            Box::new(request_duration.clone()),
            Box::new(short_circuits_total.clone()),
            Box::new(transport_errors_total.clone()),
            Box::new(recovered_errors_total.clone()),
            Box::new(active_streams.clone()),
            Box::new(stream_chunks_total.clone()),
            Box::new(stream_errors_total.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric registration failed");
        }

        Self {
            registry,
            requests_total,
            failed_requests,
            request_duration,
            short_circuits_total,
            transport_errors_total,
            recovered_errors_total,
            active_streams,
            stream_chunks_total,
            stream_errors_total,
        }
    }

    pub fn record_short_circuit(&self) {
        self.short_circuits_total.inc();
    }

    pub fn record_transport_error(&self) {
        self.transport_errors_total.inc();
    }

    pub fn record_recovery(&self) {
        self.recovered_errors_total.inc();
    }

    pub fn stream_opened(&self) {
        self.active_streams.inc();
    }

    pub fn stream_closed(&self) {
        self.active_streams.dec();
    }

    pub fn record_stream_chunk(&self) {
        self.stream_chunks_total.inc();
    }

    pub fn record_stream_error(&self) {
        self.stream_errors_total.inc();
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition format
    pub fn encode_text(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new()
            .encode(&self.gather_metrics(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.requests_total.inc();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        self.metrics
            .request_duration
            .observe(self.start.elapsed().as_secs_f64());
    }

    pub fn fail(self) {
        self.metrics
            .request_duration
            .observe(self.start.elapsed().as_secs_f64());
        self.metrics.failed_requests.inc();
    }
}
