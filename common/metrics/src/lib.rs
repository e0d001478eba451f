use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use health::HealthRegistry;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

// Histogram buckets in milliseconds, spanning a fast-path round-trip on the
// low end up to a document apply riding out its full deadline.
const BUCKETS_MS: &[f64] = &[
    0.5, 2.0, 8.0, 25.0, 75.0, 200.0, 600.0, 1500.0, 4000.0, 8000.0, 15000.0,
];

pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(BUCKETS_MS)
        .expect("bucket list is non-empty")
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

/// Serve the operational endpoints of a pipeline service: `/_liveness`
/// backed by the health registry and `/metrics` in prometheus exposition
/// format, with request accounting on both. Installs the recorder, so call
/// it once per process.
pub async fn serve_health_and_metrics(
    bind: &str,
    registry: HealthRegistry,
) -> Result<(), std::io::Error> {
    let recorder = install_recorder();
    let router = Router::new()
        .route(
            "/_liveness",
            get(move || std::future::ready(registry.get_status())),
        )
        .route("/metrics", get(move || std::future::ready(recorder.render())))
        .layer(axum::middleware::from_fn(track_requests));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Serving health and metrics on {}", bind);
    axum::serve(listener, router).await
}

/// Middleware recording a count and duration histogram per route.
async fn track_requests(req: Request<Body>, next: Next) -> impl IntoResponse {
    let method = req.method().to_string();
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_ms", &labels).record(elapsed_ms);

    response
}

/// Times a scope and reports it to the named histogram, in milliseconds,
/// when dropped. Labels can be attached as the scope learns its outcome.
pub struct TimingGuard {
    name: &'static str,
    labels: Vec<(&'static str, &'static str)>,
    start: Instant,
}

pub fn timing_guard(name: &'static str) -> TimingGuard {
    TimingGuard {
        name,
        labels: Vec::new(),
        start: Instant::now(),
    }
}

impl TimingGuard {
    /// Consumes and returns the guard, so tagging an outcome and reporting
    /// right away is a one-liner (simply don't re-bind the return value).
    pub fn label(mut self, key: &'static str, value: &'static str) -> Self {
        self.labels.push((key, value));
        self
    }

    /// Report now, by dropping. Makes the call site say what's happening.
    pub fn fin(self) {}
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        metrics::histogram!(self.name, &self.labels)
            .record(self.start.elapsed().as_millis() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_accumulate_in_order() {
        let guard = timing_guard("test_histogram")
            .label("outcome", "success")
            .label("source", "unit");
        assert_eq!(
            guard.labels,
            vec![("outcome", "success"), ("source", "unit")]
        );
        guard.fin();
    }
}
