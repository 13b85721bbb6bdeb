//! Health and HTTP metrics.
//!
//! [`HttpMetrics`] feeds OpenTelemetry instruments on the global meter
//! provider (no-ops until the binary installs one) and keeps local tallies
//! rendered in Prometheus text format on `GET /metrics`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

const METER: &str = "postwork";
const REQUEST_COUNT: &str = "api_http_request_count";
const REQUEST_LATENCY: &str = "api_http_request_latency";
const INTERNAL_ERRORS: &str = "api_internal_error_count";

/// Readiness view served by the `/healthz` endpoints.
///
/// Only the components a process actually runs are reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<bool>,
}

impl HealthReport {
    /// HTTP process: the producer accepted a ping and the store is connected.
    pub fn api(producer: bool, database: bool) -> Self {
        Self {
            ready: producer && database,
            producer: Some(producer),
            database: Some(database),
            consumer: None,
        }
    }

    /// Worker process: attached to the topic and the store is connected.
    pub fn worker(consumer: bool, database: bool) -> Self {
        Self {
            ready: consumer && database,
            producer: None,
            database: Some(database),
            consumer: Some(consumer),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RouteStats {
    count: u64,
    latency_ms_sum: f64,
}

#[derive(Debug, Default)]
struct Tallies {
    /// (method, endpoint)
    routes: BTreeMap<(String, String), RouteStats>,
    /// (error type, method)
    errors: BTreeMap<(String, String), u64>,
}

/// Request count, request latency and internal errors of the HTTP API.
#[derive(Debug)]
pub struct HttpMetrics {
    requests: Counter<u64>,
    latency: Histogram<f64>,
    internal_errors: Counter<u64>,
    tallies: Mutex<Tallies>,
}

impl HttpMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter(METER);
        Self {
            requests: meter
                .u64_counter(REQUEST_COUNT)
                .with_description("The number of HTTP requests.")
                .build(),
            latency: meter
                .f64_histogram(REQUEST_LATENCY)
                .with_description("The latency of HTTP requests.")
                .with_unit("ms")
                .build(),
            internal_errors: meter
                .u64_counter(INTERNAL_ERRORS)
                .with_description("The number of internal errors.")
                .build(),
            tallies: Mutex::new(Tallies::default()),
        }
    }

    pub fn record_request(&self, method: &str, endpoint: &str, elapsed: Duration) {
        let millis = elapsed.as_nanos() as f64 / 1_000_000.0;
        let attributes = [
            KeyValue::new("method", method.to_string()),
            KeyValue::new("endpoint", endpoint.to_string()),
        ];
        self.requests.add(1, &attributes);
        self.latency.record(millis, &attributes);

        let mut tallies = self.tallies();
        let stats = tallies
            .routes
            .entry((method.to_string(), endpoint.to_string()))
            .or_default();
        stats.count += 1;
        stats.latency_ms_sum += millis;
    }

    pub fn record_internal_error(&self, kind: ErrorKind, method: &str) {
        let attributes = [
            KeyValue::new("type", kind.as_str()),
            KeyValue::new("method", method.to_string()),
        ];
        self.internal_errors.add(1, &attributes);

        *self
            .tallies()
            .errors
            .entry((kind.as_str().to_string(), method.to_string()))
            .or_default() += 1;
    }

    pub fn request_count(&self, method: &str, endpoint: &str) -> u64 {
        self.tallies()
            .routes
            .get(&(method.to_string(), endpoint.to_string()))
            .map_or(0, |stats| stats.count)
    }

    pub fn internal_error_count(&self, kind: ErrorKind, method: &str) -> u64 {
        self.tallies()
            .errors
            .get(&(kind.as_str().to_string(), method.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Prometheus text exposition of the local tallies.
    pub fn render(&self) -> String {
        let tallies = self.tallies();
        let mut out = String::new();

        let _ = writeln!(out, "# HELP {REQUEST_COUNT} The number of HTTP requests.");
        let _ = writeln!(out, "# TYPE {REQUEST_COUNT} counter");
        for ((method, endpoint), stats) in &tallies.routes {
            let set = route_labels(method, endpoint);
            let _ = writeln!(out, "{REQUEST_COUNT}{set} {}", stats.count);
        }

        let _ = writeln!(out, "# HELP {REQUEST_LATENCY} The latency of HTTP requests.");
        let _ = writeln!(out, "# TYPE {REQUEST_LATENCY} summary");
        for ((method, endpoint), stats) in &tallies.routes {
            let set = route_labels(method, endpoint);
            let _ = writeln!(out, "{REQUEST_LATENCY}_sum{set} {}", stats.latency_ms_sum);
            let _ = writeln!(out, "{REQUEST_LATENCY}_count{set} {}", stats.count);
        }

        let _ = writeln!(out, "# HELP {INTERNAL_ERRORS} The number of internal errors.");
        let _ = writeln!(out, "# TYPE {INTERNAL_ERRORS} counter");
        for ((kind, method), count) in &tallies.errors {
            let set = labels(&[("type", kind.as_str()), ("method", method.as_str())]);
            let _ = writeln!(out, "{INTERNAL_ERRORS}{set} {count}");
        }
        out
    }

    fn tallies(&self) -> MutexGuard<'_, Tallies> {
        self.tallies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn route_labels(method: &str, endpoint: &str) -> String {
    labels(&[("method", method), ("endpoint", endpoint)])
}

fn labels(pairs: &[(&str, &str)]) -> String {
    let body = pairs
        .iter()
        .map(|(name, value)| {
            let value = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");
            format!("{name}=\"{value}\"")
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_needs_every_component() {
        assert!(HealthReport::api(true, true).ready);
        assert!(!HealthReport::api(true, false).ready);
        assert!(!HealthReport::worker(false, true).ready);
    }

    #[test]
    fn absent_components_are_not_serialized() {
        let v = serde_json::to_value(HealthReport::api(true, true)).unwrap();
        assert_eq!(v, serde_json::json!({"ready": true, "producer": true, "database": true}));
    }

    #[test]
    fn requests_are_tallied_per_method_and_endpoint() {
        let metrics = HttpMetrics::new();
        metrics.record_request("GET", "/healthz", Duration::from_millis(2));
        metrics.record_request("GET", "/healthz", Duration::from_millis(4));
        metrics.record_request("POST", "/messages", Duration::from_millis(10));

        assert_eq!(metrics.request_count("GET", "/healthz"), 2);
        assert_eq!(metrics.request_count("POST", "/messages"), 1);
        assert_eq!(metrics.request_count("GET", "/messages"), 0);

        let text = metrics.render();
        assert!(text.contains(r#"api_http_request_count{method="GET",endpoint="/healthz"} 2"#));
        let latency = r#"api_http_request_latency_sum{method="GET",endpoint="/healthz"} 6"#;
        assert!(text.contains(latency));
        assert!(text.contains("# TYPE api_http_request_latency summary"));
    }

    #[test]
    fn internal_errors_are_labelled_by_kind() {
        let metrics = HttpMetrics::new();
        metrics.record_internal_error(ErrorKind::Connection, "POST");

        assert_eq!(metrics.internal_error_count(ErrorKind::Connection, "POST"), 1);
        assert!(
            metrics
                .render()
                .contains(r#"api_internal_error_count{type="connection",method="POST"} 1"#)
        );
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(labels(&[("endpoint", "a\"b")]), r#"{endpoint="a\"b"}"#);
    }
}
