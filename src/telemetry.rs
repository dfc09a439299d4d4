//! Telemetry — Prometheus metrics for the transport, registry, and auth
//! surfaces. Tracing (structured logs) is configured separately in
//! `init_logging`; this module is the metrics half of the same ambient
//! observability stack the teacher carries.

use crate::Result;
use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, TextEncoder, register_counter_vec,
    register_gauge, register_histogram_vec,
};

static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpforge_http_requests_total",
        "Total number of HTTP requests handled by the transport router",
        &["path", "method", "status"]
    )
    .unwrap()
});

static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "mcpforge_http_request_duration_seconds",
            "Duration of HTTP requests in seconds"
        ),
        &["path", "method"]
    )
    .unwrap()
});

static TOOL_INVOCATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpforge_tool_invocations_total",
        "Total number of tool invocations",
        &["tool", "status"]
    )
    .unwrap()
});

static TOOL_INVOCATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "mcpforge_tool_invocation_duration_seconds",
            "Duration of tool invocations in seconds"
        ),
        &["tool"]
    )
    .unwrap()
});

static WORKFLOW_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpforge_workflow_runs_total",
        "Total number of workflow runs",
        &["workflow", "status"]
    )
    .unwrap()
});

static SESSIONS_ACTIVE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mcpforge_sessions_active", "Number of currently active MCP sessions").unwrap()
});

static SSE_STREAMS_ACTIVE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mcpforge_sse_streams_active", "Number of currently open SSE streams").unwrap()
});

static EVENT_STORE_APPENDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpforge_event_store_appends_total",
        "Total number of events appended to the event store",
        &["kind"]
    )
    .unwrap()
});

static OAUTH_GRANTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpforge_oauth_grants_total",
        "Total number of OAuth token grants issued",
        &["grant_type", "status"]
    )
    .unwrap()
});

static AUTH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpforge_auth_failures_total",
        "Total number of authentication failures on protected endpoints",
        &["error_code"]
    )
    .unwrap()
});

/// Registers the process start with the configured service name. Metrics
/// are self-registering via `once_cell`; this just emits the startup log
/// line the rest of the ambient stack expects.
pub fn init(service_name: &str) -> Result<()> {
    tracing::info!(service = service_name, "telemetry initialized");
    Ok(())
}

pub fn record_http_request(path: &str, method: &str, status_code: u16) {
    HTTP_REQUESTS_TOTAL.with_label_values(&[path, method, &status_code.to_string()]).inc();
}

pub fn record_http_duration(path: &str, method: &str, duration_secs: f64) {
    HTTP_REQUEST_DURATION.with_label_values(&[path, method]).observe(duration_secs);
}

pub fn record_tool_invocation(tool: &str, status: &str, duration_secs: f64) {
    TOOL_INVOCATIONS_TOTAL.with_label_values(&[tool, status]).inc();
    TOOL_INVOCATION_DURATION.with_label_values(&[tool]).observe(duration_secs);
}

pub fn record_workflow_run(workflow: &str, status: &str) {
    WORKFLOW_RUNS_TOTAL.with_label_values(&[workflow, status]).inc();
}

pub fn set_sessions_active(count: i64) {
    SESSIONS_ACTIVE.set(count as f64);
}

pub fn sse_stream_opened() {
    SSE_STREAMS_ACTIVE.inc();
}

pub fn sse_stream_closed() {
    SSE_STREAMS_ACTIVE.dec();
}

pub fn record_event_append(kind: &str) {
    EVENT_STORE_APPENDS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_oauth_grant(grant_type: &str, status: &str) {
    OAUTH_GRANTS_TOTAL.with_label_values(&[grant_type, status]).inc();
}

pub fn record_auth_failure(error_code: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[error_code]).inc();
}

/// Renders all registered metrics in Prometheus text exposition format,
/// served at `/status` alongside liveness info.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::McpError::system(format!("failed to encode metrics: {e}")))?;

    String::from_utf8(buffer).map_err(|e| crate::McpError::system(format!("metrics output was not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_renders_http_metrics() {
        record_http_request("/mcp", "POST", 200);
        record_http_duration("/mcp", "POST", 0.01);
        let rendered = render().unwrap();
        assert!(rendered.contains("mcpforge_http_requests_total"));
        assert!(rendered.contains("mcpforge_http_request_duration_seconds"));
    }

    #[test]
    fn records_tool_and_oauth_metrics() {
        record_tool_invocation("demo_tool", "ok", 0.002);
        record_oauth_grant("authorization_code", "ok");
        record_auth_failure("invalid_grant");
        let rendered = render().unwrap();
        assert!(rendered.contains("mcpforge_tool_invocations_total"));
        assert!(rendered.contains("mcpforge_oauth_grants_total"));
        assert!(rendered.contains("mcpforge_auth_failures_total"));
    }

    #[test]
    fn session_gauge_tracks_active_count() {
        set_sessions_active(3);
        let rendered = render().unwrap();
        assert!(rendered.contains("mcpforge_sessions_active 3"));
    }
}
