//! Prometheus metrics HTTP endpoint
//!
//! Serves sorter counters in Prometheus text format at /metrics, a liveness
//! probe at /health and the machine snapshot as JSON at /status.

use crate::domain::cycle::{MachineState, SessionStats};
use crate::domain::types::{Slot, UserId};
use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_CYCLE_BOUNDS, METRICS_LEDGER_BOUNDS, METRICS_NUM_BUCKETS,
};
use crate::services::session::SessionHandle;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Counter split by slot label
fn write_slot_counter(output: &mut String, name: &str, help: &str, site: &str, values: &[u64; 3]) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for slot in Slot::ALL {
        let _ = writeln!(
            output,
            "{name}{{site=\"{site}\",slot=\"{}\"}} {}",
            slot.as_str(),
            values[slot.index()]
        );
    }
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_cycle_metrics(&mut output, site_id, &summary);
    write_motion_metrics(&mut output, site_id, &summary);
    write_fault_metrics(&mut output, site_id, &summary);
    write_ledger_metrics(&mut output, site_id, &summary);

    output
}

fn write_cycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "sorter_cycles_total", "Sort cycles completed", MetricType::Counter, site, summary.cycles_total);
    write_slot_counter(output, "sorter_items_sorted_total", "Items ejected into a slot", site, &summary.sorted);
    write_metric(
        output,
        "sorter_points_total",
        "Points credited to operators",
        MetricType::Counter,
        site,
        summary.points_total,
    );
    write_histogram(
        output,
        "sorter_cycle_duration_ms",
        "Sort cycle duration in milliseconds",
        site,
        &summary.cycle_buckets,
        &METRICS_CYCLE_BOUNDS,
        summary.cycle_avg_ms,
    );
    write_metric(
        output,
        "sorter_cycle_duration_p95_ms",
        "95th percentile sort cycle duration",
        MetricType::Gauge,
        site,
        summary.cycle_p95_ms,
    );
}

fn write_motion_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP sorter_seek_outcomes_total Positioning outcomes");
    let _ = writeln!(output, "# TYPE sorter_seek_outcomes_total counter");
    for (outcome, val) in
        [("reached", summary.seek_reached), ("blocked", summary.seek_blocked), ("timed_out", summary.seek_timed_out)]
    {
        let _ = writeln!(output, "sorter_seek_outcomes_total{{site=\"{site}\",outcome=\"{outcome}\"}} {val}");
    }
    write_metric(
        output,
        "sorter_seek_attempts_total",
        "Forward drive attempts while positioning",
        MetricType::Counter,
        site,
        summary.seek_attempts,
    );
    write_metric(
        output,
        "sorter_home_failures_total",
        "Return-home timeouts",
        MetricType::Counter,
        site,
        summary.home_failures,
    );
}

fn write_fault_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sorter_classification_misses_total",
        "Frames without a usable label",
        MetricType::Counter,
        site,
        summary.classification_misses,
    );
    write_metric(output, "sorter_camera_faults_total", "Camera read failures", MetricType::Counter, site, summary.camera_faults);
    write_metric(
        output,
        "sorter_camera_reconnects_total",
        "Camera reconnect attempts",
        MetricType::Counter,
        site,
        summary.camera_reconnects,
    );
    write_metric(
        output,
        "sorter_rangefinder_faults_total",
        "Rangefinder readings without an echo",
        MetricType::Counter,
        site,
        summary.rangefinder_faults,
    );
    write_metric(output, "sorter_gpio_faults_total", "GPIO errors", MetricType::Counter, site, summary.gpio_faults);
}

fn write_ledger_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sorter_ledger_submitted_total",
        "Point submissions accepted by the backend",
        MetricType::Counter,
        site,
        summary.ledger_submitted,
    );
    write_metric(
        output,
        "sorter_ledger_failures_total",
        "Point submissions rejected or failed",
        MetricType::Counter,
        site,
        summary.ledger_failures,
    );
    write_metric(
        output,
        "sorter_ledger_dropped_total",
        "Point submissions dropped on a full queue",
        MetricType::Counter,
        site,
        summary.ledger_dropped,
    );
    write_histogram(
        output,
        "sorter_ledger_latency_ms",
        "Ledger request latency in milliseconds",
        site,
        &summary.ledger_buckets,
        &METRICS_LEDGER_BOUNDS,
        summary.ledger_avg_ms,
    );
}

/// Body of GET /status
#[derive(Debug, Serialize)]
struct StatusBody {
    site: String,
    machine: MachineState,
    user: Option<UserId>,
    session: Option<SessionStats>,
}

fn format_status(site_id: &str, state: &watch::Receiver<MachineState>, session: &SessionHandle) -> String {
    let body = StatusBody {
        site: site_id.to_string(),
        machine: *state.borrow(),
        user: session.current_user(),
        session: session.stats(),
    };
    serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string())
}

/// Shared state handed to every connection
#[derive(Clone)]
pub struct StatusSources {
    pub metrics: Arc<Metrics>,
    pub site_id: Arc<String>,
    pub state: watch::Receiver<MachineState>,
    pub session: SessionHandle,
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    sources: StatusSources,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&sources.metrics, &sources.site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        (&Method::GET, "/status") => {
            let body = format_status(&sources.site_id, &sources.state, &sources.session);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .header("Access-Control-Allow-Origin", "*")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the metrics/status HTTP server
pub async fn start_metrics_server(
    port: u16,
    sources: StatusSources,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %sources.site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let sources = sources.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let sources = sources.clone();
                                async move { handle_request(req, sources).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
