//! Prometheus metrics HTTP endpoint
//!
//! Exposes kiosk metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_CLASSIFY_BOUNDS, METRICS_NUM_BUCKETS,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
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
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_core_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);
    write_dialogue_metrics(&mut output, site_id, &summary);
    write_drop_metrics(&mut output, site_id, &summary);

    output
}

fn write_core_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_events_total",
        "Total events processed",
        MetricType::Counter,
        site,
        summary.events_total,
    );
    let _ = writeln!(output, "# HELP kiosk_events_per_sec Events processed per second");
    let _ = writeln!(output, "# TYPE kiosk_events_per_sec gauge");
    let _ = writeln!(output, "kiosk_events_per_sec{{site=\"{site}\"}} {:.2}", summary.events_per_sec);

    write_histogram(
        output,
        "kiosk_event_latency_us",
        "Event processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.lat_sum_us,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_visitor_present",
        "1 while a visitor stands in front of the kiosk",
        MetricType::Gauge,
        site,
        summary.present as u64,
    );

    let _ = writeln!(output, "# HELP kiosk_sessions_total Presence sessions by outcome");
    let _ = writeln!(output, "# TYPE kiosk_sessions_total counter");
    for (outcome, val) in [
        ("started", summary.sessions_started),
        ("completed", summary.sessions_completed),
        ("declined", summary.sessions_declined),
        ("abandoned", summary.sessions_abandoned),
    ] {
        let _ = writeln!(output, "kiosk_sessions_total{{site=\"{site}\",outcome=\"{outcome}\"}} {val}");
    }

    let _ = writeln!(output, "# HELP kiosk_dialogue_stage Current dialogue stage");
    let _ = writeln!(output, "# TYPE kiosk_dialogue_stage gauge");
    let _ = writeln!(output, "kiosk_dialogue_stage{{site=\"{site}\",stage=\"{}\"}} 1", summary.stage);

    write_metric(
        output,
        "kiosk_submissions_ok_total",
        "Visitor requests accepted by the registry",
        MetricType::Counter,
        site,
        summary.submissions_ok,
    );
    write_metric(
        output,
        "kiosk_submissions_failed_total",
        "Visitor requests rejected or not delivered",
        MetricType::Counter,
        site,
        summary.submissions_failed,
    );
}

fn write_dialogue_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_utterances_total",
        "Utterances finalized after silence",
        MetricType::Counter,
        site,
        summary.utterances_finalized,
    );
    write_metric(
        output,
        "kiosk_reprompts_total",
        "Stage questions re-issued after a speech device failure",
        MetricType::Counter,
        site,
        summary.reprompts,
    );
    write_metric(
        output,
        "kiosk_speech_timeouts_total",
        "Prompts abandoned after no synthesis finish arrived",
        MetricType::Counter,
        site,
        summary.speech_timeouts,
    );
    write_metric(
        output,
        "kiosk_classifications_total",
        "Intent classifier calls",
        MetricType::Counter,
        site,
        summary.classifications_total,
    );
    write_metric(
        output,
        "kiosk_classification_failures_total",
        "Intent classifier calls that failed",
        MetricType::Counter,
        site,
        summary.classification_failures,
    );
    write_metric(
        output,
        "kiosk_stale_results_total",
        "Classifier results ignored because another utterance was in flight",
        MetricType::Counter,
        site,
        summary.stale_results,
    );
    write_histogram(
        output,
        "kiosk_classify_latency_ms",
        "Intent classifier round trip in milliseconds",
        site,
        &summary.classify_buckets,
        &METRICS_CLASSIFY_BOUNDS,
        summary.classify_sum_ms,
    );
}

fn write_drop_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_events_dropped_total",
        "MQTT events dropped because the orchestrator queue was full",
        MetricType::Counter,
        site,
        summary.events_dropped,
    );
    write_metric(
        output,
        "kiosk_effects_dropped_total",
        "Collaborator calls dropped because the effect queue was full",
        MetricType::Counter,
        site,
        summary.effects_dropped,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
        }
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };

    Ok(response.unwrap_or_else(|e| {
        error!(error = %e, "prometheus_response_error");
        Response::new(Full::new(Bytes::new()))
    }))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
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
