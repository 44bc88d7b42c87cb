//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
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
    bounds: &[u64; METRICS_NUM_BUCKETS - 1],
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
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_sample_metrics(&mut output, site_id, &summary);
    write_zone_metrics(&mut output, site_id, &summary);
    write_notification_metrics(&mut output, site_id, &summary);
    write_delivery_metrics(&mut output, site_id, &summary);

    output
}

fn write_sample_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "safezone_samples_total",
        "Position samples evaluated",
        MetricType::Counter,
        site,
        summary.samples_total,
    );
    let _ = writeln!(output, "# HELP safezone_samples_per_sec Samples evaluated per second");
    let _ = writeln!(output, "# TYPE safezone_samples_per_sec gauge");
    let _ = writeln!(output, "safezone_samples_per_sec{{site=\"{site}\"}} {:.2}", summary.samples_per_sec);

    write_histogram(
        output,
        "safezone_sample_latency_us",
        "Sample evaluation latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "safezone_sample_latency_p99_us",
        "99th percentile sample latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );

    write_metric(
        output,
        "safezone_samples_out_of_order_total",
        "Samples discarded as older than the last accepted one",
        MetricType::Counter,
        site,
        summary.samples_out_of_order,
    );
    write_metric(
        output,
        "safezone_samples_low_accuracy_total",
        "Samples skipped for poor horizontal accuracy",
        MetricType::Counter,
        site,
        summary.samples_low_accuracy,
    );
    write_metric(
        output,
        "safezone_samples_invalid_total",
        "Samples with out-of-range coordinates",
        MetricType::Counter,
        site,
        summary.samples_invalid,
    );
    write_metric(
        output,
        "safezone_position_errors_total",
        "Position source errors",
        MetricType::Counter,
        site,
        summary.position_errors,
    );
    write_metric(
        output,
        "safezone_position_timeouts_total",
        "Position requests that timed out",
        MetricType::Counter,
        site,
        summary.position_timeouts,
    );
}

fn write_zone_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "safezone_zones_inside",
        "Zones the entity is currently inside",
        MetricType::Gauge,
        site,
        summary.zones_inside,
    );
    write_metric(output, "safezone_zone_enters_total", "Zone enters", MetricType::Counter, site, summary.zone_enters);
    write_metric(output, "safezone_zone_exits_total", "Zone exits", MetricType::Counter, site, summary.zone_exits);
}

fn write_notification_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "safezone_candidates_total",
        "Notification candidates produced",
        MetricType::Counter,
        site,
        summary.candidates_total,
    );
    write_metric(
        output,
        "safezone_candidates_discarded_total",
        "Candidates discarded at session stop",
        MetricType::Counter,
        site,
        summary.candidates_discarded,
    );
    write_metric(
        output,
        "safezone_notifications_admitted_total",
        "Notifications admitted",
        MetricType::Counter,
        site,
        summary.notifications_admitted,
    );
    write_metric(
        output,
        "safezone_notifications_upgraded_total",
        "Notifications replaced by a higher-priority duplicate",
        MetricType::Counter,
        site,
        summary.notifications_upgraded,
    );
    write_metric(
        output,
        "safezone_notifications_deduplicated_total",
        "Duplicate notifications dropped",
        MetricType::Counter,
        site,
        summary.notifications_deduplicated,
    );
    write_metric(
        output,
        "safezone_notifications_unread",
        "Unread notifications",
        MetricType::Gauge,
        site,
        summary.unread,
    );
}

fn write_delivery_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "safezone_push_sent_total", "Push messages sent", MetricType::Counter, site, summary.push_sent);
    write_metric(
        output,
        "safezone_push_failed_total",
        "Push messages that failed after retry",
        MetricType::Counter,
        site,
        summary.push_failed,
    );
    write_metric(
        output,
        "safezone_audible_played_total",
        "Alert tones played",
        MetricType::Counter,
        site,
        summary.audible_played,
    );
    write_metric(
        output,
        "safezone_channel_reconciles_total",
        "Store reconciles after reconnect",
        MetricType::Counter,
        site,
        summary.channel_reconciles,
    );
    write_metric(
        output,
        "safezone_buffered_ops",
        "Store writes waiting for reconnect",
        MetricType::Gauge,
        site,
        summary.buffered_ops,
    );
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_sample_processed(150);
        metrics.record_sample_processed(250);
        metrics.record_zone_enter();
        metrics.set_zones_inside(1);
        metrics.record_push_failed();

        let output = format_prometheus_metrics(&metrics, "mumbai");

        assert!(output.contains("safezone_samples_total{site=\"mumbai\"} 2"));
        assert!(output.contains("safezone_sample_latency_us_bucket{site=\"mumbai\",le=\"+Inf\"} 2"));
        assert!(output.contains("safezone_zone_enters_total{site=\"mumbai\"} 1"));
        assert!(output.contains("safezone_zones_inside{site=\"mumbai\"} 1"));
        assert!(output.contains("safezone_push_failed_total{site=\"mumbai\"} 1"));
    }
}
