//! Prometheus metrics HTTP server.
//!
//! Every request to the metrics path runs a fresh scrape of the cache
//! manager and renders it in the Prometheus text format, together with the
//! exporter's own statistics.

use std::collections::HashMap;
use std::fmt::Write;
use std::future::Future;
use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::aggregate::INFO_COMPOSITE_KEY;
use crate::catalog::{self, INFO_COMPOSITE_HELP};
use crate::collector::{Scrape, SquidCollector};
use crate::record::{Endpoint, Record};
use crate::stats::{EndpointSummary, StatsSummary};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build the exporter's router.
///
/// `/health` and `/` are only mounted when they do not clash with `metrics_path`.
pub fn router(collector: SquidCollector, metrics_path: &str) -> Router {
    let mut app = Router::new().route(metrics_path, get(metrics_handler));

    for health in ["/health", "/healthz"] {
        if health != metrics_path {
            app = app.route(health, get(health_handler));
        }
    }

    if metrics_path != "/" {
        let page = landing_page(metrics_path);
        app = app.route(
            "/",
            get(move || {
                let page = page.clone();
                async move { Html(page) }
            }),
        );
    }

    app.with_state(collector)
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves until `shutdown` resolves, then drains in-flight requests.
/// Returns an error if the server fails to bind to the address.
pub async fn start_metrics_server<F>(
    addr: SocketAddr,
    metrics_path: &str,
    collector: SquidCollector,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(collector, metrics_path);

    let listener = TcpListener::bind(addr).await?;
    info!(
        "Prometheus metrics server listening on http://{}{}",
        listener.local_addr()?,
        metrics_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "message": format!("{} is running normally.", env!("CARGO_PKG_NAME")),
        })),
    )
}

async fn metrics_handler(State(collector): State<SquidCollector>) -> impl IntoResponse {
    let scrape = collector.scrape().await;
    let output = format_prometheus_metrics(&scrape, &collector.stats().summary());
    (StatusCode::OK, [("content-type", CONTENT_TYPE)], output)
}

fn landing_page(metrics_path: &str) -> String {
    format!(
        "<html>\n<head><title>Squid Exporter</title></head>\n<body>\n\
         <h1>Squid Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         <p><a href=\"/health\">Health</a></p>\n\
         </body>\n</html>\n",
        path = metrics_path
    )
}

/// Format a scrape and the exporter statistics as Prometheus text format.
pub fn format_prometheus_metrics(scrape: &Scrape, summary: &StatsSummary) -> String {
    let mut output = String::with_capacity(16 * 1024);

    header(
        &mut output,
        "squid_up",
        "Was the last query of squid successful",
        "gauge",
    );
    let _ = writeln!(output, "squid_up {}", u8::from(scrape.up));

    for endpoint in Endpoint::ALL {
        let records = scrape.records(endpoint);
        let values = first_values(records);

        for series in catalog::series(endpoint) {
            if let Some(&value) = values.get(series.key.as_str()) {
                header(
                    &mut output,
                    &series.name,
                    &series.help,
                    series.kind.as_str(),
                );
                let _ = writeln!(output, "{} {}", series.name, format_value(value));
            }
        }

        if endpoint == Endpoint::Info
            && let Some(composite) = records.iter().find(|r| r.key == INFO_COMPOSITE_KEY)
        {
            header(
                &mut output,
                INFO_COMPOSITE_KEY,
                INFO_COMPOSITE_HELP,
                "gauge",
            );
            let _ = writeln!(
                output,
                "{}{} {}",
                INFO_COMPOSITE_KEY,
                format_labels(composite),
                format_value(composite.value)
            );
        }
    }

    format_exporter_metrics(&mut output, summary);
    output
}

fn format_exporter_metrics(output: &mut String, summary: &StatsSummary) {
    let per_endpoint: [(&str, &str, fn(&EndpointSummary) -> u64); 4] = [
        (
            "squid_exporter_scrapes_total",
            "Number of fetches of each cache manager report",
            |e| e.scrapes,
        ),
        (
            "squid_exporter_scrape_failures_total",
            "Number of failed fetches of each cache manager report",
            |e| e.failures,
        ),
        (
            "squid_exporter_lines_total",
            "Number of report lines received",
            |e| e.lines,
        ),
        (
            "squid_exporter_decode_failures_total",
            "Number of report lines that could not be decoded",
            |e| e.decode_failures,
        ),
    ];

    for (name, help, value) in per_endpoint {
        header(output, name, help, "counter");
        for e in &summary.endpoints {
            let _ = writeln!(
                output,
                "{}{{endpoint=\"{}\"}} {}",
                name,
                e.endpoint,
                value(e)
            );
        }
    }

    if let Some(ref p) = summary.duration_percentiles {
        let name = "squid_exporter_scrape_duration_seconds";
        header(
            output,
            name,
            "Duration of cache manager report fetches",
            "summary",
        );
        for (quantile, micros) in [("0.5", p.p50), ("0.9", p.p90), ("0.99", p.p99)] {
            let _ = writeln!(
                output,
                "{}{{quantile=\"{}\"}} {}",
                name,
                quantile,
                micros as f64 / 1e6
            );
        }
        let _ = writeln!(output, "{}_sum {}", name, p.mean * p.count as f64 / 1e6);
        let _ = writeln!(output, "{}_count {}", name, p.count);
    }

    header(
        output,
        "squid_exporter_uptime_seconds",
        "Time since the exporter started",
        "gauge",
    );
    let _ = writeln!(
        output,
        "squid_exporter_uptime_seconds {:.3}",
        summary.elapsed_secs
    );

    header(
        output,
        "squid_exporter_last_success_timestamp_seconds",
        "Unix time of the last successful counters fetch, 0 if none",
        "gauge",
    );
    let last = summary
        .last_success
        .map(|t| t.timestamp_millis() as f64 / 1000.0)
        .unwrap_or(0.0);
    let _ = writeln!(
        output,
        "squid_exporter_last_success_timestamp_seconds {}",
        last
    );
}

fn header(output: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP {} {}", name, escape_help(help));
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
}

// First occurrence wins when a report repeats a key
fn first_values(records: &[Record]) -> HashMap<&str, f64> {
    let mut values = HashMap::with_capacity(records.len());
    for record in records.iter().filter(|r| !r.is_labeled()) {
        values.entry(record.key.as_str()).or_insert(record.value);
    }
    values
}

fn format_labels(record: &Record) -> String {
    let labels: Vec<String> = record
        .labels
        .iter()
        .map(|l| {
            let value = escape_label_value(&l.value);
            format!("{}=\"{}\"", l.key, value)
        })
        .collect();
    format!("{{{}}}", labels.join(","))
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

/// Escape a label value for the text exposition format.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
