//! Statistics tracking for scrapes of the cache manager.
//!
//! This module keeps per-endpoint counters (scrapes, failures, lines and
//! decode failures) plus an HDR histogram of scrape latency, and turns them
//! into a serializable summary for the exposition layer.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::client::EndpointScrape;
use crate::record::Endpoint;

/// Longest scrape the histogram can hold, in microseconds.
const MAX_SCRAPE_MICROS: u64 = 120_000_000;

/// Counters for a single endpoint.
#[derive(Debug, Default)]
pub struct EndpointStats {
    /// Fetches attempted
    pub scrapes: AtomicU64,

    /// Fetches that failed at the connection or status level
    pub failures: AtomicU64,

    /// Body lines received
    pub lines: AtomicU64,

    /// Lines that could not be decoded
    pub decode_failures: AtomicU64,
}

/// Thread-safe statistics collector for scrapes.
#[derive(Debug)]
pub struct ScrapeStats {
    endpoints: [EndpointStats; 3],

    /// Histogram of per-endpoint fetch durations in microseconds
    duration_histogram: RwLock<Histogram<u64>>,

    /// When the counters endpoint was last fetched successfully
    last_success: RwLock<Option<DateTime<Utc>>>,

    /// When stats collection started
    start_time: Instant,
}

impl ScrapeStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            endpoints: Default::default(),
            // 1us to 2 minutes, 3 significant figures
            duration_histogram: RwLock::new(
                Histogram::new_with_bounds(1, MAX_SCRAPE_MICROS, 3)
                    .expect("Failed to create duration histogram"),
            ),
            last_success: RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    /// Counters for `endpoint`.
    pub fn endpoint(&self, endpoint: Endpoint) -> &EndpointStats {
        &self.endpoints[endpoint.index()]
    }

    /// Record a successful fetch.
    pub fn record_success(&self, endpoint: Endpoint, scrape: &EndpointScrape, duration: Duration) {
        let stats = self.endpoint(endpoint);
        stats.scrapes.fetch_add(1, Ordering::Relaxed);
        stats.lines.fetch_add(scrape.lines as u64, Ordering::Relaxed);
        stats
            .decode_failures
            .fetch_add(scrape.skipped as u64, Ordering::Relaxed);
        self.record_duration(duration);

        if endpoint == Endpoint::Counters
            && let Ok(mut last) = self.last_success.write()
        {
            *last = Some(Utc::now());
        }
    }

    /// Record a fetch that failed before any line was decoded.
    pub fn record_failure(&self, endpoint: Endpoint, duration: Duration) {
        let stats = self.endpoint(endpoint);
        stats.scrapes.fetch_add(1, Ordering::Relaxed);
        stats.failures.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    fn record_duration(&self, duration: Duration) {
        let micros = (duration.as_micros() as u64).clamp(1, MAX_SCRAPE_MICROS);
        if let Ok(mut hist) = self.duration_histogram.write() {
            let _ = hist.record(micros);
        }
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let endpoints = Endpoint::ALL
            .iter()
            .map(|&endpoint| {
                let stats = self.endpoint(endpoint);
                EndpointSummary {
                    endpoint,
                    scrapes: stats.scrapes.load(Ordering::Relaxed),
                    failures: stats.failures.load(Ordering::Relaxed),
                    lines: stats.lines.load(Ordering::Relaxed),
                    decode_failures: stats.decode_failures.load(Ordering::Relaxed),
                }
            })
            .collect();

        let duration_percentiles = self
            .duration_histogram
            .read()
            .ok()
            .filter(|h| !h.is_empty())
            .map(|h| HistogramPercentiles {
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p99: h.value_at_quantile(0.99),
                min: h.min(),
                max: h.max(),
                mean: h.mean(),
                count: h.len(),
            });

        let last_success = self.last_success.read().ok().and_then(|t| *t);

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            endpoints,
            duration_percentiles,
            last_success,
        }
    }
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub count: u64,
}

/// Counters of one endpoint at summary time.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub endpoint: Endpoint,
    pub scrapes: u64,
    pub failures: u64,
    pub lines: u64,
    pub decode_failures: u64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub endpoints: Vec<EndpointSummary>,
    /// Fetch durations in microseconds; `None` until the first fetch
    pub duration_percentiles: Option<HistogramPercentiles>,
    pub last_success: Option<DateTime<Utc>>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        for e in &self.endpoints {
            writeln!(
                f,
                "  {:<14} scrapes: {}, failures: {}, lines: {}, decode failures: {}",
                e.endpoint, e.scrapes, e.failures, e.lines, e.decode_failures
            )?;
        }
        if let Some(ref p) = self.duration_percentiles {
            writeln!(
                f,
                "Fetch latency (ms): P50: {:.1}, P90: {:.1}, P99: {:.1}, Max: {:.1}",
                p.p50 as f64 / 1000.0,
                p.p90 as f64 / 1000.0,
                p.p99 as f64 / 1000.0,
                p.max as f64 / 1000.0
            )?;
        }
        match self.last_success {
            Some(t) => writeln!(f, "Last successful scrape: {}", t.to_rfc3339()),
            None => writeln!(f, "Last successful scrape: never"),
        }
    }
}
