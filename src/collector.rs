//! One scrape of every report the exporter publishes.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::client::{CacheObjectClient, ClientError, EndpointScrape};
use crate::record::{Endpoint, Record};
use crate::stats::ScrapeStats;

/// Records gathered by a single scrape.
#[derive(Debug, Clone, Default)]
pub struct Scrape {
    /// Whether the counters report could be fetched.
    pub up: bool,
    pub counters: Vec<Record>,
    pub service_times: Vec<Record>,
    pub infos: Vec<Record>,
}

impl Scrape {
    /// Records of `endpoint`.
    pub fn records(&self, endpoint: Endpoint) -> &[Record] {
        match endpoint {
            Endpoint::Counters => &self.counters,
            Endpoint::ServiceTimes => &self.service_times,
            Endpoint::Info => &self.infos,
        }
    }
}

/// Fetches the three reports concurrently and keeps scrape statistics.
#[derive(Debug, Clone)]
pub struct SquidCollector {
    client: CacheObjectClient,
    extract_times: bool,
    stats: Arc<ScrapeStats>,
}

impl SquidCollector {
    pub fn new(client: CacheObjectClient, extract_times: bool, stats: Arc<ScrapeStats>) -> Self {
        Self {
            client,
            extract_times,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<ScrapeStats> {
        &self.stats
    }

    /// Run one scrape.
    ///
    /// A failed report contributes no records; only the counters report
    /// decides `up`.
    pub async fn scrape(&self) -> Scrape {
        let (counters, service_times, infos) = tokio::join!(
            self.fetch(Endpoint::Counters),
            async {
                if self.extract_times {
                    Some(self.fetch(Endpoint::ServiceTimes).await)
                } else {
                    debug!("Service times disabled, skipping");
                    None
                }
            },
            self.fetch(Endpoint::Info),
        );

        Scrape {
            up: counters.is_ok(),
            counters: counters.map(|s| s.records).unwrap_or_default(),
            service_times: service_times
                .and_then(Result::ok)
                .map(|s| s.records)
                .unwrap_or_default(),
            infos: infos.map(|s| s.records).unwrap_or_default(),
        }
    }

    async fn fetch(&self, endpoint: Endpoint) -> Result<EndpointScrape, ClientError> {
        let started = Instant::now();
        let result = self.client.fetch(endpoint).await;
        match &result {
            Ok(scrape) => self
                .stats
                .record_success(endpoint, scrape, started.elapsed()),
            Err(e) => {
                error!("Failed to fetch {}: {}", endpoint, e);
                self.stats.record_failure(endpoint, started.elapsed());
            }
        }
        result
    }
}
