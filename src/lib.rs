//! Squid Exporter - A Rust library and server for decoding Squid cache manager reports.
//!
//! This crate provides:
//! - nom-based line decoders for the `counters`, `service_times` and `info` reports
//! - An async `cache_object://` client that streams report lines as they arrive
//! - Aggregation of decoded lines into per-report record sets
//! - Scrape statistics with HDR histograms and a Prometheus exposition server
//!
//! # Example
//!
//! ```rust,no_run
//! use squid_exporter::{CacheObjectClient, ClientConfig};
//!
//! # async fn run() -> Result<(), squid_exporter::ClientError> {
//! let client = CacheObjectClient::new(ClientConfig::default().with_server("localhost", 3128));
//! for record in client.get_infos().await? {
//!     println!("{}", record);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod catalog;
pub mod client;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod metrics;
pub mod record;
pub mod stats;

pub use aggregate::{Aggregator, aggregate_lines};
pub use client::{CacheObjectClient, ClientConfig, ClientError, Credentials, LineSource};
pub use collector::{Scrape, SquidCollector};
pub use config::Config;
pub use decoder::{DecodeError, decode_line};
pub use record::{Endpoint, Label, Record, normalize_key};
pub use stats::{ScrapeStats, StatsSummary};
