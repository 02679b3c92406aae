//! Squid Exporter CLI - Serve Squid cache manager reports as Prometheus metrics.

use anyhow::{Context, Result};
use clap::Parser;
use squid_exporter::{
    CacheObjectClient,
    collector::SquidCollector,
    config::Config,
    metrics::{format_prometheus_metrics, start_metrics_server},
    stats::ScrapeStats,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Squid Exporter - Serve Squid cache manager reports as Prometheus metrics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "SQUID_EXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Squid hostname
    #[arg(long, env = "SQUID_HOSTNAME")]
    squid_hostname: Option<String>,

    /// Squid port
    #[arg(long, env = "SQUID_PORT")]
    squid_port: Option<u16>,

    /// Cache manager login
    #[arg(long, env = "SQUID_LOGIN")]
    squid_login: Option<String>,

    /// Cache manager password
    #[arg(long, env = "SQUID_PASSWORD", hide_env_values = true)]
    squid_password: Option<String>,

    /// Extra request header, repeatable (e.g. "X-Forwarded-For: 10.0.0.1")
    #[arg(long = "squid-header")]
    squid_headers: Vec<String>,

    /// Fetch service time percentiles
    #[arg(long, env = "SQUID_EXTRACT_TIMES")]
    extract_times: Option<bool>,

    /// Address for the metrics server
    #[arg(long, env = "SQUID_EXPORTER_LISTEN")]
    listen_address: Option<IpAddr>,

    /// Port for the metrics server
    #[arg(long, env = "SQUID_EXPORTER_PORT")]
    listen_port: Option<u16>,

    /// Path the metrics are served under
    #[arg(long, env = "SQUID_EXPORTER_METRICS_PATH")]
    metrics_path: Option<String>,

    /// Scrape once, print the metrics and exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Apply command line values on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(ref hostname) = self.squid_hostname {
            config.hostname = hostname.clone();
        }
        if let Some(port) = self.squid_port {
            config.port = port;
        }
        if let Some(ref login) = self.squid_login {
            config.login = login.clone();
        }
        if let Some(ref password) = self.squid_password {
            config.password = password.clone();
        }
        if !self.squid_headers.is_empty() {
            config.headers = self.squid_headers.clone();
        }
        if let Some(extract_times) = self.extract_times {
            config.extract_times = extract_times;
        }
        if let Some(address) = self.listen_address {
            config.listen_address = address;
        }
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(ref path) = self.metrics_path {
            config.metrics_path = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match args.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("Squid exporter starting...");
    info!("Squid: {}:{}", config.hostname, config.port);

    let stats = Arc::new(ScrapeStats::new());
    let client = CacheObjectClient::new(config.client_config());
    let collector = SquidCollector::new(client, config.extract_times, Arc::clone(&stats));

    if args.once {
        let scrape = collector.scrape().await;
        print!("{}", format_prometheus_metrics(&scrape, &stats.summary()));
        return Ok(());
    }

    start_metrics_server(
        config.listen_addr(),
        &config.metrics_path,
        collector,
        shutdown_signal(),
    )
    .await
    .context("Metrics server failed")?;

    // Print final statistics
    println!("\n\nFINAL STATISTICS");
    println!("{}", stats.summary());

    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "squid-exporter",
            "--squid-hostname",
            "cache.example.com",
            "--squid-port",
            "3129",
            "--squid-header",
            "X-A: 1",
            "--squid-header",
            "X-B: 2",
            "--extract-times",
            "false",
            "--metrics-path",
            "/squid",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.hostname, "cache.example.com");
        assert_eq!(config.port, 3129);
        assert_eq!(config.headers, vec!["X-A: 1", "X-B: 2"]);
        assert!(!config.extract_times);
        assert_eq!(config.metrics_path, "/squid");
    }

    #[test]
    fn test_no_args_keep_config() {
        let args = Args::try_parse_from(["squid-exporter", "--once"]).unwrap();
        assert!(args.once);

        let mut config = Config {
            login: "from-file".to_string(),
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.login, "from-file");
        assert!(config.extract_times);
    }
}
