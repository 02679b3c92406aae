//! The series the exporter publishes for each report.
//!
//! Records whose key is not listed here are still decoded and counted, they
//! simply have no exported series.

use std::sync::LazyLock;

use crate::record::Endpoint;

/// Prometheus metric type of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// One exported series and the record key that feeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub key: String,
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
}

// (section, counter, suffix, help)
#[rustfmt::skip]
const COUNTERS: &[(&str, &str, &str, &str)] = &[
    ("client_http", "requests", "total", "The total number of client requests"),
    ("client_http", "hits", "total", "The total number of client cache hits"),
    ("client_http", "errors", "total", "The total number of client http errors"),
    ("client_http", "kbytes_in", "kbytes_total", "The total number of client kbytes received"),
    ("client_http", "kbytes_out", "kbytes_total", "The total number of client kbytes transferred"),
    ("client_http", "hit_kbytes_out", "bytes_total", "The total number of client kbytes cache hit"),
    ("server.http", "requests", "total", "The total number of server http requests"),
    ("server.http", "errors", "total", "The total number of server http errors"),
    ("server.http", "kbytes_in", "kbytes_total", "The total number of server http kbytes received"),
    ("server.http", "kbytes_out", "kbytes_total", "The total number of server http kbytes transferred"),
    ("server.all", "requests", "total", "The total number of server all requests"),
    ("server.all", "errors", "total", "The total number of server all errors"),
    ("server.all", "kbytes_in", "kbytes_total", "The total number of server kbytes received"),
    ("server.all", "kbytes_out", "kbytes_total", "The total number of server kbytes transferred"),
    ("server.ftp", "requests", "total", "The total number of server ftp requests"),
    ("server.ftp", "errors", "total", "The total number of server ftp errors"),
    ("server.ftp", "kbytes_in", "kbytes_total", "The total number of server ftp kbytes received"),
    ("server.ftp", "kbytes_out", "kbytes_total", "The total number of server ftp kbytes transferred"),
    ("server.other", "requests", "total", "The total number of server other requests"),
    ("server.other", "errors", "total", "The total number of server other errors"),
    ("server.other", "kbytes_in", "kbytes_total", "The total number of server other kbytes received"),
    ("server.other", "kbytes_out", "kbytes_total", "The total number of server other kbytes transferred"),
    ("swap", "ins", "total", "The number of objects read from disk"),
    ("swap", "outs", "total", "The number of objects saved to disk"),
    (
        "swap",
        "files_cleaned",
        "total",
        "The number of orphaned cache files removed by the periodic cleanup procedure",
    ),
];

// (section, counter, highest percentile)
const SERVICE_TIMES: &[(&str, Option<&str>, u32)] = &[
    ("HTTP_Requests", Some("All"), 100),
    ("Cache_Misses", None, 95),
    ("Cache_Hits", None, 95),
    ("Near_Hits", None, 95),
    ("DNS_Lookups", None, 95),
];

const SERVICE_TIME_HELP: &str = "Service Time Percentiles 5min";

// (key, description, unit)
const INFOS: &[(&str, Option<&str>, &str)] = &[
    ("Number_of_clients_accessing_cache", None, "number"),
    ("Number_of_HTTP_requests_received", None, "number"),
    ("Number_of_ICP_messages_received", None, "number"),
    ("Number_of_ICP_messages_sent", None, "number"),
    ("Number_of_queued_ICP_replies", None, "number"),
    ("Number_of_HTCP_messages_received", None, "number"),
    ("Number_of_HTCP_messages_sent", None, "number"),
    ("Request_failure_ratio", None, "%"),
    ("Average_HTTP_requests_per_minute_since_start", None, "%"),
    ("Average_ICP_messages_per_minute_since_start", None, "%"),
    ("Select_loop_called", None, "number"),
    ("Hits_as_%_of_all_requests_5min", None, "%"),
    ("Hits_as_%_of_bytes_sent_5min", None, "%"),
    ("Memory_hits_as_%_of_hit_requests_5min", None, "%"),
    ("Disk_hits_as_%_of_hit_requests_5min", None, "%"),
    ("Hits_as_%_of_all_requests_60min", None, "%"),
    ("Hits_as_%_of_bytes_sent_60min", None, "%"),
    ("Memory_hits_as_%_of_hit_requests_60min", None, "%"),
    ("Disk_hits_as_%_of_hit_requests_60min", None, "%"),
    ("Storage_Swap_size", None, "KB"),
    ("Storage_Swap_capacity", None, "% use"),
    ("Storage_Mem_size", None, "KB"),
    ("Storage_Mem_capacity", None, "% used"),
    ("Mean_Object_Size", None, "KB"),
    ("Requests_given_to_unlinkd", None, "number"),
    ("UP_Time", Some("time squid is up"), "seconds"),
    ("CPU_Time", None, "seconds"),
    ("CPU_Usage", Some("of cpu usage"), "%"),
    ("CPU_Usage_5_minute_avg", Some("of cpu usage"), "%"),
    ("CPU_Usage_60_minute_avg", Some("of cpu usage"), "%"),
    ("Maximum_Resident_Size", None, "KB"),
    ("Page_faults_with_physical_io", None, "number"),
    ("Total_accounted", None, "KB"),
    ("memPoolAlloc_calls", None, "number"),
    ("memPoolFree_calls", None, "number"),
    ("Maximum_number_of_file_descriptors", None, "number"),
    ("Largest_file_desc_currently_in_use", None, "number"),
    ("Number_of_file_desc_currently_in_use", None, "number"),
    ("Files_queued_for_open", None, "number"),
    ("Available_number_of_file_descriptors", None, "number"),
    ("Reserved_number_of_file_descriptors", None, "number"),
    ("Store_Disk_files_open", None, "number"),
    ("StoreEntries", None, "number"),
    ("StoreEntries_with_MemObjects", None, "number"),
    ("Hot_Object_Cache_Items", None, "number"),
    ("on_disk_objects", None, "number"),
];

/// Help text of the composite identity series.
pub const INFO_COMPOSITE_HELP: &str = "Squid build and service information";

static COUNTER_SERIES: LazyLock<Vec<Series>> = LazyLock::new(|| {
    COUNTERS
        .iter()
        .map(|&(section, counter, suffix, help)| Series {
            key: format!("{}.{}", section, counter),
            name: format!(
                "squid_{}_{}_{}",
                replace_non_alphanumeric(section),
                counter,
                suffix
            ),
            help: help.to_string(),
            kind: MetricKind::Counter,
        })
        .collect()
});

static SERVICE_TIME_SERIES: LazyLock<Vec<Series>> = LazyLock::new(|| {
    SERVICE_TIMES
        .iter()
        .flat_map(|&(section, counter, max_pct)| {
            (5..=max_pct).step_by(5).map(move |pct| {
                let key = match counter {
                    Some(counter) => format!("{}_{}_{}", section, counter, pct),
                    None => format!("{}_{}", section, pct),
                };
                Series {
                    name: format!("squid_{}", key),
                    key,
                    help: SERVICE_TIME_HELP.to_string(),
                    kind: MetricKind::Gauge,
                }
            })
        })
        .collect()
});

static INFO_SERIES: LazyLock<Vec<Series>> = LazyLock::new(|| {
    INFOS
        .iter()
        .map(|&(key, description, unit)| {
            let help = match description {
                Some(d) => d.to_string(),
                None => key.replace('_', " "),
            };
            Series {
                key: key.to_string(),
                name: format!("squid_info_{}", key.replace('%', "pct")),
                help: format!("{} in {}", help, unit),
                kind: MetricKind::Gauge,
            }
        })
        .collect()
});

/// Series exported for `endpoint`, in exposition order.
pub fn series(endpoint: Endpoint) -> &'static [Series] {
    match endpoint {
        Endpoint::Counters => COUNTER_SERIES.as_slice(),
        Endpoint::ServiceTimes => SERVICE_TIME_SERIES.as_slice(),
        Endpoint::Info => INFO_SERIES.as_slice(),
    }
}

fn replace_non_alphanumeric(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::normalize_key;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_sizes() {
        assert_eq!(series(Endpoint::Counters).len(), 25);
        assert_eq!(series(Endpoint::ServiceTimes).len(), 20 + 4 * 19);
        assert_eq!(series(Endpoint::Info).len(), 46);
    }

    #[test]
    fn test_counter_naming() {
        let s = &series(Endpoint::Counters)[6];
        assert_eq!(s.key, "server.http.requests");
        assert_eq!(s.name, "squid_server_http_requests_total");
        assert_eq!(s.kind, MetricKind::Counter);

        let hit = series(Endpoint::Counters)
            .iter()
            .find(|s| s.key == "client_http.hit_kbytes_out")
            .unwrap();
        assert_eq!(hit.name, "squid_client_http_hit_kbytes_out_bytes_total");
    }

    #[test]
    fn test_service_time_naming() {
        let all = series(Endpoint::ServiceTimes);
        assert_eq!(all[0].key, "HTTP_Requests_All_5");
        assert_eq!(all[0].name, "squid_HTTP_Requests_All_5");
        assert_eq!(all[19].key, "HTTP_Requests_All_100");
        assert_eq!(all[20].key, "Cache_Misses_5");
        assert!(all.iter().all(|s| s.kind == MetricKind::Gauge));
        assert!(!all.iter().any(|s| s.key == "DNS_Lookups_100"));
    }

    #[test]
    fn test_info_naming() {
        let infos = series(Endpoint::Info);
        let hits = infos
            .iter()
            .find(|s| s.key == "Hits_as_%_of_all_requests_5min")
            .unwrap();
        assert_eq!(hits.name, "squid_info_Hits_as_pct_of_all_requests_5min");
        assert_eq!(hits.help, "Hits as % of all requests 5min in %");

        let up = infos.iter().find(|s| s.key == "UP_Time").unwrap();
        assert_eq!(up.help, "time squid is up in seconds");
    }

    #[test]
    fn test_keys_are_normalized() {
        for endpoint in Endpoint::ALL {
            for s in series(endpoint) {
                assert_eq!(normalize_key(&s.key), s.key, "{} is not normalized", s.key);
            }
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut seen = HashSet::new();
        for endpoint in Endpoint::ALL {
            for s in series(endpoint) {
                assert!(seen.insert(s.name.as_str()), "duplicate series {}", s.name);
            }
        }
    }
}
