//! Line decoders for the Squid cache manager reports.
//!
//! Each report uses its own loosely specified text grammar. Every decoder
//! turns a single line into zero or one [`Record`] and never looks at other
//! lines; folding related lines together is the job of
//! [`crate::aggregate::Aggregator`].
//!
//! # Formats
//!
//! `counters`:
//! ```text
//! client_http.requests = 12345
//! sample_time = 1700000000.123456 (Tue, 14 Nov 2023 22:13:20 GMT)
//! ```
//!
//! `service_times`:
//! ```text
//! Service Time Percentiles            5 min    60 min:
//! HTTP Requests (All):   5%   0.00000  0.00000
//! ```
//!
//! `info`:
//! ```text
//! Squid Object Cache: Version 6.1
//! Connection information for squid:
//!         Number of clients accessing cache:      1
//!         Hits as % of all requests:      5min: 85.2%, 60min: 87.5%
//!         11 StoreEntries
//! ```
//!
//! Header lines (ending in a bare colon) and timestamp fields decode to
//! `Ok(None)`: they are valid input that simply carries no metric.

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_till, take_till1},
    character::complete::{char, multispace1},
    sequence::terminated,
};
use thiserror::Error;

use crate::record::{Endpoint, Label, Record, normalize_key};

/// Info fields whose value is a string and is exported as a label.
const IDENTITY_FIELDS: &[&str] = &["Squid_Object_Cache", "Build_Info", "Service_Name"];

/// Info fields that are never exported.
const DISCARDED_FIELDS: &[&str] = &["Start_Time", "Current_Time"];

/// Label keys of a dual-window average, in positional order.
pub const WINDOW_5MIN: &str = "5min";
pub const WINDOW_60MIN: &str = "60min";

/// Errors that can occur while decoding a single line.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("{endpoint} - missing '{delimiter}' in line: {line:?}")]
    MissingDelimiter {
        endpoint: Endpoint,
        delimiter: char,
        line: String,
    },

    #[error("{endpoint} - empty key in line: {line:?}")]
    EmptyKey { endpoint: Endpoint, line: String },

    #[error("{endpoint} - invalid number {value:?} in line: {line:?}")]
    InvalidNumber {
        endpoint: Endpoint,
        value: String,
        line: String,
    },
}

/// Result of decoding one line. `Ok(None)` marks a line with no metric.
pub type DecodeResult = Result<Option<Record>, DecodeError>;

/// Decode a line using the grammar of `endpoint`.
pub fn decode_line(endpoint: Endpoint, line: &str) -> DecodeResult {
    match endpoint {
        Endpoint::Counters => decode_counter(line),
        Endpoint::ServiceTimes => decode_service_time(line),
        Endpoint::Info => decode_info(line),
    }
}

/// Take everything up to `delimiter` and consume the delimiter.
fn field(input: &str, delimiter: char) -> IResult<&str, &str> {
    terminated(take_till(|c| c == delimiter), char(delimiter)).parse(input)
}

/// Match `5min: X 60min: Y`, returning the raw `X` and `Y` tokens.
fn dual_window(input: &str) -> IResult<&str, (&str, &str)> {
    let token = || take_till1(|c: char| c.is_whitespace());
    let (input, (_, _, five, _, _, _, sixty)) = (
        tag("5min:"),
        multispace1,
        token(),
        multispace1,
        tag("60min:"),
        multispace1,
        token(),
    )
        .parse(input)?;
    Ok((input, (five, sixty)))
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Section headers end in a bare colon.
fn is_header(line: &str) -> bool {
    strip_terminator(line).ends_with(':')
}

fn first_token(value: &str) -> &str {
    value.split_whitespace().next().unwrap_or("")
}

fn strip_percent(value: &str) -> String {
    value.replace(['%', ','], "")
}

fn parse_number(endpoint: Endpoint, value: &str, line: &str) -> Result<f64, DecodeError> {
    value.parse::<f64>().map_err(|_| DecodeError::InvalidNumber {
        endpoint,
        value: value.to_string(),
        line: strip_terminator(line).to_string(),
    })
}

fn missing_delimiter(endpoint: Endpoint, delimiter: char, line: &str) -> DecodeError {
    DecodeError::MissingDelimiter {
        endpoint,
        delimiter,
        line: strip_terminator(line).to_string(),
    }
}

fn empty_key(endpoint: Endpoint, line: &str) -> DecodeError {
    DecodeError::EmptyKey {
        endpoint,
        line: strip_terminator(line).to_string(),
    }
}

/// Decode a `counters` line of the form `key = value [noise]`.
///
/// The key is kept verbatim (e.g. `client_http.requests`).
///
/// # Example
///
/// ```
/// use squid_exporter::decoder::decode_counter;
///
/// let record = decode_counter("client_http.requests = 12345\n").unwrap().unwrap();
/// assert_eq!(record.key, "client_http.requests");
/// assert_eq!(record.value, 12345.0);
/// ```
pub fn decode_counter(line: &str) -> DecodeResult {
    let endpoint = Endpoint::Counters;
    let (value, key) =
        field(line, '=').map_err(|_| missing_delimiter(endpoint, '=', line))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(empty_key(endpoint, line));
    }

    // `sample_time` carries a human readable date after the number
    let value = parse_number(endpoint, first_token(value), line)?;
    Ok(Some(Record::scalar(key, value)))
}

/// Decode a `service_times` line of the form `Key (Qualifier):  5%  0.001  0.002`.
///
/// The percentile before `%` is appended to the key and the first number
/// after it (the 5 minute column) becomes the value.
pub fn decode_service_time(line: &str) -> DecodeResult {
    let endpoint = Endpoint::ServiceTimes;
    if is_header(line) {
        return Ok(None);
    }

    let (value, raw_key) =
        field(line, ':').map_err(|_| missing_delimiter(endpoint, ':', line))?;
    let mut key = normalize_key(raw_key.trim());
    if key.is_empty() {
        return Err(empty_key(endpoint, line));
    }

    let mut value = value.trim();
    if let Ok((after, discriminator)) = field(value, '%') {
        let discriminator = discriminator.trim();
        if !discriminator.is_empty() {
            key = format!("{}_{}", key, discriminator);
            value = first_token(after);
        }
    }

    let value = parse_number(endpoint, value, strip_terminator(line))?;
    Ok(Some(Record::scalar(key, value)))
}

/// Decode an `info` line.
///
/// Rules, in order of precedence:
/// 1. header lines are ignored;
/// 2. `Key: value` lines, where identity fields become labels, timestamps
///    are dropped, `5min: X%, 60min: Y%` becomes a two-label record and
///    anything else is the first token of the value parsed as a number;
/// 3. `value key words` lines without a colon.
///
/// # Example
///
/// ```
/// use squid_exporter::decoder::decode_info;
///
/// let record = decode_info("\tNumber of clients accessing cache:\t1000\n").unwrap().unwrap();
/// assert_eq!(record.key, "Number_of_clients_accessing_cache");
/// assert_eq!(record.value, 1000.0);
/// ```
pub fn decode_info(line: &str) -> DecodeResult {
    if is_header(line) {
        return Ok(None);
    }

    match field(line, ':') {
        Ok((value, raw_key)) => decode_info_field(line, raw_key, value.trim()),
        Err(_) => decode_info_trailing(line),
    }
}

fn decode_info_field(line: &str, raw_key: &str, value: &str) -> DecodeResult {
    let endpoint = Endpoint::Info;
    let key = normalize_key(raw_key.trim());
    if key.is_empty() {
        return Err(empty_key(endpoint, line));
    }

    if IDENTITY_FIELDS.contains(&key.as_str()) {
        let (key, value) = if key == "Squid_Object_Cache" {
            // "Version 6.1" -> "6.1"
            let version = value.split_whitespace().nth(1).unwrap_or(value);
            (format!("{}_Version", key), version)
        } else {
            (key, value)
        };
        let label = Label::new(key.clone(), value);
        return Ok(Some(Record::labeled(key, vec![label])));
    }

    if DISCARDED_FIELDS.contains(&key.as_str()) {
        return Ok(None);
    }

    if let Ok((_, (five, sixty))) = dual_window(value) {
        let labels = vec![
            Label::new(WINDOW_5MIN, strip_percent(five)),
            Label::new(WINDOW_60MIN, strip_percent(sixty)),
        ];
        return Ok(Some(Record::labeled(key, labels)));
    }

    let value = parse_number(endpoint, &strip_percent(first_token(value)), line)?;
    Ok(Some(Record::scalar(key, value)))
}

/// `\t11 StoreEntries` / `\t0 on-disk objects`
fn decode_info_trailing(line: &str) -> DecodeResult {
    let endpoint = Endpoint::Info;
    let trimmed = line.trim();
    let Some((value, key)) = trimmed.split_once(' ') else {
        return Err(missing_delimiter(endpoint, ':', line));
    };

    let key = key.trim().replace([' ', '-'], "_");
    if key.is_empty() {
        return Err(empty_key(endpoint, line));
    }

    let value = parse_number(endpoint, value.trim(), line)?;
    Ok(Some(Record::scalar(key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scalar(result: DecodeResult) -> (String, f64) {
        let record = result
            .expect("Should decode successfully")
            .expect("Should yield a record");
        assert!(record.labels.is_empty(), "Expected a scalar: {:?}", record);
        (record.key, record.value)
    }

    #[test]
    fn test_decode_counter_basic() {
        #[rustfmt::skip]
        let cases = [
            ("client_http.requests = 12345", "client_http.requests", 12345.0),
            ("cache.ratio = 98.7654", "cache.ratio", 98.7654),
            ("http_requests 5min = 123", "http_requests 5min", 123.0),
            ("cache.negative = -42.5", "cache.negative", -42.5),
            ("cache.large = 1.23e+6\n", "cache.large", 1.23e6),
        ];
        for (line, key, value) in cases {
            assert_eq!(scalar(decode_counter(line)), (key.to_string(), value));
        }
    }

    #[test]
    fn test_decode_counter_sample_time() {
        let line = "sample_time = 1700000000.123456 (Tue, 14 Nov 2023 22:13:20 GMT)\n";
        let (key, value) = scalar(decode_counter(line));
        assert_eq!(key, "sample_time");
        assert!((value - 1700000000.123456).abs() < 1e-6);
    }

    #[test]
    fn test_decode_counter_errors() {
        assert!(matches!(
            decode_counter("invalid counter format"),
            Err(DecodeError::MissingDelimiter { delimiter: '=', .. })
        ));
        assert!(matches!(
            decode_counter("counter = text"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_counter("a = b = c"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_counter(" = 5"),
            Err(DecodeError::EmptyKey { .. })
        ));
        assert!(matches!(
            decode_counter("key ="),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(decode_counter("").is_err());
        assert!(decode_counter("     ").is_err());
    }

    #[test]
    fn test_decode_service_time_percentile() {
        let line = "HTTP Requests (All):   5%   0.00179  0.00286\n";
        let (key, value) = scalar(decode_service_time(line));
        assert_eq!(key, "HTTP_Requests_All_5");
        assert!((value - 0.00179).abs() < 1e-9);

        let line = "Cache Misses:         95%   0.10857  0.11465";
        let (key, value) = scalar(decode_service_time(line));
        assert_eq!(key, "Cache_Misses_95");
        assert!((value - 0.10857).abs() < 1e-9);
    }

    #[test]
    fn test_decode_service_time_plain_value() {
        let (key, value) = scalar(decode_service_time("Average (ms): 12.5\n"));
        assert_eq!(key, "Average_ms");
        assert_eq!(value, 12.5);
    }

    #[test]
    fn test_decode_service_time_header() {
        assert_eq!(
            decode_service_time("Service Time Percentiles            5 min    60 min:\n"),
            Ok(None)
        );
        assert_eq!(
            decode_service_time("Connection information for squid:\n"),
            Ok(None)
        );
    }

    #[test]
    fn test_decode_service_time_errors() {
        assert!(matches!(
            decode_service_time("no colon here"),
            Err(DecodeError::MissingDelimiter { delimiter: ':', .. })
        ));
        assert!(matches!(
            decode_service_time(": 5"),
            Err(DecodeError::EmptyKey { .. })
        ));
        assert!(matches!(
            decode_service_time("DNS Lookups: % 0.1"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_service_time("DNS Lookups: 5% none"),
            Err(DecodeError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_decode_info_scalar() {
        #[rustfmt::skip]
        let cases = [
            ("Number of clients accessing cache: 1000", "Number_of_clients_accessing_cache", 1000.0),
            ("\tNumber of HTTP requests received:\t5000000\n", "Number_of_HTTP_requests_received", 5000000.0),
            ("Available disk space: 10240 KB", "Available_disk_space", 10240.0),
            ("CPU usage: 75 %", "CPU_usage", 75.0),
            ("Select loop called: 10000000 times, 0.5 ms avg", "Select_loop_called", 10000000.0),
            ("Storage Swap capacity:\t 0.0% used,  0.0% free", "Storage_Swap_capacity", 0.0),
            ("CPU Usage, 5 minute avg:\t3.25%", "CPU_Usage_5_minute_avg", 3.25),
            ("Page faults with physical i/o: 7", "Page_faults_with_physical_io", 7.0),
            ("Negative: -42.5", "Negative", -42.5),
            ("Very Small: 0.0000001", "Very_Small", 0.0000001),
            ("Mean Object Size:\t1,024.50 KB", "Mean_Object_Size", 1024.5),
        ];
        for (line, key, value) in cases {
            let (k, v) = scalar(decode_info(line));
            assert_eq!(k, key, "line {:?}", line);
            assert!((v - value).abs() < 1e-9, "line {:?}", line);
        }
    }

    #[test]
    fn test_decode_info_trailing_format() {
        assert_eq!(
            scalar(decode_info("\t11 StoreEntries\n")),
            ("StoreEntries".to_string(), 11.0)
        );
        assert_eq!(
            scalar(decode_info("\t0 on-disk objects\n")),
            ("on_disk_objects".to_string(), 0.0)
        );
        assert_eq!(
            scalar(decode_info("     3 StoreEntries with MemObjects")),
            ("StoreEntries_with_MemObjects".to_string(), 3.0)
        );
    }

    #[test]
    fn test_decode_info_version_banner() {
        let record = decode_info("Squid Object Cache: Version 4.10\n")
            .unwrap()
            .unwrap();
        assert_eq!(record.key, "Squid_Object_Cache_Version");
        assert_eq!(
            record.labels,
            vec![Label::new("Squid_Object_Cache_Version", "4.10")]
        );
    }

    #[test]
    fn test_decode_info_version_without_word() {
        let record = decode_info("Squid Object Cache: 6.1").unwrap().unwrap();
        assert_eq!(record.label("Squid_Object_Cache_Version"), Some("6.1"));
    }

    #[test]
    fn test_decode_info_identity_fields() {
        let record = decode_info("Service Name: squid\n").unwrap().unwrap();
        assert_eq!(record.key, "Service_Name");
        assert_eq!(record.labels, vec![Label::new("Service_Name", "squid")]);

        let record = decode_info("Build Info: Ubuntu linux").unwrap().unwrap();
        assert_eq!(record.label("Build_Info"), Some("Ubuntu linux"));
    }

    #[test]
    fn test_decode_info_discards() {
        assert_eq!(decode_info("Connection information for squid:\n"), Ok(None));
        assert_eq!(
            decode_info("Start Time:\tThu, 01 Apr 2021 12:00:00 GMT\n"),
            Ok(None)
        );
        assert_eq!(
            decode_info("Current Time:   Thu, 01 Apr 2021 15:30:00 GMT"),
            Ok(None)
        );
        // An identity field with an empty value is still a header line
        assert_eq!(decode_info("Build Info:\n"), Ok(None));
    }

    #[test]
    fn test_decode_info_dual_window() {
        let record = decode_info("\tHits as % of all requests:\t5min: 85.2%, 60min: 87.5%\n")
            .unwrap()
            .unwrap();
        assert_eq!(record.key, "Hits_as_%_of_all_requests");
        assert_eq!(
            record.labels,
            vec![Label::new("5min", "85.2"), Label::new("60min", "87.5")]
        );
    }

    #[test]
    fn test_decode_info_dual_window_fallback() {
        // "60min" without its colon: falls through to the scalar rule and fails
        assert!(matches!(
            decode_info("Hits as % of bytes sent: 5min: 1.0%, 60min 2.0%"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        // Missing the 60min value
        assert!(matches!(
            decode_info("Hits as % of bytes sent: 5min: 1.0%, 60min: \n"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        // Reordered windows are not recognised either
        assert!(decode_info("Hits as % of bytes sent: 60min: 1.0%, 5min: 2.0%").is_err());
    }

    #[test]
    fn test_decode_info_errors() {
        assert!(matches!(
            decode_info("Invalid info line without colon"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_info("Version: Squid/3.5.27"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_info(": 42"),
            Err(DecodeError::EmptyKey { .. })
        ));
        assert!(matches!(
            decode_info("Only Colon: "),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_info("Invalid.1"),
            Err(DecodeError::MissingDelimiter { .. })
        ));
        assert!(decode_info("").is_err());
    }

    #[test]
    fn test_decode_line_dispatch() {
        assert!(decode_line(Endpoint::Counters, "a = 1").is_ok());
        assert!(decode_line(Endpoint::ServiceTimes, "a = 1").is_err());
        assert!(decode_line(Endpoint::Info, "1 a").is_ok());
    }

    #[test]
    fn test_error_messages_name_endpoint() {
        let err = decode_counter("garbage\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "counters - missing '=' in line: \"garbage\""
        );
    }

    proptest! {
        #[test]
        fn prop_counter_roundtrip(key in "[a-z_][a-z0-9_.]{0,24}", value in -1.0e12f64..1.0e12) {
            let line = format!("{} = {}\n", key, value);
            let record = decode_counter(&line).unwrap().unwrap();
            prop_assert_eq!(record.key, key);
            prop_assert_eq!(record.value, value);
        }

        #[test]
        fn prop_counter_without_equals_fails(line in "[^=]{0,40}") {
            prop_assert!(decode_counter(&line).is_err());
        }

        #[test]
        fn prop_service_time_without_colon_fails(line in "[^:]{0,40}") {
            prop_assert!(decode_service_time(&line).is_err());
        }

        #[test]
        fn prop_decoded_keys_are_stable(
            words in "[A-Za-z%]{1,8}( [A-Za-z%]{1,8}){0,4}",
            value in 0u32..1_000_000,
        ) {
            let line = format!("{}: {}\n", words, value);
            if let Ok(Some(record)) = decode_info(&line) {
                prop_assert_eq!(normalize_key(&record.key), record.key);
            }
        }

        #[test]
        fn prop_decoders_never_panic(line in "\\PC{0,60}") {
            for endpoint in Endpoint::ALL {
                let _ = decode_line(endpoint, &line);
            }
        }
    }
}
