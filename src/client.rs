//! Cache manager client for Squid.
//!
//! This module handles the TCP connection to Squid, the minimal HTTP/1.0
//! exchange used by `squidclient`, and streaming of the report body as
//! lines that are decoded while they arrive.

use base64::{Engine, engine::general_purpose::STANDARD};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::record::{Endpoint, Record};

/// Default Squid hostname.
pub const SQUID_HOST: &str = "localhost";

/// Default Squid HTTP port.
pub const SQUID_PORT: u16 = 3128;

/// User agent sent with every request.
pub const USER_AGENT: &str = "squidclient/3.5.12";

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for each read from the upstream.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the channel between the socket reader and the decoder.
pub const LINE_CHANNEL_CAPACITY: usize = 256;

/// Longest response line kept in memory, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Errors that abort a fetch.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("timed out waiting for the {endpoint} response after {timeout:?}")]
    ReadTimeout {
        endpoint: Endpoint,
        timeout: Duration,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("non success code {code} while fetching {endpoint}")]
    Status { endpoint: Endpoint, code: u16 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Login and password for proxy authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Configuration for the cache manager client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hostname of the Squid server.
    pub host: String,

    /// Port number.
    pub port: u16,

    /// Optional basic auth credentials.
    pub credentials: Option<Credentials>,

    /// Extra header lines (`Name: value`) added to every request.
    pub headers: Vec<String>,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Timeout for each read, including reads of the body.
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: SQUID_HOST.to_string(),
            port: SQUID_PORT,
            credentials: None,
            headers: Vec::new(),
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Set the host and port.
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set basic auth credentials. An empty login disables authentication.
    pub fn with_credentials(
        mut self,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let login = login.into();
        self.credentials = if login.is_empty() {
            None
        } else {
            Some(Credentials {
                login,
                password: password.into(),
            })
        };
        self
    }

    /// Add an extra request header line.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Encode `login:password` for a `Basic` authorization header.
pub fn basic_auth(credentials: &Credentials) -> String {
    STANDARD.encode(format!("{}:{}", credentials.login, credentials.password))
}

/// Build the raw request for `endpoint`.
pub fn build_request(endpoint: Endpoint, config: &ClientConfig) -> String {
    let mut lines = vec![
        format!("GET cache_object://localhost/{} HTTP/1.0", endpoint.path()),
        "Host: localhost".to_string(),
        format!("User-Agent: {}", USER_AGENT),
    ];
    lines.extend(config.headers.iter().cloned());

    if let Some(credentials) = &config.credentials {
        let auth = basic_auth(credentials);
        lines.push(format!("Proxy-Authorization: Basic {}", auth));
        lines.push(format!("Authorization: Basic {}", auth));
    }

    lines.push("Accept: */*".to_string());

    let mut request = lines.join("\r\n");
    request.push_str("\r\n\r\n");
    request
}

/// Parse `HTTP/1.x <code> <reason>` into the status code.
fn parse_status_line(line: &str) -> Result<u16, ClientError> {
    let malformed = || ClientError::MalformedResponse(format!("bad status line: {:?}", line));
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            code.parse().map_err(|_| malformed())
        }
        _ => Err(malformed()),
    }
}

/// Read one line of the response head into `buf`.
///
/// Lines longer than [`MAX_LINE_BYTES`] are rejected as malformed.
async fn read_head_line<R>(
    reader: &mut R,
    buf: &mut String,
    endpoint: Endpoint,
    read_timeout: Duration,
) -> Result<usize, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut limited = (&mut *reader).take(MAX_LINE_BYTES as u64);
    let n = timeout(read_timeout, limited.read_line(buf))
        .await
        .map_err(|_| ClientError::ReadTimeout {
            endpoint,
            timeout: read_timeout,
        })??;
    if n >= MAX_LINE_BYTES && !buf.ends_with('\n') {
        return Err(ClientError::MalformedResponse(format!(
            "response header line longer than {} bytes",
            MAX_LINE_BYTES
        )));
    }
    Ok(n)
}

/// Lines of a report body, produced by a background task.
///
/// The connection belongs to the producer task. It is closed when the body
/// ends, when a read fails or times out, or when this value is dropped.
pub struct LineSource {
    endpoint: Endpoint,
    lines: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl LineSource {
    /// Receive the next line, including its terminator.
    ///
    /// Returns `None` once the body is exhausted.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Endpoint this body belongs to.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Wait until the producer task has released the connection.
    pub async fn close(self) {
        let LineSource {
            endpoint,
            lines,
            task,
        } = self;
        drop(lines);
        if let Err(e) = task.await {
            warn!("Line producer for {} failed: {}", endpoint, e);
        }
    }
}

/// Push the body lines of `reader` into `tx` until EOF, error or timeout.
///
/// Lines longer than [`MAX_LINE_BYTES`] are dropped whole.
async fn produce_lines<R>(mut reader: R, tx: mpsc::Sender<String>, read_timeout: Duration)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let mut discarding = false;
    loop {
        buf.clear();

        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match timeout(read_timeout, limited.read_until(b'\n', &mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let complete = buf.ends_with(b"\n");
                if discarding {
                    // Rest of an overlong line
                    discarding = !complete;
                    continue;
                }
                if n >= MAX_LINE_BYTES && !complete {
                    warn!("Dropping line longer than {} bytes", MAX_LINE_BYTES);
                    discarding = true;
                    continue;
                }

                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).await.is_err() {
                    // Receiver dropped
                    debug!("Line consumer went away, closing connection");
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!("Error reading response body: {}", e);
                break;
            }
            Err(_) => {
                warn!("Read timeout after {:?}, closing connection", read_timeout);
                break;
            }
        }
    }
}

/// Records of one report plus line accounting.
#[derive(Debug, Clone, Default)]
pub struct EndpointScrape {
    pub records: Vec<Record>,
    pub lines: usize,
    pub skipped: usize,
}

/// Async Squid cache manager client.
///
/// Every call opens a fresh connection; nothing is pooled or shared.
#[derive(Debug, Clone)]
pub struct CacheObjectClient {
    config: ClientConfig,
}

impl CacheObjectClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// The configuration this client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request `endpoint` and return its body as a stream of lines.
    ///
    /// Fails if the connection cannot be made or the status is not 200.
    pub async fn open(&self, endpoint: Endpoint) -> Result<LineSource, ClientError> {
        let addr = self.config.addr();
        debug!("Connecting to {} for {}", addr, endpoint);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                addr: addr.clone(),
                timeout: self.config.connect_timeout,
            })?
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(build_request(endpoint, &self.config).as_bytes())
            .await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let read_timeout = self.config.read_timeout;
        let mut line_buf = String::with_capacity(256);

        if read_head_line(&mut reader, &mut line_buf, endpoint, read_timeout).await? == 0 {
            return Err(ClientError::MalformedResponse(
                "connection closed before status line".to_string(),
            ));
        }
        let code = parse_status_line(line_buf.trim_end())?;
        if code != 200 {
            // Dropping the halves closes the connection
            return Err(ClientError::Status { endpoint, code });
        }

        let mut content_length = None;
        loop {
            if read_head_line(&mut reader, &mut line_buf, endpoint, read_timeout).await? == 0 {
                break;
            }
            let header = line_buf.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':')
                && name.trim().eq_ignore_ascii_case("content-length")
            {
                content_length = value.trim().parse::<u64>().ok();
            }
        }

        let body = reader.take(content_length.unwrap_or(u64::MAX));
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            // Keep the write half open until the body has been read
            let _writer = writer;
            produce_lines(body, tx, read_timeout).await;
        });

        Ok(LineSource {
            endpoint,
            lines: rx,
            task,
        })
    }

    /// Fetch `endpoint`, decoding lines as they arrive.
    pub async fn fetch(&self, endpoint: Endpoint) -> Result<EndpointScrape, ClientError> {
        let mut source = self.open(endpoint).await?;
        let mut aggregator = Aggregator::new(endpoint);

        while let Some(line) = source.next_line().await {
            aggregator.push_line(&line);
        }
        source.close().await;

        let lines = aggregator.lines();
        let skipped = aggregator.skipped();
        let records = aggregator.finish();
        info!(
            "Fetched {}: {} records from {} lines ({} skipped)",
            endpoint,
            records.len(),
            lines,
            skipped
        );

        Ok(EndpointScrape {
            records,
            lines,
            skipped,
        })
    }

    /// Fetch the `counters` report.
    pub async fn get_counters(&self) -> Result<Vec<Record>, ClientError> {
        Ok(self.fetch(Endpoint::Counters).await?.records)
    }

    /// Fetch the `service_times` report.
    pub async fn get_service_times(&self) -> Result<Vec<Record>, ClientError> {
        Ok(self.fetch(Endpoint::ServiceTimes).await?.records)
    }

    /// Fetch the `info` report.
    pub async fn get_infos(&self) -> Result<Vec<Record>, ClientError> {
        Ok(self.fetch(Endpoint::Info).await?.records)
    }
}
