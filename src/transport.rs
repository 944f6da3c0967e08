//! Transport layer for the stream connection.
//!
//! The connection manager talks to the network only through the [`Transport`]
//! and [`LineStream`] traits. [`HttpTransport`] is the production implementation
//! on top of `reqwest`; tests substitute scripted transports.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use log::{debug, warn};
use reqwest::{header, redirect, StatusCode};
use url::Url;

use crate::config::TransportOptions;
use crate::error::TransportError;

/// A fully signed stream request, pinned to one resolved address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Endpoint URL with the original hostname, used for TLS identity checks.
    pub url: Url,
    /// The address the connection is made to.
    pub address: SocketAddr,
    /// `Authorization` header value.
    pub authorization: String,
    /// Form-encoded body.
    pub body: String,
}

/// A source of newline-delimited records.
#[allow(async_fn_in_trait)]
pub trait LineStream {
    /// Returns the next line without its terminator, or `None` at end of stream.
    ///
    /// Implementations must be cancel-safe: dropping the returned future before
    /// it completes must not lose data.
    async fn next_line(&mut self) -> Result<Option<String>, TransportError>;
}

/// Name resolution and connection establishment.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Stream: LineStream;

    /// Resolves `host` to the set of addresses it is served from.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;

    /// Sends the request and returns the open response stream.
    async fn open(&self, request: &StreamRequest) -> Result<Self::Stream, TransportError>;
}

/// Sanitizes text for safe logging by truncating and escaping control characters.
///
/// # Parameters
///
/// - `text`: The text to sanitize
/// - `max_len`: Maximum length in characters before truncation
///
/// # Returns
///
/// A sanitized string safe for logging
pub(crate) fn sanitize_for_logging(text: &str, max_len: usize) -> String {
    let sanitized: String = text
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_control() => '?',
            c => c,
        })
        .collect();

    if sanitized.chars().count() > max_len {
        let truncated: String = sanitized.chars().take(max_len).collect();
        format!("{}... [truncated, {} total bytes]", truncated, text.len())
    } else {
        sanitized
    }
}

/// Splits a byte stream into lines.
///
/// Lines end at `\n`; a trailing `\r` is removed. Invalid UTF-8 is replaced
/// rather than rejected, the host gets the line as text either way.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Takes the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Takes whatever is left after the peer closed the stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Maps a response status to a transport error, `None` for success.
///
/// Rate limiting (420, 429) and server errors are retryable; any other
/// non-success status means the request itself is unacceptable.
pub fn classify_status(status: StatusCode, body: &str) -> Option<TransportError> {
    if status.is_success() {
        return None;
    }

    let reason = match status.canonical_reason() {
        Some(reason) if body.is_empty() => reason.to_string(),
        Some(reason) => format!("{}: {}", reason, sanitize_for_logging(body, 200)),
        None => sanitize_for_logging(body, 200),
    };

    if status.as_u16() == 420 || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    {
        Some(TransportError::Transient(format!(
            "server returned {}: {}",
            status.as_u16(),
            reason
        )))
    } else {
        Some(TransportError::Rejected {
            status: status.as_u16(),
            reason,
        })
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    options: TransportOptions,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }

    fn client_for(&self, request: &StreamRequest) -> Result<reqwest::Client, TransportError> {
        let host = request.url.host_str().unwrap_or_default();
        let redirects = match self.options.max_redirects {
            0 => redirect::Policy::none(),
            n => redirect::Policy::limited(n),
        };

        // Pin the hostname to the chosen address so TLS still verifies the hostname
        let client = reqwest::Client::builder()
            .resolve(host, request.address)
            .connect_timeout(self.options.timeout())
            .redirect(redirects)
            .user_agent(self.options.user_agent.as_str())
            .build()?;
        Ok(client)
    }
}

impl Transport for HttpTransport {
    type Stream = HttpLineStream;

    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addresses: BTreeSet<IpAddr> = tokio::net::lookup_host((host, port))
            .await?
            .map(|addr| addr.ip())
            .collect();
        Ok(addresses.into_iter().collect())
    }

    async fn open(&self, request: &StreamRequest) -> Result<HttpLineStream, TransportError> {
        let client = self.client_for(request)?;
        let send = client
            .post(request.url.clone())
            .header(header::AUTHORIZATION, request.authorization.as_str())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.body.clone())
            .send();

        let response = tokio::time::timeout(self.options.timeout(), send)
            .await
            .map_err(|_| {
                TransportError::Transient(format!(
                    "no response within {} seconds",
                    self.options.timeout_seconds
                ))
            })??;

        let status = response.status();
        if status.is_success() {
            debug!(
                "Stream established: status {}, address {}, version {:?}",
                status,
                request.address,
                response.version()
            );
            return Ok(HttpLineStream::new(response));
        }

        let body = match tokio::time::timeout(self.options.timeout(), response.text()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!("Failed to read error response body: {}", e);
                String::new()
            }
            Err(_) => String::new(),
        };

        match classify_status(status, &body) {
            Some(e) => Err(e),
            None => Err(TransportError::Transient(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}

/// Line reader over a chunked `reqwest` response body.
#[derive(Debug)]
pub struct HttpLineStream {
    response: reqwest::Response,
    buffer: LineBuffer,
    finished: bool,
}

impl HttpLineStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: LineBuffer::new(),
            finished: false,
        }
    }
}

impl LineStream for HttpLineStream {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(self.buffer.finish());
            }
            match self.response.chunk().await? {
                Some(chunk) => self.buffer.push(&chunk),
                None => self.finished = true,
            }
        }
    }
}
