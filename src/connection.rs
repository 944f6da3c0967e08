//! Connection lifecycle for the filtered stream.
//!
//! [`ConnectionManager`] owns everything that changes over a stream's lifetime:
//! the connection state, the backoff counters and the stop signal. Each connect
//! attempt resolves the endpoint hostname, picks one address at random, signs a
//! fresh request and opens the stream. Transient failures are retried with
//! exponential backoff, failed lookups included. An empty DNS answer, a
//! permanent server rejection or an exhausted retry budget ends the lifecycle.
//!
//! [`ConnectionManager::run`] ties the pieces together as a loop rather than
//! recursion, so a stream can reconnect for days without growing the stack.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, Level};
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

use crate::backoff::{BackoffState, BackoffStep};
use crate::config::{Credentials, StreamConfig};
use crate::error::{ConfigError, FatalError, TransportError};
use crate::filter::FilterSpec;
use crate::host::StreamHost;
use crate::oauth::{encode_form_body, OAuthSigner};
use crate::reader::{ReadOutcome, StreamReader};
use crate::refresh::RefreshScheduler;
use crate::transport::{HttpTransport, LineStream, StreamRequest, Transport};

/// Lifecycle states. Only the connection manager changes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Refreshing,
    /// Terminal until [`ConnectionManager::reset`].
    Failed,
}

/// Requests a running client to stop. Cheap to clone and usable from any task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Receiving side of a [`StopHandle`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once a stop has been requested. Never completes if every handle is gone.
    pub async fn stopped(&mut self) {
        loop {
            if self.is_stopped() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        StopHandle {
            sender: Arc::new(sender),
        },
        StopSignal { receiver },
    )
}

/// An established stream. Dropping it releases the underlying connection.
#[derive(Debug)]
pub struct OpenConnection<S> {
    stream: Option<S>,
    address: SocketAddr,
    established_at: Instant,
    records: u64,
}

impl<S: LineStream> OpenConnection<S> {
    pub fn new(stream: S, address: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            address,
            established_at: Instant::now(),
            records: 0,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Records delivered to the host over this connection.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub(crate) fn count_record(&mut self) {
        self.records += 1;
    }

    /// Next line from the stream; a released connection reads as end of stream.
    pub async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        match self.stream.as_mut() {
            Some(stream) => stream.next_line().await,
            None => Ok(None),
        }
    }

    /// Releases the stream. Returns false if it was already released.
    pub fn disconnect(&mut self) -> bool {
        if self.stream.take().is_none() {
            return false;
        }
        debug!(
            "Disconnected from {} after {} records in {}s",
            self.address,
            self.records,
            self.established_at.elapsed().as_secs()
        );
        true
    }
}

enum AttemptError {
    Fatal(FatalError),
    Transient(TransportError),
}

/// Owns the connection state machine for one stream.
///
/// The endpoint allows one stream per credential set, so a manager drives a
/// single connection at a time and all of its counters are per instance.
pub struct ConnectionManager<T: Transport = HttpTransport> {
    transport: T,
    endpoint: Url,
    backoff: BackoffState,
    state: ConnectionState,
    terminal: Option<FatalError>,
    reader: StreamReader,
    stop_handle: StopHandle,
    stop: StopSignal,
}

impl ConnectionManager<HttpTransport> {
    /// Creates a manager that talks to the network through `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the stream URL cannot be parsed or has no host.
    pub fn new(config: &StreamConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, HttpTransport::new(config.transport.clone()))
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager on top of any [`Transport`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the stream URL cannot be parsed or has no host.
    pub fn with_transport(config: &StreamConfig, transport: T) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(&config.stream_url)?;
        if endpoint.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid {
                name: "stream_url".to_string(),
                reason: format!("'{}' has no host", config.stream_url),
            });
        }

        let (stop_handle, stop) = stop_channel();
        Ok(Self {
            transport,
            endpoint,
            backoff: BackoffState::new(config.connect_failures_max),
            state: ConnectionState::Disconnected,
            terminal: None,
            reader: StreamReader::new(
                RefreshScheduler::new(config.refresh_interval()),
                config.stall_timeout(),
            ),
            stop_handle,
            stop,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Handle for stopping this manager from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Leaves the `Failed` state so the host can deliberately start over.
    ///
    /// Also withdraws an earlier stop request. Handles from
    /// [`stop_handle`](Self::stop_handle) stay valid and can stop the next run.
    pub fn reset(&mut self) {
        self.stop_handle.sender.send_replace(false);
        self.terminal = None;
        self.backoff.reset();
        self.state = ConnectionState::Disconnected;
    }

    /// Opens the stream, retrying transient failures with backoff.
    ///
    /// Each attempt resolves the endpoint afresh, picks one of its addresses at
    /// random and signs the request with a new nonce and timestamp.
    ///
    /// # Errors
    ///
    /// - `FatalError::DnsResolution`: The hostname resolved to no addresses
    /// - `FatalError::NonRetryableServerSignal`: The server permanently rejected the request
    /// - `FatalError::RetryLimitExceeded`: More than the configured number of consecutive failures
    /// - `FatalError::Cancelled`: A stop was requested before a connection was established
    /// - `FatalError::Signing`: The request could not be signed
    pub async fn connect<H: StreamHost>(
        &mut self,
        credentials: &Credentials,
        filter: &FilterSpec,
        host: &mut H,
    ) -> Result<OpenConnection<T::Stream>, FatalError> {
        if let Some(e) = &self.terminal {
            return Err(e.clone());
        }

        self.state = ConnectionState::Connecting;
        let signer = OAuthSigner::new(credentials.clone());

        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.stop.stopped() => None,
                result = attempt_connect(&self.transport, &self.endpoint, &signer, filter, host) => Some(result),
            };

            match attempt {
                None => {
                    self.state = ConnectionState::Disconnected;
                    return Err(FatalError::Cancelled);
                }
                Some(Ok(connection)) => {
                    self.backoff.reset();
                    self.state = ConnectionState::Connected;
                    host.on_log(
                        &format!("Connected to {} ({})", self.endpoint, connection.address()),
                        Level::Info,
                    );
                    return Ok(connection);
                }
                Some(Err(AttemptError::Fatal(e))) => return Err(self.fail(e, host)),
                Some(Err(AttemptError::Transient(e))) => {
                    host.on_log(&format!("Connection attempt failed: {}", e), Level::Warn);
                    self.wait_before_retry(host).await?;
                }
            }
        }
    }

    /// Releases the connection. Safe to call more than once.
    pub fn disconnect(&mut self, connection: &mut OpenConnection<T::Stream>) {
        connection.disconnect();
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Streams records to the host until it stops the client or a fatal error occurs.
    ///
    /// Unexpected drops reconnect through the backoff path. A refresh
    /// reconnects immediately with the filter returned by
    /// [`StreamHost::filter_update`], or the current one.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The host requested a stop
    /// - `Err(FatalError)`: The lifecycle ended; see [`connect`](Self::connect)
    pub async fn run<H: StreamHost>(
        &mut self,
        credentials: &Credentials,
        filter: FilterSpec,
        host: &mut H,
    ) -> Result<(), FatalError> {
        let mut filter = filter;

        loop {
            let mut connection = match self.connect(credentials, &filter, host).await {
                Ok(connection) => connection,
                Err(FatalError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            let outcome = self.reader.run(&mut connection, host, &mut self.stop).await;
            self.disconnect(&mut connection);

            let reconnect = match outcome {
                Err(e) => return Err(self.fail(e, host)),
                Ok(ReadOutcome::Stopped) => {
                    host.on_log("Stream stopped by host", Level::Info);
                    return Ok(());
                }
                Ok(ReadOutcome::RefreshRequested) => {
                    self.begin_refresh();
                    if let Some(update) = host.filter_update() {
                        filter = update;
                    }
                    host.on_log("Reconnecting with refreshed filter parameters", Level::Info);
                    Ok(())
                }
                Ok(ReadOutcome::EndOfStream) => {
                    host.on_log("Stream closed by peer, reconnecting", Level::Warn);
                    self.wait_before_retry(host).await
                }
                Ok(ReadOutcome::Dropped(e)) => {
                    host.on_log(&format!("Stream dropped: {}, reconnecting", e), Level::Warn);
                    self.wait_before_retry(host).await
                }
            };

            match reconnect {
                Ok(()) => {}
                Err(FatalError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// A planned reconnect is not a failure: the backoff starts over.
    fn begin_refresh(&mut self) {
        self.state = ConnectionState::Refreshing;
        self.backoff.reset();
    }

    async fn wait_before_retry<H: StreamHost>(&mut self, host: &mut H) -> Result<(), FatalError> {
        let delay = match self.backoff.record_failure() {
            BackoffStep::Retry(delay) => delay,
            BackoffStep::Exhausted { failures } => {
                return Err(self.fail(FatalError::RetryLimitExceeded { failures }, host));
            }
        };

        let retries_left = self.backoff.retries_left();
        let severity = if retries_left > self.backoff.max_attempts() / 2 {
            Level::Info
        } else {
            Level::Warn
        };
        host.on_log(
            &format!(
                "Sleeping {} seconds, {} retries left",
                delay.as_secs(),
                retries_left
            ),
            severity,
        );

        let stopped = tokio::select! {
            biased;
            _ = self.stop.stopped() => true,
            _ = tokio::time::sleep(delay) => false,
        };
        if stopped {
            self.state = ConnectionState::Disconnected;
            return Err(FatalError::Cancelled);
        }
        Ok(())
    }

    fn fail<H: StreamHost>(&mut self, error: FatalError, host: &mut H) -> FatalError {
        host.on_log(&error.to_string(), Level::Error);
        self.state = ConnectionState::Failed;
        self.terminal = Some(error.clone());
        error
    }
}

async fn attempt_connect<T, H>(
    transport: &T,
    endpoint: &Url,
    signer: &OAuthSigner,
    filter: &FilterSpec,
    host: &mut H,
) -> Result<OpenConnection<T::Stream>, AttemptError>
where
    T: Transport,
    H: StreamHost,
{
    let hostname = endpoint.host_str().unwrap_or_default();
    let port = endpoint.port_or_known_default().unwrap_or(443);

    // A lookup that fails is retried; one that succeeds with no addresses is not
    let addresses = transport.resolve(hostname, port).await.map_err(|e| {
        AttemptError::Transient(TransportError::Transient(format!(
            "failed to resolve {}: {}",
            hostname, e
        )))
    })?;

    let Some(address) = pick_address(&addresses) else {
        return Err(AttemptError::Fatal(FatalError::DnsResolution {
            host: hostname.to_string(),
        }));
    };
    host.on_log(
        &format!(
            "Resolved host {} to {}",
            hostname,
            addresses
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Level::Debug,
    );
    host.on_log(&format!("Connecting to {}", address), Level::Info);

    let params = filter.to_request_parameters();
    let request = StreamRequest {
        url: endpoint.clone(),
        address: SocketAddr::new(address, port),
        authorization: signer
            .authorization_header("POST", endpoint, &params)
            .map_err(|e| AttemptError::Fatal(e.into()))?,
        body: encode_form_body(&params),
    };

    match transport.open(&request).await {
        Ok(stream) => Ok(OpenConnection::new(stream, request.address)),
        Err(TransportError::Rejected { status, reason }) => Err(AttemptError::Fatal(
            FatalError::NonRetryableServerSignal { status, reason },
        )),
        Err(e) => Err(AttemptError::Transient(e)),
    }
}

/// Picks one address uniformly at random to spread load across edge endpoints.
fn pick_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses.choose(&mut rand::thread_rng()).copied()
}
