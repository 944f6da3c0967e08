//! Error types for the streaming client.
//!
//! Errors fall into three groups: local filter validation failures that never
//! leave the [`FilterSpec`](crate::filter::FilterSpec) boundary, transport
//! failures that the connection manager classifies as retryable or not, and
//! fatal errors that end a connection lifecycle and are surfaced to the host.

use thiserror::Error;

/// A terminal error. Once one of these is returned the lifecycle is over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    /// The stream hostname resolved to zero addresses.
    #[error("unable to resolve hostname: {host}")]
    DnsResolution { host: String },

    /// Consecutive transient failures exceeded the retry budget.
    #[error("connection failure limit exceeded with {failures} failures")]
    RetryLimitExceeded { failures: u32 },

    /// The server permanently rejected the request.
    #[error("stream request rejected by server ({status}): {reason}")]
    NonRetryableServerSignal { status: u16, reason: String },

    /// The host asked the client to stop while a connection was being established.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// The request could not be signed with the configured credentials.
    #[error("failed to sign stream request: {0}")]
    Signing(#[from] SigningError),
}

impl FatalError {
    /// HTTP status code carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::NonRetryableServerSignal { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Always false; a fatal error ends the lifecycle.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }
}

/// Failure reported by a [`Transport`](crate::transport::Transport) or an open stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket, TLS, timeout or server-side failure worth retrying.
    #[error("transport failure: {0}")]
    Transient(String),

    /// The server answered with a status that will not change on retry.
    #[error("request rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// No data (not even a keepalive) arrived within the stall timeout.
    #[error("no data received for {seconds} seconds")]
    Stalled { seconds: u64 },
}

impl TransportError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

/// OAuth request signing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

/// A track, box or circle entry that failed local shape validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedFilterInput {
    /// A bounding box did not have exactly four components.
    #[error("invalid location bounding box {values:?}: expected 4 components, got {len}")]
    BoxArity { len: usize, values: Vec<f64> },

    /// A circle did not have exactly three components.
    #[error("invalid location triplet {values:?}: expected 3 components, got {len}")]
    CircleArity { len: usize, values: Vec<f64> },

    /// A circle had a non-positive radius or a latitude at or beyond a pole.
    #[error("invalid location circle {values:?}: {reason}")]
    InvalidCircle { values: Vec<f64>, reason: String },

    /// NaN or infinity in a box or circle.
    #[error("non-finite coordinate in {values:?}")]
    NonFiniteCoordinate { values: Vec<f64> },
}

/// Configuration could not be loaded or is invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("invalid stream URL: {0}")]
    Url(#[from] url::ParseError),
}
