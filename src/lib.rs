//! # Firehose Library
//!
//! A long-lived client for the Twitter/X filtered streaming endpoint. It signs
//! requests with OAuth 1.0a, spreads connections across the addresses the
//! endpoint hostname resolves to, and reconnects with exponential backoff until
//! the host stops it or a fatal error occurs.
//!
//! ## Features
//!
//! - Keyword, bounding box and circle filters (circles are approximated by boxes)
//! - OAuth 1.0a HMAC-SHA1 request signing with a fresh nonce per connection
//! - Random endpoint address per attempt, with TLS still verifying the hostname
//! - Exponential backoff from 2 to 16 seconds with a bounded retry budget
//! - Periodic refresh checks so the host can change filters on a live stream
//! - Stall detection for connections that stop sending keepalives
//!
//! ## Configuration
//!
//! Credentials come from `xapi_consumer_key`, `xapi_consumer_secret`,
//! `xapi_access_token` and `xapi_access_secret`; see [`StreamConfig::from_env`]
//! for the optional settings.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use firehose::{ConnectionManager, StreamConfig, StreamHost};
//!
//! struct Printer;
//!
//! impl StreamHost for Printer {
//!     fn on_record(&mut self, record: &str) {
//!         println!("{}", record);
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::from_env()?;
//! let mut manager = ConnectionManager::new(&config)?;
//! manager
//!     .run(&config.credentials, config.filter_spec(), &mut Printer)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod geo;
pub mod host;
pub mod oauth;
pub mod reader;
pub mod refresh;
pub mod transport;

// Re-export commonly used items for convenience
pub use backoff::{BackoffState, BackoffStep};
pub use config::{Credentials, StreamConfig, TransportOptions};
pub use connection::{ConnectionManager, ConnectionState, OpenConnection, StopHandle};
pub use error::{ConfigError, FatalError, MalformedFilterInput, SigningError, TransportError};
pub use filter::FilterSpec;
pub use geo::{bounding_box_for_circle, BoundingBox, Circle};
pub use host::StreamHost;
pub use oauth::OAuthSigner;
pub use reader::{ReadOutcome, StreamReader};
pub use refresh::RefreshScheduler;
pub use transport::{HttpTransport, LineStream, Transport};
