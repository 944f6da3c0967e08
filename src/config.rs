//! Configuration module for the streaming client.
//!
//! This module contains the credential and tuning structures for the stream
//! connection, plus environment variable loading for hosts that keep their
//! settings there.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::filter::FilterSpec;

/// Default filter endpoint.
pub const DEFAULT_STREAM_URL: &str = "https://stream.twitter.com/1.1/statuses/filter.json";
/// Default number of consecutive connect failures before giving up.
pub const DEFAULT_CONNECT_FAILURES_MAX: u32 = 20;
/// Default interval between refresh checks.
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 10;
/// Default time without any line before a connection counts as dropped.
pub const DEFAULT_STALL_TIMEOUT_SECONDS: u64 = 90;

/// Masks a secret for logging, keeping at most 8 leading and 8 trailing characters.
pub(crate) fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    let prefix: String = chars.iter().take(8.min(len)).collect();

    if len > 16 {
        let suffix: String = chars[len - 8..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        format!("{}...", prefix)
    }
}

/// OAuth 1.0a credentials for the stream connection.
///
/// The consumer pair identifies the application, the access pair identifies
/// the user. All four are opaque strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &mask_secret(&self.consumer_key))
            .field("access_token", &mask_secret(&self.access_token))
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Loads credentials from `xapi_consumer_key`, `xapi_consumer_secret`,
    /// `xapi_access_token` and `xapi_access_secret`.
    ///
    /// # Returns
    ///
    /// - `Ok(Credentials)`: If all four variables are present and non-empty
    /// - `Err(ConfigError::Missing)`: If any of them is missing or empty
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            consumer_key: required_secret("xapi_consumer_key")?,
            consumer_secret: required_secret("xapi_consumer_secret")?,
            access_token: required_secret("xapi_access_token")?,
            access_secret: required_secret("xapi_access_secret")?,
        })
    }
}

fn required_secret(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => {
            info!("Found {} environment variable with length: {}", name, value.len());
            debug!("{} (masked): {}", name, mask_secret(&value));
            Ok(value)
        }
        Ok(_) => {
            error!("{} is set but empty", name);
            Err(ConfigError::Missing(name.to_string()))
        }
        Err(e) => {
            error!("Failed to load {} from environment: {}", name, e);
            Err(ConfigError::Missing(name.to_string()))
        }
    }
}

/// Options passed through to the HTTP transport unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Connect and response-header timeout.
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_redirects: 5,
            user_agent: concat!("firehose/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Complete configuration for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(flatten)]
    pub credentials: Credentials,

    #[serde(default)]
    pub track: Vec<String>,

    /// `[min_lon, min_lat, max_lon, max_lat]` boxes.
    #[serde(default)]
    pub location_boxes: Vec<Vec<f64>>,

    /// `[lon, lat, radius_km]` circles, converted to boxes.
    #[serde(default)]
    pub location_circles: Vec<Vec<f64>>,

    /// Extra endpoint parameters such as `follow`.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    #[serde(flatten)]
    pub transport: TransportOptions,

    #[serde(default = "default_connect_failures_max")]
    pub connect_failures_max: u32,

    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,

    #[serde(default = "default_stall_timeout_seconds")]
    pub stall_timeout_seconds: u64,
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_connect_failures_max() -> u32 {
    DEFAULT_CONNECT_FAILURES_MAX
}

fn default_refresh_interval_seconds() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECONDS
}

fn default_stall_timeout_seconds() -> u64 {
    DEFAULT_STALL_TIMEOUT_SECONDS
}

impl StreamConfig {
    /// Creates a configuration with default tuning and an empty filter.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            track: Vec::new(),
            location_boxes: Vec::new(),
            location_circles: Vec::new(),
            parameters: BTreeMap::new(),
            stream_url: default_stream_url(),
            transport: TransportOptions::default(),
            connect_failures_max: DEFAULT_CONNECT_FAILURES_MAX,
            refresh_interval_seconds: DEFAULT_REFRESH_INTERVAL_SECONDS,
            stall_timeout_seconds: DEFAULT_STALL_TIMEOUT_SECONDS,
        }
    }

    /// Creates a new `StreamConfig` instance by loading settings from environment variables.
    ///
    /// # Required Environment Variables
    ///
    /// - `xapi_consumer_key`, `xapi_consumer_secret`: Application credentials
    /// - `xapi_access_token`, `xapi_access_secret`: User credentials
    ///
    /// # Optional Environment Variables
    ///
    /// - `xapi_track`: Comma-separated keywords
    /// - `xapi_locations`: `;`-separated boxes, each `min_lon,min_lat,max_lon,max_lat`
    /// - `xapi_circles`: `;`-separated circles, each `lon,lat,radius_km`
    /// - `STREAM_URL`, `TIMEOUT_SECONDS`, `MAX_REDIRECTS`, `USER_AGENT`
    /// - `CONNECT_FAILURES_MAX`, `REFRESH_INTERVAL_SECONDS`, `STALL_TIMEOUT_SECONDS`
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use firehose::StreamConfig;
    ///
    /// std::env::set_var("xapi_consumer_key", "your_consumer_key");
    /// std::env::set_var("xapi_consumer_secret", "your_consumer_secret");
    /// std::env::set_var("xapi_access_token", "your_access_token");
    /// std::env::set_var("xapi_access_secret", "your_access_secret");
    /// std::env::set_var("xapi_track", "rust,tokio");
    ///
    /// let config = StreamConfig::from_env().unwrap();
    /// assert_eq!(config.track, vec!["rust", "tokio"]);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        info!("Loading stream configuration from environment variables");

        let mut config = Self::new(Credentials::from_env()?);

        if let Ok(track) = env::var("xapi_track") {
            config.track = track
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            info!("Tracking keywords: {:?}", config.track);
        }
        if let Ok(locations) = env::var("xapi_locations") {
            config.location_boxes = parse_float_groups("xapi_locations", &locations)?;
            info!("Loaded {} location boxes", config.location_boxes.len());
        }
        if let Ok(circles) = env::var("xapi_circles") {
            config.location_circles = parse_float_groups("xapi_circles", &circles)?;
            info!("Loaded {} location circles", config.location_circles.len());
        }
        if let Ok(url) = env::var("STREAM_URL") {
            config.stream_url = url;
        }
        if let Ok(agent) = env::var("USER_AGENT") {
            config.transport.user_agent = agent;
        }

        if let Some(v) = parse_env("TIMEOUT_SECONDS")? {
            config.transport.timeout_seconds = v;
        }
        if let Some(v) = parse_env("MAX_REDIRECTS")? {
            config.transport.max_redirects = v;
        }
        if let Some(v) = parse_env("CONNECT_FAILURES_MAX")? {
            config.connect_failures_max = v;
        }
        if let Some(v) = parse_env("REFRESH_INTERVAL_SECONDS")? {
            config.refresh_interval_seconds = v;
        }
        if let Some(v) = parse_env("STALL_TIMEOUT_SECONDS")? {
            config.stall_timeout_seconds = v;
        }

        if config.track.is_empty() && config.location_boxes.is_empty() && config.location_circles.is_empty() {
            warn!("No track keywords or locations configured - the endpoint will reject an empty filter");
        }

        info!("Stream configuration loaded successfully");
        Ok(config)
    }

    /// Builds the initial filter from the configured keywords, boxes and circles.
    ///
    /// Malformed boxes or circles are logged and leave the locations empty;
    /// circles take precedence over boxes when both are valid.
    pub fn filter_spec(&self) -> FilterSpec {
        let mut filter = FilterSpec::new();
        filter.set_track(self.track.iter().cloned());
        for (key, value) in &self.parameters {
            filter.set_parameter(key.clone(), value.clone());
        }

        if !self.location_boxes.is_empty() {
            if let Err(e) = filter.set_locations(&self.location_boxes) {
                warn!("Ignoring configured location boxes: {}", e);
            }
        }
        if !self.location_circles.is_empty() {
            if let Err(e) = filter.set_locations_by_circle(&self.location_circles) {
                warn!("Ignoring configured location circles: {}", e);
            }
        }

        filter
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_seconds)
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Parses `1,2,3,4;5,6,7,8` into groups of floats. Group arity is checked by the filter.
fn parse_float_groups(name: &str, raw: &str) -> Result<Vec<Vec<f64>>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .map(|group| {
            group
                .split(',')
                .map(|v| {
                    v.trim().parse::<f64>().map_err(|e| ConfigError::Invalid {
                        name: name.to_string(),
                        reason: format!("'{}': {}", v.trim(), e),
                    })
                })
                .collect()
        })
        .collect()
}
