//! # Firehose
//!
//! Command line client that streams filtered Twitter/X records to stdout, one
//! JSON document per line.
//!
//! ## Environment Variables
//!
//! - `xapi_consumer_key`, `xapi_consumer_secret`: Application credentials
//! - `xapi_access_token`, `xapi_access_secret`: User credentials
//! - `xapi_track`: Comma-separated keywords
//! - `xapi_locations`, `xapi_circles`: Location filters
//! - `RUST_LOG`: Log level, diagnostics go to stderr

use std::io::Write;
use std::process::ExitCode;

use firehose::{ConnectionManager, StreamConfig, StreamHost};
use log::{error, info, warn};

/// Writes each record to stdout as it arrives.
struct StdoutHost {
    out: std::io::Stdout,
}

impl StreamHost for StdoutHost {
    fn on_record(&mut self, record: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", record).and_then(|_| out.flush()) {
            warn!("Failed to write record to stdout: {}", e);
        }
    }
}

/// Main entry point for the firehose client.
///
/// Loads the configuration, then streams until interrupted with Ctrl-C or
/// until the connection lifecycle fails.
///
/// # Example Usage
///
/// ```bash
/// # Track two keywords with connection logging
/// xapi_track=rust,tokio RUST_LOG=info cargo run
/// ```
///
/// # Exit Status
///
/// Non-zero if the configuration is invalid or the stream fails fatally.
#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logging system
    env_logger::init();

    let config = match StreamConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut manager = match ConnectionManager::new(&config) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Invalid stream configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = manager.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping stream");
                stop.stop();
            }
            Err(e) => error!("Failed to listen for interrupt signal: {}", e),
        }
    });

    let filter = config.filter_spec();
    info!(
        "Starting stream to {} with parameters {:?}",
        manager.endpoint(),
        filter.to_request_parameters()
    );

    let mut host = StdoutHost {
        out: std::io::stdout(),
    };
    match manager.run(&config.credentials, filter, &mut host).await {
        Ok(()) => {
            info!("Stream stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Stream failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
