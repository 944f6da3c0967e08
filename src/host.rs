//! The capabilities a host application provides to the stream client.

use log::Level;

use crate::filter::FilterSpec;

/// Callbacks the stream client invokes while running.
///
/// Only [`on_record`](StreamHost::on_record) is required. The defaults log
/// through the `log` facade, never ask for a refresh and keep the current filter.
pub trait StreamHost {
    /// Receives one non-empty line from the stream, verbatim.
    fn on_record(&mut self, record: &str);

    /// Diagnostic sink for connection lifecycle messages.
    fn on_log(&mut self, message: &str, severity: Level) {
        log::log!(severity, "{}", message);
    }

    /// Asked periodically whether the stream should reconnect with new filter parameters.
    fn should_refresh(&mut self) -> bool {
        false
    }

    /// The filter to use for the planned reconnect after `should_refresh` returned true.
    ///
    /// `None` reconnects with the current filter.
    fn filter_update(&mut self) -> Option<FilterSpec> {
        None
    }
}
