//! The read loop over an established stream connection.

use std::time::Duration;

use log::trace;
use tokio::time::Instant;

use crate::connection::{OpenConnection, StopSignal};
use crate::error::{FatalError, TransportError};
use crate::host::StreamHost;
use crate::refresh::RefreshScheduler;
use crate::transport::LineStream;

/// How long a single read may wait before the loop looks at the clock again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why the read loop returned.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The peer closed the stream.
    EndOfStream,
    /// The stream failed or stalled mid-read.
    Dropped(TransportError),
    /// The host asked for a planned reconnect.
    RefreshRequested,
    /// The host asked the client to stop.
    Stopped,
}

enum ReadEvent {
    Stop,
    Line(Result<Option<String>, TransportError>),
    Idle,
}

/// Drives one connection: forwards records, skips keepalives and consults the
/// host's refresh hook on schedule.
#[derive(Debug, Clone)]
pub struct StreamReader {
    scheduler: RefreshScheduler,
    poll_interval: Duration,
    stall_timeout: Duration,
}

impl StreamReader {
    pub fn new(scheduler: RefreshScheduler, stall_timeout: Duration) -> Self {
        let poll_interval = DEFAULT_POLL_INTERVAL
            .min(scheduler.interval())
            .max(MIN_POLL_INTERVAL);
        Self {
            scheduler,
            poll_interval,
            stall_timeout,
        }
    }

    /// Reads until end of stream, a drop, a refresh or a stop request.
    ///
    /// The connection is released before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// `FatalError::NonRetryableServerSignal` if the stream reports a permanent
    /// rejection mid-read.
    pub async fn run<S, H>(
        &self,
        connection: &mut OpenConnection<S>,
        host: &mut H,
        stop: &mut StopSignal,
    ) -> Result<ReadOutcome, FatalError>
    where
        S: LineStream,
        H: StreamHost,
    {
        let outcome = self.read_until_exit(connection, host, stop).await;
        connection.disconnect();
        outcome
    }

    async fn read_until_exit<S, H>(
        &self,
        connection: &mut OpenConnection<S>,
        host: &mut H,
        stop: &mut StopSignal,
    ) -> Result<ReadOutcome, FatalError>
    where
        S: LineStream,
        H: StreamHost,
    {
        let mut last_checked_at = Instant::now();
        let mut last_activity = Instant::now();

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.stopped() => ReadEvent::Stop,
                next = tokio::time::timeout(self.poll_interval, connection.next_line()) => match next {
                    Ok(line) => ReadEvent::Line(line),
                    Err(_) => ReadEvent::Idle,
                },
            };

            match event {
                ReadEvent::Stop => return Ok(ReadOutcome::Stopped),
                ReadEvent::Line(Ok(Some(line))) => {
                    last_activity = Instant::now();
                    if line.trim().is_empty() {
                        trace!("Keepalive received");
                    } else {
                        connection.count_record();
                        host.on_record(&line);
                    }
                }
                ReadEvent::Line(Ok(None)) => return Ok(ReadOutcome::EndOfStream),
                ReadEvent::Line(Err(TransportError::Rejected { status, reason })) => {
                    return Err(FatalError::NonRetryableServerSignal { status, reason })
                }
                ReadEvent::Line(Err(e)) => return Ok(ReadOutcome::Dropped(e)),
                ReadEvent::Idle => {
                    if last_activity.elapsed() >= self.stall_timeout {
                        return Ok(ReadOutcome::Dropped(TransportError::Stalled {
                            seconds: self.stall_timeout.as_secs(),
                        }));
                    }
                }
            }

            let now = Instant::now();
            if self.scheduler.is_due(last_checked_at, now) {
                last_checked_at = now;
                if host.should_refresh() {
                    return Ok(ReadOutcome::RefreshRequested);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::stop_channel;
    use crate::tests::{End, ScriptedStream};

    struct Collect(Vec<String>);

    impl StreamHost for Collect {
        fn on_record(&mut self, record: &str) {
            self.0.push(record.to_string());
        }
    }

    #[test]
    fn test_poll_interval_follows_refresh_interval() {
        let stall = Duration::from_secs(90);
        let reader = StreamReader::new(RefreshScheduler::default(), stall);
        assert_eq!(reader.poll_interval, DEFAULT_POLL_INTERVAL);

        let reader = StreamReader::new(RefreshScheduler::new(Duration::from_millis(250)), stall);
        assert_eq!(reader.poll_interval, Duration::from_millis(250));

        let reader = StreamReader::new(RefreshScheduler::new(Duration::ZERO), stall);
        assert_eq!(reader.poll_interval, MIN_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalives_are_not_records() {
        let reader = StreamReader::new(RefreshScheduler::default(), Duration::from_secs(90));
        let stream = ScriptedStream::new(["", "{\"id\":7}", "  ", "{\"id\":8}"], End::Eof);
        let mut connection = OpenConnection::new(stream, "127.0.0.1:443".parse().unwrap());
        let (_handle, mut stop) = stop_channel();
        let mut host = Collect(Vec::new());

        let outcome = reader.run(&mut connection, &mut host, &mut stop).await.unwrap();

        assert!(matches!(outcome, ReadOutcome::EndOfStream));
        assert_eq!(host.0, vec!["{\"id\":7}", "{\"id\":8}"]);
        assert_eq!(connection.records(), 2);
        assert!(!connection.is_open());
    }
}
