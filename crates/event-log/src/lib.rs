//! Gateway Event Log
//!
//! Every pipeline stage reports human-readable status lines (connections
//! opening and closing, rejected readings, storage trouble). Lines are written
//! as null-terminated strings into a byte stream; a collector on the other end
//! numbers and timestamps them into `gateway.log`.

mod collector;
mod pipe;

pub use collector::{collect, spawn_collector};
pub use pipe::{LogReader, PipeWriter};

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

/// Tracing target used when mirroring event lines
pub const EVENT_TARGET: &str = "gateway::events";

struct Sink {
    writer: Box<dyn Write + Send>,
    failed: bool,
}

/// Cloneable handle to the event log byte stream
#[derive(Clone)]
pub struct EventLog {
    sink: Option<Arc<Mutex<Sink>>>,
}

impl EventLog {
    /// Write events into an arbitrary byte stream
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Sink {
                writer: Box::new(writer),
                failed: false,
            }))),
        }
    }

    /// Handle that only mirrors to tracing
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Create an in-process byte pipe; the reader ends once every handle is dropped
    pub fn pipe() -> (Self, LogReader) {
        let (writer, reader) = pipe::pipe();
        (Self::new(writer), reader)
    }

    /// Record an informational event
    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(target: EVENT_TARGET, "{}", message);
        self.write(message);
    }

    /// Record an event that signals a problem
    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(target: EVENT_TARGET, "{}", message);
        self.write(message);
    }

    fn write(&self, message: &str) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        if sink.failed {
            return;
        }

        if let Err(e) = write_frame(sink.writer.as_mut(), message) {
            // Reported once; the pipeline keeps running without its log.
            warn!("Event log sink failed, further events are dropped: {}", e);
            sink.failed = true;
        }
    }
}

fn write_frame(writer: &mut dyn Write, message: &str) -> std::io::Result<()> {
    writer.write_all(message.as_bytes())?;
    writer.write_all(&[0])?;
    writer.flush()
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lines_are_null_terminated() {
        let buf = Shared::default();
        let log = EventLog::new(buf.clone());

        log.info("first");
        log.clone().warn("second");

        assert_eq!(buf.0.lock().unwrap().as_slice(), b"first\0second\0");
    }

    #[test]
    fn test_broken_sink_does_not_panic() {
        let log = EventLog::new(Broken);
        log.info("dropped");
        log.info("also dropped");
    }

    #[test]
    fn test_disabled_log() {
        let log = EventLog::disabled();
        log.info("nowhere");
        assert!(format!("{:?}", log).contains("false"));
    }
}
