//! Log Collector
//!
//! Reads null-terminated messages and appends `<seq> <epoch> <message>` lines.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::thread::JoinHandle;

use chrono::Utc;
use tracing::{debug, info};

/// Copy every message from `reader` to `writer` until the stream ends.
///
/// Returns the number of lines written. A trailing message without its
/// terminator is still written.
pub fn collect<R: Read, W: Write>(reader: R, mut writer: W) -> io::Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::with_capacity(128);
    let mut sequence = 0u64;

    loop {
        frame.clear();
        if reader.read_until(0, &mut frame)? == 0 {
            break;
        }
        if frame.last() == Some(&0) {
            frame.pop();
        }

        let message = String::from_utf8_lossy(&frame);
        writeln!(writer, "{} {} {}", sequence, Utc::now().timestamp(), message)?;
        writer.flush()?;
        sequence += 1;
    }

    debug!("Log collector saw end of stream after {} lines", sequence);
    Ok(sequence)
}

/// Run [`collect`] on a dedicated thread, writing to `path` (truncated)
pub fn spawn_collector<R>(reader: R, path: &Path) -> io::Result<JoinHandle<io::Result<u64>>>
where
    R: Read + Send + 'static,
{
    let file = File::create(path)?;
    info!("Writing event log to {}", path.display());

    std::thread::Builder::new()
        .name("log-collector".to_string())
        .spawn(move || collect(reader, BufWriter::new(file)))
}
