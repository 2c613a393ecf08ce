//! Persistence consumer

use std::time::{Duration, Instant};

use event_log::EventLog;
use shared_buffer::{BufferError, ConsumerId, SharedBuffer};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::repository::Repository;
use crate::StorageError;

/// Moves readings from the shared buffer into the repository.
///
/// [`run`](Self::run) blocks the calling thread; inserts are driven on the
/// given runtime handle, so call it from a blocking thread rather than from
/// inside an async task.
pub struct StorageManager {
    repository: Repository,
    runtime: Handle,
    stored: u64,
    failed: u64,
}

impl StorageManager {
    pub fn new(repository: Repository, runtime: Handle) -> Self {
        Self {
            repository,
            runtime,
            stored: 0,
            failed: 0,
        }
    }

    /// Consume until the buffer drains or nothing arrives for `idle_timeout`.
    /// Returns the number of rows stored.
    pub fn run(
        &mut self,
        buffer: &SharedBuffer,
        consumer_id: ConsumerId,
        idle_timeout: Duration,
        events: &EventLog,
    ) -> Result<u64, StorageError> {
        info!(
            "Storage manager consuming as {} into table {}",
            consumer_id,
            self.repository.table()
        );
        let mut last_read = Instant::now();

        loop {
            let remaining = idle_timeout.saturating_sub(last_read.elapsed());
            if remaining.is_zero() {
                info!("Storage manager idle for {:?}, stopping", idle_timeout);
                break;
            }

            let record = match buffer.consume_timeout(consumer_id, remaining) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(BufferError::EndOfStream) => {
                    info!("Storage manager reached end of stream");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            last_read = Instant::now();

            match self.runtime.block_on(self.repository.insert_reading(&record)) {
                Ok(_) => self.stored += 1,
                Err(e) => {
                    self.failed += 1;
                    warn!("Insert of reading from sensor {} failed: {}", record.sensor_id, e);
                    events.warn("Connection to SQL server lost.");
                }
            }
        }

        info!(
            "Storage manager finished: {} stored, {} failed",
            self.stored, self.failed
        );
        Ok(self.stored)
    }

    /// Rows stored so far
    pub fn stored(&self) -> u64 {
        self.stored
    }

    /// Inserts that failed
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Close the database connection pool
    pub fn close(self) {
        self.runtime.block_on(self.repository.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::StorageConfig;
    use sensor_protocol::SensorRecord;
    use shared_buffer::BufferConfig;
    use std::sync::Arc;
    use std::thread;
    use tokio::runtime::Runtime;

    const STORE: ConsumerId = 11;

    fn single_consumer_buffer() -> Arc<SharedBuffer> {
        let buffer = Arc::new(SharedBuffer::new(BufferConfig { max_consumers: 1 }).unwrap());
        buffer.register_consumer(STORE).unwrap();
        buffer
    }

    fn connect(runtime: &Runtime) -> Repository {
        runtime
            .block_on(Repository::connect(&StorageConfig::in_memory(), &EventLog::disabled()))
            .unwrap()
    }

    #[test]
    fn test_stores_until_drained() {
        let runtime = Runtime::new().unwrap();
        let buffer = single_consumer_buffer();
        let mut manager = StorageManager::new(connect(&runtime), runtime.handle().clone());

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                buffer.insert(SensorRecord::new(1, 21.5, 1000)).unwrap();
                buffer.insert(SensorRecord::new(1, 22.0, 1001)).unwrap();
                buffer.begin_drain();
            })
        };

        let stored = manager
            .run(&buffer, STORE, Duration::from_secs(30), &EventLog::disabled())
            .unwrap();
        producer.join().unwrap();

        assert_eq!(stored, 2);
        assert_eq!(manager.failed(), 0);

        let rows = runtime.block_on(manager.repository().find_all()).unwrap();
        let records: Vec<_> = rows.iter().map(|r| r.record()).collect();
        assert_eq!(
            records,
            vec![SensorRecord::new(1, 21.5, 1000), SensorRecord::new(1, 22.0, 1001)]
        );
    }

    #[test]
    fn test_stops_when_idle() {
        let runtime = Runtime::new().unwrap();
        let buffer = single_consumer_buffer();
        let mut manager = StorageManager::new(connect(&runtime), runtime.handle().clone());

        let started = Instant::now();
        let stored = manager
            .run(&buffer, STORE, Duration::from_millis(100), &EventLog::disabled())
            .unwrap();
        assert_eq!(stored, 0);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!buffer.is_draining());
    }

    #[test]
    fn test_insert_failure_is_logged_and_skipped() {
        let runtime = Runtime::new().unwrap();
        let buffer = single_consumer_buffer();
        let repository = connect(&runtime);
        runtime.block_on(repository.close());
        let mut manager = StorageManager::new(repository, runtime.handle().clone());

        buffer.insert(SensorRecord::new(2, 18.0, 5)).unwrap();
        buffer.begin_drain();

        let (events, mut reader) = EventLog::pipe();
        let stored = manager
            .run(&buffer, STORE, Duration::from_secs(30), &events)
            .unwrap();
        drop(events);

        assert_eq!(stored, 0);
        assert_eq!(manager.failed(), 1);

        let mut log = String::new();
        std::io::Read::read_to_string(&mut reader, &mut log).unwrap();
        assert_eq!(log, "Connection to SQL server lost.\0");
    }

    #[test]
    fn test_close_shuts_the_pool() {
        let runtime = Runtime::new().unwrap();
        let repository = connect(&runtime);
        let pool_user = repository.clone();
        StorageManager::new(repository, runtime.handle().clone()).close();

        let result = runtime.block_on(pool_user.insert_reading(&SensorRecord::new(3, 20.0, 7)));
        assert!(result.is_err());
    }
}
