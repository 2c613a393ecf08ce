//! Pipeline wiring
//!
//! The connection manager runs as a tokio task. Both consumers block on the
//! shared buffer, so they run on blocking threads; the storage consumer
//! drives its database calls through the runtime handle. The event log
//! collector runs on its own thread and finishes once every stage has
//! dropped its handle.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use connection_manager::{ConnMgrError, ConnectionManager, ListenSummary, StopHandle};
use data_manager::{DataError, DataManager, SensorMap};
use event_log::{spawn_collector, EventLog};
use shared_buffer::{ConsumerId, SharedBuffer};
use storage::{Repository, StorageError, StorageManager};
use tokio::runtime::Handle;
use tokio::task::{self, JoinHandle};
use tracing::{error, info};

use crate::config::GatewayConfig;

/// Consumer id of the averaging stage
pub const DATA_MANAGER_ID: ConsumerId = 22;

/// Consumer id of the persistence stage
pub const STORAGE_MANAGER_ID: ConsumerId = 11;

/// What every stage did before the pipeline finished
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub listen: ListenSummary,
    /// Records consumed by the data manager
    pub averaged: u64,
    /// Rows written by the storage manager
    pub stored: u64,
    /// Lines written to the event log file
    pub log_lines: u64,
}

/// A running gateway
pub struct Pipeline {
    local_addr: SocketAddr,
    stop: StopHandle,
    connections: JoinHandle<Result<ListenSummary, ConnMgrError>>,
    averaging: JoinHandle<Result<u64, DataError>>,
    storage: JoinHandle<Result<u64, StorageError>>,
    collector: thread::JoinHandle<io::Result<u64>>,
}

impl Pipeline {
    /// Set up every stage and start serving on `port`.
    ///
    /// Everything that can fail at startup (configuration, sensor map, log
    /// file, bind) fails here, before any stage is running.
    pub async fn start(config: &GatewayConfig, port: u16) -> anyhow::Result<Self> {
        config.validate()?;

        let map = SensorMap::from_path(&config.sensor_map)
            .with_context(|| format!("loading sensor map {}", config.sensor_map.display()))?;
        let mut data_manager = DataManager::new(map, config.alerts.clone())?;

        let buffer = Arc::new(SharedBuffer::new(config.buffer_config())?);
        buffer.register_consumer(DATA_MANAGER_ID)?;
        buffer.register_consumer(STORAGE_MANAGER_ID)?;

        let (events, reader) = EventLog::pipe();
        let collector = spawn_collector(reader, &config.log_file)
            .with_context(|| format!("opening event log {}", config.log_file.display()))?;

        let manager =
            ConnectionManager::bind(config.conn_mgr_config(port), Arc::clone(&buffer), events.clone())
                .await?;
        let local_addr = manager.local_addr();
        let stop = manager.stop_handle();
        let connections = tokio::spawn(manager.run());

        let timeout = config.timeout();
        let averaging = {
            let buffer = Arc::clone(&buffer);
            let events = events.clone();
            task::spawn_blocking(move || {
                data_manager.run(&buffer, DATA_MANAGER_ID, timeout, &events)
            })
        };

        let storage = {
            let stop = stop.clone();
            let storage_config = config.storage_config();
            let runtime = Handle::current();
            task::spawn_blocking(move || {
                let repository = match runtime.block_on(Repository::connect(&storage_config, &events)) {
                    Ok(repository) => repository,
                    Err(e) => {
                        // Stop producing and release the data manager.
                        error!("Storage unavailable, shutting down: {}", e);
                        stop.stop();
                        buffer.begin_drain();
                        return Err(e);
                    }
                };

                let mut manager = StorageManager::new(repository, runtime);
                let stored = manager.run(&buffer, STORAGE_MANAGER_ID, timeout, &events);
                manager.close();
                stored
            })
        };

        info!("Gateway listening on {}", local_addr);
        Ok(Self {
            local_addr,
            stop,
            connections,
            averaging,
            storage,
            collector,
        })
    }

    /// Address the connection manager is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for every stage to finish. All stages are joined before the
    /// first failure is reported.
    pub async fn wait(self) -> anyhow::Result<PipelineReport> {
        let Pipeline {
            connections,
            averaging,
            storage,
            collector,
            ..
        } = self;

        let listen = connections.await.context("connection manager panicked")?;
        let averaged = averaging.await.context("data manager panicked")?;
        let stored = storage.await.context("storage manager panicked")?;

        let log_lines = task::spawn_blocking(move || collector.join())
            .await
            .context("joining log collector")?
            .map_err(|_| anyhow!("log collector panicked"))?
            .context("writing event log")?;

        let report = PipelineReport {
            listen: listen?,
            averaged: averaged?,
            stored: stored?,
            log_lines,
        };
        info!(
            "Gateway finished: {} records received, {} averaged, {} stored, {} log lines",
            report.listen.stats.records, report.averaged, report.stored, report.log_lines
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connection_manager::Termination;
    use sensor_protocol::SensorNode;
    use std::fs;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::Path;
    use std::time::Duration;

    fn test_config(dir: &Path) -> GatewayConfig {
        let sensor_map = dir.join("room_sensor.map");
        fs::write(&sensor_map, "1 15\n1 21\n2 37\n").unwrap();

        let mut config = GatewayConfig {
            timeout_secs: 1,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            sensor_map,
            log_file: dir.join("gateway.log"),
            ..Default::default()
        };
        config.storage.url = format!("sqlite://{}", dir.join("sensor.db").display());
        config
    }

    async fn finish(pipeline: Pipeline) -> anyhow::Result<PipelineReport> {
        tokio::time::timeout(Duration::from_secs(20), pipeline.wait())
            .await
            .expect("pipeline did not finish")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pipeline = Pipeline::start(&config, 0).await.unwrap();

        let mut hot = SensorNode::connect(pipeline.local_addr(), 37).await.unwrap();
        hot.send(25.0, 1000).await.unwrap();
        hot.send(26.0, 1001).await.unwrap();
        let mut stray = SensorNode::connect(pipeline.local_addr(), 999).await.unwrap();
        stray.send(20.0, 1002).await.unwrap();
        hot.close().await.unwrap();
        stray.close().await.unwrap();

        let report = finish(pipeline).await.unwrap();
        assert_eq!(report.listen.termination, Termination::IdleTimeout);
        assert_eq!(report.listen.stats.accepted, 2);
        assert_eq!(report.listen.stats.records, 3);
        assert_eq!(report.averaged, 3);
        assert_eq!(report.stored, 3);

        let log = fs::read_to_string(dir.path().join("gateway.log")).unwrap();
        let messages: Vec<&str> = log
            .lines()
            .map(|line| line.splitn(3, ' ').nth(2).unwrap_or_default())
            .collect();
        assert_eq!(report.log_lines as usize, messages.len());
        for expected in [
            "New table SensorData created.",
            "Connection to SQL server established.",
            "A sensor node with id:37 has opened a new connection.",
            "A sensor node with id:999 has opened a new connection.",
            "The sensor node with id:37 reports it's too hot (running avg 25.000000)",
            "The sensor node with id:37 reports it's too hot (running avg 25.500000)",
            "Received sensor data with invalid sensor node ID:999",
            "A sensor node with id:37 has closed the connection.",
            "A sensor node with id:999 has closed the connection.",
        ] {
            assert!(messages.contains(&expected), "missing log line: {}", expected);
        }

        let repo = Repository::connect(
            &storage::StorageConfig {
                clear_on_start: false,
                ..config.storage_config()
            },
            &EventLog::disabled(),
        )
        .await
        .unwrap();
        assert_eq!(repo.count().await.unwrap(), 3);
        assert_eq!(repo.find_exceeding_value(25.5).await.unwrap().len(), 1);
        repo.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_handle_ends_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.timeout_secs = 30;
        let pipeline = Pipeline::start(&config, 0).await.unwrap();

        let mut node = SensorNode::connect(pipeline.local_addr(), 15).await.unwrap();
        node.send(18.5, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        pipeline.stop_handle().stop();
        let report = finish(pipeline).await.unwrap();
        assert_eq!(report.listen.termination, Termination::Stopped);
        assert_eq!(report.averaged, 1);
        assert_eq!(report.stored, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_storage_failure_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.timeout_secs = 30;
        config.storage.url = format!("sqlite://{}", dir.path().join("no/such/dir.db").display());
        config.storage.connect_retries = 1;
        config.storage.retry_delay_secs = 0;

        let pipeline = Pipeline::start(&config, 0).await.unwrap();
        let err = finish(pipeline).await.unwrap_err();
        assert!(err.downcast_ref::<StorageError>().is_some());

        let log = fs::read_to_string(dir.path().join("gateway.log")).unwrap();
        assert!(log.contains("Reconnecting to SQL server."));
        assert!(log.contains("Connection to SQL server could not be established."));
    }

    #[tokio::test]
    async fn test_missing_sensor_map_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            sensor_map: dir.path().join("missing.map"),
            log_file: dir.path().join("gateway.log"),
            ..Default::default()
        };
        let err = Pipeline::start(&config, 0).await.err().unwrap();
        assert!(err.to_string().contains("missing.map"));
    }
}
