//! Connection Manager Event Loop

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;

use event_log::EventLog;
use metrics::{counter, gauge};
use sensor_protocol::SensorRecord;
use shared_buffer::SharedBuffer;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ConnMgrConfig;
use crate::connection::{deadline_after, Connection};
use crate::error::ConnMgrError;

/// Why the service loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No sensor connected and none spoke for the idle timeout
    IdleTimeout,
    /// [`StopHandle::stop`] was called
    Stopped,
}

/// Counters collected while serving
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Connections accepted
    pub accepted: u64,
    /// Records forwarded to the buffer
    pub records: u64,
    /// Records dropped as invalid
    pub rejected: u64,
    /// Connections closed by their peer
    pub peer_closes: u64,
    /// Connections closed for inactivity
    pub idle_evictions: u64,
    /// Connections closed after a socket error
    pub io_errors: u64,
}

/// Result of a completed [`ConnectionManager::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSummary {
    pub stats: ConnectionStats,
    pub termination: Termination,
}

/// Requests termination of a running manager
#[derive(Debug, Clone)]
pub struct StopHandle {
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Stop the manager; it closes every connection and drains the buffer
    pub fn stop(&self) {
        self.notify.notify_one();
    }
}

enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Io(io::Error),
    Shutdown,
}

/// Sockets that became ready in one wait
struct Readiness {
    accepted: Option<io::Result<(TcpStream, SocketAddr)>>,
    readable: Vec<usize>,
}

/// Single-task TCP server feeding the shared buffer
pub struct ConnectionManager {
    config: ConnMgrConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    buffer: Arc<SharedBuffer>,
    events: EventLog,
    connections: Vec<Connection>,
    /// Last record from any sensor, refreshed when a connection closes
    last_activity: Instant,
    stop: Arc<Notify>,
    stats: ConnectionStats,
}

/// Bind and serve until the manager terminates
pub async fn listen(
    config: ConnMgrConfig,
    buffer: Arc<SharedBuffer>,
    events: EventLog,
) -> Result<ListenSummary, ConnMgrError> {
    ConnectionManager::bind(config, buffer, events).await?.run().await
}

impl ConnectionManager {
    /// Bind the listening socket; failure here is fatal
    pub async fn bind(
        config: ConnMgrConfig,
        buffer: Arc<SharedBuffer>,
        events: EventLog,
    ) -> Result<Self, ConnMgrError> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ConnMgrError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ConnMgrError::Bind { addr, source })?;

        info!(
            "Connection manager bound to {} (idle timeout {:?})",
            local_addr, config.timeout
        );

        Ok(Self {
            config,
            listener,
            local_addr,
            buffer,
            events,
            connections: Vec::new(),
            last_activity: Instant::now(),
            stop: Arc::new(Notify::new()),
            stats: ConnectionStats::default(),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for stopping the loop from another task
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            notify: Arc::clone(&self.stop),
        }
    }

    /// Run the service loop until idle timeout or stop
    pub async fn run(mut self) -> Result<ListenSummary, ConnMgrError> {
        info!("Connection manager listening on {}", self.local_addr);

        match self.serve().await {
            Ok(termination) => Ok(self.shutdown(termination)),
            Err(e) => {
                error!("Connection manager failed: {}", e);
                self.shutdown(Termination::Stopped);
                Err(e)
            }
        }
    }

    async fn serve(&mut self) -> Result<Termination, ConnMgrError> {
        let termination = loop {
            let now = Instant::now();

            if self.connections.is_empty()
                && now.saturating_duration_since(self.last_activity) >= self.config.timeout
            {
                break Termination::IdleTimeout;
            }

            self.sweep_idle(now);

            let deadline = self.next_deadline(now);
            let ready = tokio::select! {
                _ = self.stop.notified() => break Termination::Stopped,
                ready = timeout_at(deadline, wait_ready(&self.listener, &self.connections)) => ready,
            };

            // Elapsed: loop around to re-evaluate timeouts
            if let Ok(ready) = ready {
                self.dispatch(ready)?;
            }
        };
        Ok(termination)
    }

    fn next_deadline(&self, now: Instant) -> Instant {
        let timeout = self.config.timeout;
        let window = deadline_after(now, timeout);
        let nearest = if self.connections.is_empty() {
            deadline_after(self.last_activity, timeout)
        } else {
            self.connections
                .iter()
                .map(|c| c.expires_at(timeout))
                .min()
                .unwrap_or(window)
        };
        nearest.min(window)
    }

    fn sweep_idle(&mut self, now: Instant) {
        let timeout = self.config.timeout;
        let mut index = self.connections.len();
        while index > 0 {
            index -= 1;
            if self.connections[index].idle_for(now) >= timeout {
                self.close(index, CloseReason::IdleTimeout);
            }
        }
    }

    fn dispatch(&mut self, ready: Readiness) -> Result<(), ConnMgrError> {
        // New connections are appended, so the readable indices stay valid.
        if let Some(accepted) = ready.accepted {
            self.accept(accepted)?;
        }

        let mut closed = Vec::new();
        for index in ready.readable {
            if let Some(reason) = self.service(index) {
                closed.push((index, reason));
            }
        }
        for (index, reason) in closed.into_iter().rev() {
            self.close(index, reason);
        }
        Ok(())
    }

    fn accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) -> Result<(), ConnMgrError> {
        match accepted {
            Ok((stream, peer)) => {
                debug!("Accepted connection from {}", peer);
                self.connections
                    .push(Connection::new(stream, peer, Instant::now()));
                self.stats.accepted += 1;
                counter!("gateway_connections_accepted_total").increment(1);
                gauge!("gateway_active_connections").set(self.connections.len() as f64);
                Ok(())
            }
            Err(e) if is_transient_accept_error(&e) => {
                warn!("Dropped incoming connection: {}", e);
                Ok(())
            }
            Err(e) => Err(ConnMgrError::Accept(e)),
        }
    }

    /// Read whatever is available; returns a reason if the connection must close
    fn service(&mut self, index: usize) -> Option<CloseReason> {
        let mut buf = vec![0u8; self.config.read_chunk.max(1)];
        let now = Instant::now();

        let conn = &mut self.connections[index];
        match conn.stream.try_read(&mut buf) {
            Ok(0) => return Some(CloseReason::PeerClosed),
            Ok(n) => {
                conn.touch(now);
                conn.decoder.extend(&buf[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return None,
            Err(e) => return Some(CloseReason::Io(e)),
        }

        let records = conn.decoder.drain_records();
        for record in records {
            self.forward(index, record);
        }
        None
    }

    fn forward(&mut self, index: usize, record: SensorRecord) {
        let conn = &mut self.connections[index];

        if let Err(e) = record.validate() {
            self.stats.rejected += 1;
            counter!("gateway_records_rejected_total").increment(1);
            self.events.warn(format!(
                "Rejected reading from sensor node with id:{}: {}",
                conn.label(),
                e
            ));
            return;
        }

        if conn.identify(record.sensor_id) {
            self.events.info(format!(
                "A sensor node with id:{} has opened a new connection.",
                record.sensor_id
            ));
        } else if conn.sensor_id() != Some(record.sensor_id) {
            debug!(
                "Connection from {} bound to sensor {} sent a record for sensor {}",
                conn.peer(),
                conn.label(),
                record.sensor_id
            );
        }
        self.last_activity = Instant::now();

        match self.buffer.insert(record) {
            Ok(()) => {
                self.stats.records += 1;
                counter!("gateway_records_received_total").increment(1);
            }
            Err(e) => warn!("Could not queue record from sensor {}: {}", record.sensor_id, e),
        }
    }

    fn close(&mut self, index: usize, reason: CloseReason) {
        let conn = self.connections.remove(index);
        self.last_activity = Instant::now();
        gauge!("gateway_active_connections").set(self.connections.len() as f64);

        if conn.decoder.buffered() > 0 {
            debug!(
                "Discarding {} bytes of an unfinished record from {}",
                conn.decoder.buffered(),
                conn.peer()
            );
        }

        match reason {
            CloseReason::PeerClosed => {
                self.stats.peer_closes += 1;
                self.events.info(format!(
                    "A sensor node with id:{} has closed the connection.",
                    conn.label()
                ));
            }
            CloseReason::IdleTimeout => {
                self.stats.idle_evictions += 1;
                self.events.info(format!(
                    "A sensor node with id:{} timed out after {} seconds of inactivity.",
                    conn.label(),
                    self.config.timeout.as_secs_f64()
                ));
            }
            CloseReason::Io(e) => {
                self.stats.io_errors += 1;
                self.events.warn(format!(
                    "Connection to sensor node with id:{} failed: {}",
                    conn.label(),
                    e
                ));
            }
            CloseReason::Shutdown => {
                debug!("Closing connection to sensor {} on shutdown", conn.label());
            }
        }
    }

    fn shutdown(mut self, termination: Termination) -> ListenSummary {
        while !self.connections.is_empty() {
            let last = self.connections.len() - 1;
            self.close(last, CloseReason::Shutdown);
        }

        match termination {
            Termination::IdleTimeout => self.events.info(format!(
                "Connection manager timed out: no sensor activity for {} seconds.",
                self.config.timeout.as_secs_f64()
            )),
            Termination::Stopped => self.events.info("Connection manager stopped."),
        }

        let ConnectionManager {
            listener,
            buffer,
            stats,
            ..
        } = self;
        drop(listener);
        buffer.begin_drain();

        info!(
            "Connection manager finished: {} connections, {} records",
            stats.accepted, stats.records
        );
        ListenSummary { stats, termination }
    }
}

/// Wait until the listener or any connection is ready
async fn wait_ready(listener: &TcpListener, connections: &[Connection]) -> Readiness {
    poll_fn(|cx| {
        let accepted = match listener.poll_accept(cx) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        };

        // Errors are surfaced by the following read.
        let readable: Vec<usize> = connections
            .iter()
            .enumerate()
            .filter(|(_, conn)| conn.stream.poll_read_ready(cx).is_ready())
            .map(|(index, _)| index)
            .collect();

        if accepted.is_none() && readable.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(Readiness { accepted, readable })
        }
    })
    .await
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
