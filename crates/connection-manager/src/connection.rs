//! Per-connection state

use std::net::SocketAddr;
use std::time::Duration;

use sensor_protocol::{RecordDecoder, SensorId};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Stand-in for deadlines that do not fit in an `Instant` (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating at a far-future deadline
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Lifecycle of a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no complete record yet
    Connecting,
    /// Bound to the sensor id of its first record
    Identified(SensorId),
}

/// An accepted sensor connection
#[derive(Debug)]
pub struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) decoder: RecordDecoder,
    peer: SocketAddr,
    sensor_id: Option<SensorId>,
    last_activity: Instant,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, now: Instant) -> Self {
        Self {
            stream,
            decoder: RecordDecoder::new(),
            peer,
            sensor_id: None,
            last_activity: now,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        match self.sensor_id {
            Some(id) => ConnectionState::Identified(id),
            None => ConnectionState::Connecting,
        }
    }

    /// Sensor id, once identified
    pub fn sensor_id(&self) -> Option<SensorId> {
        self.sensor_id
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bind the sensor id; returns true the first time
    pub(crate) fn identify(&mut self, id: SensorId) -> bool {
        if self.sensor_id.is_some() {
            return false;
        }
        self.sensor_id = Some(id);
        true
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time since the last successful read
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Instant at which this connection times out
    pub fn expires_at(&self, timeout: Duration) -> Instant {
        deadline_after(self.last_activity, timeout)
    }

    /// Id for log lines
    pub fn label(&self) -> String {
        match self.sensor_id {
            Some(id) => id.to_string(),
            None => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn accepted() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        Connection::new(stream, peer, Instant::now())
    }

    #[tokio::test]
    async fn test_identified_by_first_record() {
        let mut conn = accepted().await;
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.label(), "unknown");

        assert!(conn.identify(15));
        assert!(!conn.identify(21));
        assert_eq!(conn.state(), ConnectionState::Identified(15));
        assert_eq!(conn.sensor_id(), Some(15));
        assert_eq!(conn.label(), "15");
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_expiry() {
        let mut conn = accepted().await;
        let timeout = Duration::from_secs(5);
        let first = conn.expires_at(timeout);

        tokio::time::advance(Duration::from_secs(3)).await;
        let now = Instant::now();
        assert_eq!(conn.idle_for(now), Duration::from_secs(3));

        conn.touch(now);
        assert_eq!(conn.idle_for(now), Duration::ZERO);
        assert_eq!(conn.expires_at(timeout), first + Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_saturates() {
        let conn = accepted().await;
        let now = Instant::now();
        assert!(conn.expires_at(Duration::from_secs(u64::MAX)) >= now + FAR_FUTURE);
        assert_eq!(deadline_after(now, Duration::from_secs(2)), now + Duration::from_secs(2));
    }
}
