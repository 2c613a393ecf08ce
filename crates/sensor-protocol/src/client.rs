//! Sensor Node Client
//!
//! Async TCP client that speaks the gateway wire format. Used by the
//! simulator binary and by integration tests.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::ProtocolError;
use crate::record::{SensorId, SensorRecord, Timestamp};

/// A connected sensor node
pub struct SensorNode {
    /// Identifier stamped on every reading
    sensor_id: SensorId,
    /// Connection to the gateway
    stream: TcpStream,
    /// Readings sent so far
    sent: u64,
}

impl SensorNode {
    /// Connect a sensor node to the gateway
    pub async fn connect(addr: SocketAddr, sensor_id: SensorId) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Sensor node {} connected to {}", sensor_id, addr);

        Ok(Self {
            sensor_id,
            stream,
            sent: 0,
        })
    }

    /// Send one reading
    pub async fn send(&mut self, value: f64, timestamp: Timestamp) -> Result<(), ProtocolError> {
        let record = SensorRecord::new(self.sensor_id, value, timestamp);
        self.send_record(&record).await
    }

    /// Send a pre-built record (the id is not rewritten)
    pub async fn send_record(&mut self, record: &SensorRecord) -> Result<(), ProtocolError> {
        self.stream.write_all(&record.to_bytes()).await?;
        self.sent += 1;
        debug!(
            "Sensor node {} sent value {} at {}",
            record.sensor_id, record.value, record.timestamp
        );
        Ok(())
    }

    /// Write raw bytes, for exercising partial records
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Identifier of this node
    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    /// Number of readings sent
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Close the write side and drop the connection
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await?;
        info!("Sensor node {} closed after {} readings", self.sensor_id, self.sent);
        Ok(())
    }

    /// Borrow the underlying stream (tests observe server-side closes)
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RECORD_LEN;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_writes_wire_record() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; RECORD_LEN];
            socket.read_exact(&mut buf).await.unwrap();
            SensorRecord::from_bytes(&buf).unwrap()
        });

        let mut node = SensorNode::connect(addr, 42).await.unwrap();
        node.send(19.75, 1_700_000_123).await.unwrap();
        assert_eq!(node.sent(), 1);

        let received = server.await.unwrap();
        assert_eq!(received, SensorRecord::new(42, 19.75, 1_700_000_123));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = SensorNode::connect(addr, 1).await;
        assert!(matches!(result, Err(ProtocolError::Io(_))));
    }
}
