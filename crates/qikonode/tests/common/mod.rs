//! Test helpers: a scripted Bemfa broker on a local port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use qikonode::{ConnectionManager, Endpoint, RetryPolicy};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// Default wait for anything the broker expects to see.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const UID: &str = "U1";
pub const TOPIC: &str = "T1";
pub const SUBSCRIBE_LINE: &str = "cmd=1&uid=U1&topic=T1";

/// A broker that accepts device connections on `127.0.0.1`.
pub struct MockBroker {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockBroker {
    pub async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock broker");
        let addr = listener.local_addr().expect("mock broker address");
        Self { listener, addr }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port(), UID, TOPIC)
    }

    /// Accept the next device connection.
    pub async fn accept(&self) -> BrokerConn {
        let (stream, _) = timeout(TEST_TIMEOUT, self.listener.accept())
            .await
            .expect("no device connection")
            .expect("accept failed");
        let (reader, writer) = stream.into_split();
        BrokerConn {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Accept a connection if one arrives within `wait`.
    pub async fn try_accept(&self, wait: Duration) -> Option<BrokerConn> {
        let (stream, _) = timeout(wait, self.listener.accept()).await.ok()?.ok()?;
        let (reader, writer) = stream.into_split();
        Some(BrokerConn {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }
}

/// A broker whose accept queue is full, so new connects hang until they
/// time out.
pub struct StalledBroker {
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
    addr: SocketAddr,
}

impl StalledBroker {
    pub async fn new() -> Self {
        let socket = TcpSocket::new_v4().expect("socket");
        socket
            .bind("127.0.0.1:0".parse().expect("addr"))
            .expect("bind");
        let listener = socket.listen(0).expect("listen");
        let addr = listener.local_addr().expect("mock broker address");

        let mut queued = Vec::new();
        for _ in 0..8 {
            match timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => queued.push(stream),
                _ => break,
            }
        }

        Self {
            _listener: listener,
            _queued: queued,
            addr,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port(), UID, TOPIC)
    }
}

/// Broker side of one device connection.
pub struct BrokerConn {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl BrokerConn {
    /// Next line from the device without its terminator, `None` on EOF.
    pub async fn next_line(&mut self) -> Option<String> {
        timeout(TEST_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line from the device")
            .ok()
            .flatten()
    }

    /// Read until the device closes the connection.
    pub async fn wait_for_eof(&mut self) {
        while self.next_line().await.is_some() {}
    }

    /// Publish a raw line to the device.
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write to device failed");
    }
}

/// Retry policy with millisecond delays.
pub fn fast(policy: RetryPolicy, max_attempts: u32) -> RetryPolicy {
    policy
        .with_delays(Duration::from_millis(1), Duration::from_millis(10))
        .with_max_attempts(max_attempts)
}

/// Connection manager with fast retries.
pub fn manager(
    endpoint: Endpoint,
    connect_attempts: u32,
    io_attempts: u32,
) -> Arc<ConnectionManager> {
    Arc::new(
        ConnectionManager::new(endpoint)
            .expect("valid endpoint")
            .with_connect_policy(fast(RetryPolicy::connect(), connect_attempts))
            .with_io_policy(fast(RetryPolicy::io(), io_attempts)),
    )
}

/// An endpoint on a port nothing listens on.
pub async fn unreachable_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    Endpoint::new("127.0.0.1", port, UID, TOPIC)
}
