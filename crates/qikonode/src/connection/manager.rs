//! Broker connection manager.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use qiko_proto::OutboundFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Endpoint;
use crate::error::NodeError;

use super::retry::RetryPolicy;
use super::state::ConnectionState;

/// Default bound on a single TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One established, subscribed socket.
///
/// Read and write halves are locked independently so a pending read never
/// blocks a heartbeat write. `closed` is cancelled when the link is retired;
/// in-flight I/O observes it and bails out before the socket is dropped.
#[derive(Debug)]
struct Link {
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
}

impl Link {
    fn new(reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Self {
        Self {
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    link: Option<Arc<Link>>,
    connected_at: Option<DateTime<Utc>>,
    connects: u64,
}

/// Puts `Connecting` back to `Disconnected` when a connect attempt is
/// dropped before it finishes.
struct ConnectingGuard<'a> {
    inner: &'a Mutex<Inner>,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Disconnected;
            debug!("connect attempt abandoned");
        }
    }
}

/// Snapshot of the connection for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// When the current connection was established.
    pub connected_since: Option<DateTime<Utc>>,
    /// Number of successful connects since construction.
    pub connects: u64,
}

/// Owns the broker socket and serializes every state transition.
///
/// `connect()` and `disconnect()` run one at a time under the transition
/// lock, so a `disconnect()` from shutdown cannot interleave with a
/// `connect()` started by one of the loops. The published state sits behind
/// a separate lock that is never held across I/O, so status reads do not wait
/// on a slow connect. A freshly opened socket is only published after the
/// subscribe frame has been written, which makes the subscribe frame the
/// first bytes on every connection.
#[derive(Debug)]
pub struct ConnectionManager {
    endpoint: Endpoint,
    connect_policy: RetryPolicy,
    io_policy: RetryPolicy,
    connect_timeout: Duration,
    transition: tokio::sync::Mutex<()>,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    /// Create a manager for the given endpoint. No connection is opened.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] if the endpoint is unusable.
    pub fn new(endpoint: Endpoint) -> Result<Self, NodeError> {
        endpoint.validate()?;

        Ok(Self {
            endpoint,
            connect_policy: RetryPolicy::connect(),
            io_policy: RetryPolicy::io(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transition: tokio::sync::Mutex::new(()),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                link: None,
                connected_at: None,
                connects: 0,
            }),
        })
    }

    /// Set the retry policy used by `connect()`.
    #[must_use]
    pub fn with_connect_policy(mut self, policy: RetryPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    /// Set the retry policy used by `send()` and `receive()`.
    #[must_use]
    pub fn with_io_policy(mut self, policy: RetryPolicy) -> Self {
        self.io_policy = policy;
        self
    }

    /// Set the bound on a single TCP connect.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// The endpoint this manager connects to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Get the current connection state. Never waits on socket I/O.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Get a status snapshot. Never waits on socket I/O.
    pub async fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock();
        ConnectionStatus {
            state: inner.state,
            connected_since: inner.connected_at,
            connects: inner.connects,
        }
    }

    /// Connect and subscribe. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns the last transient error once the connect policy is exhausted.
    pub async fn connect(&self) -> Result<(), NodeError> {
        self.connect_policy
            .run("connect", || self.connect_once())
            .await
    }

    /// Close the socket if one is open. Idempotent.
    pub async fn disconnect(&self) {
        let _transition = self.transition.lock().await;

        let link = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Disconnected;
            inner.connected_at = None;
            inner.link.take()
        };

        if let Some(link) = link {
            link.close();
            let mut writer = link.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "socket shutdown failed");
            }
            info!(host = %self.endpoint.host, port = self.endpoint.port, "disconnected from broker");
        }
    }

    /// Write the whole payload, reconnecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns the last error once the I/O policy is exhausted.
    pub async fn send(&self, data: &[u8]) -> Result<(), NodeError> {
        self.io_policy.run("send", || self.send_once(data)).await
    }

    /// Read up to `max_bytes`, reconnecting first if needed.
    ///
    /// A zero-length read means the peer closed the connection: the manager
    /// moves to `Disconnected` and the attempt fails. `max_bytes` of zero is
    /// treated as one.
    ///
    /// # Errors
    ///
    /// Returns the last error once the I/O policy is exhausted.
    pub async fn receive(&self, max_bytes: usize) -> Result<Vec<u8>, NodeError> {
        self.io_policy
            .run("receive", || self.receive_once(max_bytes))
            .await
    }

    async fn connect_once(&self) -> Result<(), NodeError> {
        let _transition = self.transition.lock().await;

        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connected {
                return Ok(());
            }

            if let Some(stale) = inner.link.take() {
                stale.close();
                debug!("discarded stale socket");
            }

            inner.state = ConnectionState::Connecting;
        }

        let attempt = ConnectingGuard {
            inner: &self.inner,
            armed: true,
        };
        debug!(host = %self.endpoint.host, port = self.endpoint.port, "connecting to broker");
        let opened = self.open_link().await;
        attempt.disarm();

        match opened {
            Ok(link) => {
                {
                    let mut inner = self.inner.lock();
                    inner.link = Some(Arc::new(link));
                    inner.state = ConnectionState::Connected;
                    inner.connected_at = Some(Utc::now());
                    inner.connects += 1;
                }
                info!(
                    host = %self.endpoint.host,
                    port = self.endpoint.port,
                    topic = %self.endpoint.topic,
                    "connected to broker and subscribed"
                );
                Ok(())
            }
            Err(e) => {
                {
                    let mut inner = self.inner.lock();
                    inner.state = ConnectionState::Disconnected;
                    inner.connected_at = None;
                }
                error!(
                    host = %self.endpoint.host,
                    port = self.endpoint.port,
                    error = %e,
                    "broker connection failed"
                );
                Err(e)
            }
        }
    }

    async fn open_link(&self) -> Result<Link, NodeError> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                NodeError::transport("connect")(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection within {:?}", self.connect_timeout),
                ))
            })?
            .map_err(NodeError::transport("connect"))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let (reader, mut writer) = stream.into_split();
        let subscribe = OutboundFrame::subscribe(&self.endpoint.uid, &self.endpoint.topic);
        writer
            .write_all(subscribe.encode().as_bytes())
            .await
            .map_err(NodeError::transport("subscribe"))?;

        Ok(Link::new(reader, writer))
    }

    async fn send_once(&self, data: &[u8]) -> Result<(), NodeError> {
        let link = self.ensure_link().await?;

        let result = {
            let mut writer = link.writer.lock().await;
            tokio::select! {
                biased;
                () = link.closed.cancelled() => Err(NodeError::ConnectionClosed { operation: "send" }),
                written = writer.write_all(data) => written.map_err(NodeError::transport("send")),
            }
        };

        if let Err(e) = &result {
            error!(bytes = data.len(), error = %e, "send failed");
            self.mark_failed(&link);
        }
        result
    }

    async fn receive_once(&self, max_bytes: usize) -> Result<Vec<u8>, NodeError> {
        let link = self.ensure_link().await?;
        let mut buf = vec![0u8; max_bytes.max(1)];

        let result = {
            let mut reader = link.reader.lock().await;
            tokio::select! {
                biased;
                () = link.closed.cancelled() => Err(NodeError::ConnectionClosed { operation: "receive" }),
                read = reader.read(&mut buf) => match read {
                    Ok(0) => Err(NodeError::ConnectionClosed { operation: "receive" }),
                    Ok(n) => Ok(n),
                    Err(e) => Err(NodeError::transport("receive")(e)),
                },
            }
        };

        match result {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => {
                error!(error = %e, "receive failed");
                self.mark_failed(&link);
                Err(e)
            }
        }
    }

    /// Current link, connecting first when there is none.
    async fn ensure_link(&self) -> Result<Arc<Link>, NodeError> {
        if let Some(link) = self.current_link() {
            return Ok(link);
        }

        debug!("not connected, connecting before I/O");
        self.connect().await?;
        self.current_link()
            .ok_or(NodeError::ConnectionClosed { operation: "connect" })
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        let inner = self.inner.lock();
        if inner.state == ConnectionState::Connected {
            inner.link.clone()
        } else {
            None
        }
    }

    /// Retire `link` after an I/O failure. A newer link is left untouched.
    fn mark_failed(&self, link: &Arc<Link>) {
        {
            let mut inner = self.inner.lock();
            let is_current = inner
                .link
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, link));

            if is_current {
                inner.link = None;
                inner.state = ConnectionState::Disconnected;
                inner.connected_at = None;
            }
        }
        link.close();
    }
}
