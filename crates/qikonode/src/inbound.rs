//! Inbound message loop.
//!
//! Reads from the broker, assembles complete lines and hands recognized
//! commands to a [`CommandHandler`].

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use qiko_proto::{Command, ControlMessage};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::{Decoder, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::CommandHandler;
use crate::connection::ConnectionManager;

/// Prefix of frames that may carry a command.
const PUBLISH_PREFIX: &str = "cmd=2";

/// Configuration for the inbound loop.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    /// Maximum bytes requested per receive.
    pub read_size: usize,
    /// Pause after a failed receive before trying again.
    pub error_backoff: Duration,
    /// Longest accepted line; longer lines are discarded.
    pub max_line_length: usize,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            read_size: 1024,
            error_backoff: Duration::from_secs(2),
            max_line_length: 4096,
        }
    }
}

/// Assembles received bytes into lines.
///
/// A chunk may hold several lines or end mid-line. The tail is kept until the
/// rest arrives or the caller flushes it.
#[derive(Debug)]
pub struct LineDecoder {
    codec: LinesCodec,
    buf: BytesMut,
}

impl LineDecoder {
    /// Create a decoder that discards lines longer than `max_line_length`.
    #[must_use]
    pub fn new(max_line_length: usize) -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(max_line_length),
            buf: BytesMut::new(),
        }
    }

    /// Feed a chunk and return every line it completes, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => break,
                Err(e) => warn!(error = %e, "dropping undecodable inbound line"),
            }
        }
        lines
    }

    /// Take whatever is buffered as a final line, terminated or not.
    pub fn flush(&mut self) -> Option<String> {
        match self.codec.decode_eof(&mut self.buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "dropping undecodable inbound line");
                self.reset();
                None
            }
        }
    }

    /// Drop any partial line.
    pub fn reset(&mut self) {
        if !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "discarding partial line");
        }
        self.buf.clear();
        self.codec = LinesCodec::new_with_max_length(self.codec.max_length());
    }

    /// Bytes buffered for an incomplete line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// What happened to one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line.
    Empty,
    /// Not a publish frame (e.g. a broker acknowledgement).
    Ignored,
    /// Publish frame that could not be turned into a command.
    Malformed,
    /// Command handed to the handler, which accepted it.
    Applied(Command),
    /// Command handed to the handler, which failed.
    Failed(Command),
}

/// Parse one line and dispatch it. Never fails; problems are logged.
pub fn handle_line(line: &str, handler: &dyn CommandHandler) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Empty;
    }

    if !line.starts_with(PUBLISH_PREFIX) {
        debug!(line, "ignoring non-command frame");
        return LineOutcome::Ignored;
    }

    let message = match ControlMessage::parse(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(line, error = %e, "dropping malformed command frame");
            return LineOutcome::Malformed;
        }
    };

    let command = message.command;
    info!(
        %command,
        uid = message.uid.as_deref().unwrap_or(""),
        topic = message.topic.as_deref().unwrap_or(""),
        "received command"
    );

    match handler.apply(command) {
        Ok(()) => LineOutcome::Applied(command),
        Err(e) => {
            error!(%command, error = %e, "command action failed");
            LineOutcome::Failed(command)
        }
    }
}

/// Receive and dispatch lines until `cancel` fires.
///
/// Receive failures (after the connection manager's own retries) are logged,
/// any partial line is dropped, and the loop carries on after
/// `error_backoff`.
pub async fn run_inbound(
    connection: Arc<ConnectionManager>,
    handler: Arc<dyn CommandHandler>,
    config: InboundConfig,
    cancel: CancellationToken,
) {
    let mut decoder = LineDecoder::new(config.max_line_length);
    info!("inbound loop started");

    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = connection.receive(config.read_size) => received,
        };

        match received {
            Ok(chunk) => {
                let mut lines = decoder.push(&chunk);
                // A short read ends a frame even without a terminator; only a
                // full buffer may be followed by the rest of its last line.
                if chunk.len() < config.read_size {
                    lines.extend(decoder.flush());
                }
                for line in lines {
                    handle_line(&line, handler.as_ref());
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    retry_in_ms = config.error_backoff.as_millis() as u64,
                    "receive failed"
                );
                decoder.reset();

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep(config.error_backoff) => {}
                }
            }
        }
    }

    info!("inbound loop stopped");
}

/// Spawn [`run_inbound`] as a task.
pub fn spawn_inbound(
    connection: Arc<ConnectionManager>,
    handler: Arc<dyn CommandHandler>,
    config: InboundConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_inbound(connection, handler, config, cancel))
}
