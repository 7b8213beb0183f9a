//! Broker connection.
//!
//! Manages the single TCP connection between the device and the Bemfa
//! broker, including subscribe-on-connect and bounded retries with
//! exponential backoff.

mod manager;
mod retry;
mod state;

pub use manager::{ConnectionManager, ConnectionStatus, DEFAULT_CONNECT_TIMEOUT};
pub use retry::RetryPolicy;
pub use state::ConnectionState;
