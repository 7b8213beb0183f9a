//! qikonode - Qiko smart device agent
//!
//! Keeps one subscribed TCP connection to the Bemfa cloud broker, sends
//! periodic heartbeats on it, and turns `on`/`off` commands published to the
//! device topic into local actions.
//!
//! The [`ConnectionManager`] owns the socket. The heartbeat and inbound loops
//! share it and recover from failures on their own; [`Agent`] starts and
//! stops them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actions;
pub mod agent;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod inbound;

pub use actions::{CommandHandler, ShellActions};
pub use agent::{Agent, AgentHandle};
pub use config::{AgentConfig, Endpoint, LogFormat};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, RetryPolicy};
pub use error::NodeError;
pub use heartbeat::HeartbeatConfig;
pub use inbound::InboundConfig;
