//! # qiko-proto
//!
//! Protocol definitions for device-broker communication over the Bemfa TCP
//! line protocol.
//!
//! Every frame is a single UTF-8 line terminated by `\r\n`. Outbound frames
//! subscribe the device to its topic and keep the connection alive; inbound
//! frames are `&`-separated `key=value` pairs carrying control commands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod frame;

pub use command::{Command, ControlMessage};
pub use error::ProtoError;
pub use frame::{CMD_HEARTBEAT, CMD_PUBLISH, CMD_SUBSCRIBE, InboundFrame, OutboundFrame};
