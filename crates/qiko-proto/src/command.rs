//! Control commands carried in published frames.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtoError;
use crate::frame::{CMD_PUBLISH, InboundFrame};

/// A command the device knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Switch the controlled application on.
    On,
    /// Switch the controlled application off.
    Off,
}

impl Command {
    /// The `msg` value that carries this command.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            other => Err(ProtoError::UnknownCommand(other.to_string())),
        }
    }
}

/// A `cmd=2` frame carrying a recognized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Sender UID, if present.
    pub uid: Option<String>,
    /// Topic the message was published on, if present.
    pub topic: Option<String>,
    /// The command to apply.
    pub command: Command,
}

impl ControlMessage {
    /// Extract a control message from a tokenized frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a publish frame, has no `msg`
    /// field, or `msg` is not a known command.
    pub fn from_frame(frame: &InboundFrame) -> Result<Self, ProtoError> {
        let cmd = frame.cmd()?;
        if cmd != CMD_PUBLISH {
            return Err(ProtoError::UnsupportedCmd(cmd));
        }

        let command = frame
            .get("msg")
            .ok_or(ProtoError::MissingField("msg"))?
            .parse()?;

        Ok(Self {
            uid: frame.get("uid").map(str::to_string),
            topic: frame.get("topic").map(str::to_string),
            command,
        })
    }

    /// Tokenize a line and extract a control message from it.
    ///
    /// # Errors
    ///
    /// Returns the tokenizer or extraction error.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        Self::from_frame(&InboundFrame::parse(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_command_round_trip_through_msg_value() {
        for command in [Command::On, Command::Off] {
            assert_eq!(command.as_str().parse::<Command>(), Ok(command));
        }
    }

    #[test]
    fn test_command_is_case_sensitive() {
        assert_eq!(
            "ON".parse::<Command>(),
            Err(ProtoError::UnknownCommand("ON".to_string()))
        );
    }

    #[test]
    fn test_parse_on_message() {
        let msg = ControlMessage::parse("cmd=2&uid=U1&topic=T1&msg=on").expect("valid message");
        assert_eq!(msg.command, Command::On);
        assert_eq!(msg.uid.as_deref(), Some("U1"));
        assert_eq!(msg.topic.as_deref(), Some("T1"));
    }

    #[test]
    fn test_parse_off_message_without_identity() {
        let msg = ControlMessage::parse("cmd=2&msg=off").expect("valid message");
        assert_eq!(msg.command, Command::Off);
        assert!(msg.uid.is_none());
        assert!(msg.topic.is_none());
    }

    #[test_case("cmd=2&uid=U1&topic=T1", ProtoError::MissingField("msg") ; "missing msg")]
    #[test_case("cmd=2&uid=U1&topic=T1&msg=toggle", ProtoError::UnknownCommand("toggle".into()) ; "unknown msg")]
    #[test_case("cmd=1&res=1", ProtoError::UnsupportedCmd(1) ; "subscribe ack")]
    #[test_case("cmd=0&res=1", ProtoError::UnsupportedCmd(0) ; "heartbeat ack")]
    #[test_case("cmd=2&garbage", ProtoError::MissingSeparator("garbage".into()) ; "malformed")]
    fn test_parse_rejects(line: &str, expected: ProtoError) {
        assert_eq!(ControlMessage::parse(line), Err(expected));
    }
}
