//! Wire frames.
//!
//! Outbound frames are produced by the device; inbound frames are tokenized
//! strictly so that malformed input surfaces as a [`ProtoError`] instead of
//! being silently half-parsed.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtoError;

/// Line terminator used by every frame on the wire.
pub const LINE_TERMINATOR: &str = "\r\n";

/// `cmd` value of heartbeat acknowledgements sent by the broker.
pub const CMD_HEARTBEAT: u32 = 0;

/// `cmd` value of subscribe requests and their acknowledgements.
pub const CMD_SUBSCRIBE: u32 = 1;

/// `cmd` value of messages published to a topic.
pub const CMD_PUBLISH: u32 = 2;

/// A frame sent from the device to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Subscribe the device UID to a topic.
    Subscribe {
        /// Device UID issued by the broker.
        uid: String,
        /// Topic to receive commands on.
        topic: String,
    },
    /// Keep-alive ping.
    Heartbeat,
}

impl OutboundFrame {
    /// Create a subscribe frame.
    #[must_use]
    pub fn subscribe(uid: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::Subscribe {
            uid: uid.into(),
            topic: topic.into(),
        }
    }

    /// Encode the frame as a terminated wire line.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Encode the frame as bytes ready to be written to the socket.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe { uid, topic } => {
                write!(f, "cmd={CMD_SUBSCRIBE}&uid={uid}&topic={topic}{LINE_TERMINATOR}")
            }
            Self::Heartbeat => write!(f, "ping{LINE_TERMINATOR}"),
        }
    }
}

/// A tokenized inbound line: ordered `key=value` pairs separated by `&`.
///
/// Values may contain `=` (only the first one separates key from value).
/// Empty segments, segments without `=`, empty keys and duplicate keys are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    fields: Vec<(String, String)>,
}

impl InboundFrame {
    /// Tokenize a single line. Trailing `\r`/`\n` are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is empty or any segment is malformed.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtoError::EmptyFrame);
        }

        let mut fields: Vec<(String, String)> = Vec::new();
        for (position, segment) in line.split('&').enumerate() {
            if segment.is_empty() {
                return Err(ProtoError::EmptySegment(position));
            }
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ProtoError::MissingSeparator(segment.to_string()))?;
            if key.is_empty() {
                return Err(ProtoError::EmptyKey(segment.to_string()));
            }
            if fields.iter().any(|(existing, _)| existing == key) {
                return Err(ProtoError::DuplicateKey(key.to_string()));
            }
            fields.push((key.to_string(), value.to_string()));
        }

        Ok(Self { fields })
    }

    /// Look up a field value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The numeric `cmd` field.
    ///
    /// # Errors
    ///
    /// Returns an error if `cmd` is absent or not a number.
    pub fn cmd(&self) -> Result<u32, ProtoError> {
        let raw = self.get("cmd").ok_or(ProtoError::MissingField("cmd"))?;
        raw.parse()
            .map_err(|_| ProtoError::InvalidCmd(raw.to_string()))
    }

    /// Iterate over the fields in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields in the frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the frame has no fields. Never true for a parsed frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromStr for InboundFrame {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
