//! Error types for the qiko-proto crate.

use thiserror::Error;

/// Errors that can occur while tokenizing or interpreting a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// The line was empty after stripping terminators.
    #[error("empty frame")]
    EmptyFrame,

    /// Two separators with nothing between them (`a=1&&b=2`).
    #[error("empty segment at position {0}")]
    EmptySegment(usize),

    /// A segment without a `=` separator.
    #[error("segment {0:?} has no '=' separator")]
    MissingSeparator(String),

    /// A segment whose key is empty (`=value`).
    #[error("segment {0:?} has an empty key")]
    EmptyKey(String),

    /// The same key appeared more than once.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The `cmd` field is not a number.
    #[error("invalid cmd value: {0:?}")]
    InvalidCmd(String),

    /// The frame carries a `cmd` this agent does not act on.
    #[error("unsupported cmd: {0}")]
    UnsupportedCmd(u32),

    /// The `msg` field is not a known command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
}
