//! Protocol error types

use std::fmt;

/// Errors that can occur while decoding an inbound frame into an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame carried no bytes at all
    EmptyFrame,
    /// Frame is not a JSON object matching the envelope shape
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::Malformed(msg) => write!(f, "malformed envelope: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}
