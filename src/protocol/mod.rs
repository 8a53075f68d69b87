//! Wire protocol definitions
//!
//! Every inbound frame carries one JSON envelope:
//!
//! ```json
//! {"subscribe": false, "role": "producer", "message": "hi",
//!  "topic": "news", "transmission_mode": "broadcast"}
//! ```
//!
//! `role` and `transmission_mode` decode into closed enums. Anything that is
//! not a recognized value lands in an `Invalid` variant that keeps the raw
//! text for logging, so the dispatcher can treat all unknown input uniformly.

mod error;

pub use error::DecodeError;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of the client sending an envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Pulls from queues or subscribes to broadcasts
    Consumer,
    /// Pushes to queues or broadcasts to subscribers
    Producer,
    /// Unrecognized role, raw value retained
    Invalid(String),
}

impl Default for Role {
    fn default() -> Self {
        Role::Invalid(String::new())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "consumer" => Role::Consumer,
            "producer" => Role::Producer,
            _ => Role::Invalid(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Consumer => "consumer".to_string(),
            Role::Producer => "producer".to_string(),
            Role::Invalid(s) => s,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Consumer => write!(f, "consumer"),
            Role::Producer => write!(f, "producer"),
            Role::Invalid(s) => write!(f, "{:?}", s),
        }
    }
}

/// Transmission mode of a producer envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    /// Point-to-point through the per-topic FIFO queue
    Buffered,
    /// Fan-out to every current subscriber of the topic
    Broadcast,
    /// Unrecognized mode, raw value retained
    Invalid(String),
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Invalid(String::new())
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "buffered" => Mode::Buffered,
            "broadcast" => Mode::Broadcast,
            _ => Mode::Invalid(s),
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Buffered => "buffered".to_string(),
            Mode::Broadcast => "broadcast".to_string(),
            Mode::Invalid(s) => s,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Buffered => write!(f, "buffered"),
            Mode::Broadcast => write!(f, "broadcast"),
            Mode::Invalid(s) => write!(f, "{:?}", s),
        }
    }
}

/// A decoded inbound envelope.
///
/// Missing fields take their zero value (`false` / empty string), so a
/// frame like `{"role": "consumer", "topic": "t1"}` is a valid queue pull.
/// `subscribe` only matters for consumers and `transmission_mode` only for
/// producers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub transmission_mode: Mode,
}

impl Envelope {
    /// Consumer subscribing to broadcasts on `topic`
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            subscribe: true,
            role: Role::Consumer,
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Consumer pulling the oldest queued payload on `topic`
    pub fn pull(topic: impl Into<String>) -> Self {
        Self {
            role: Role::Consumer,
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Producer sending `message` to `topic` with the given mode
    pub fn produce(topic: impl Into<String>, message: impl Into<String>, mode: Mode) -> Self {
        Self {
            role: Role::Producer,
            topic: topic.into(),
            message: message.into(),
            transmission_mode: mode,
            ..Self::default()
        }
    }

    /// Decode one frame
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.is_empty() {
            return Err(DecodeError::EmptyFrame);
        }
        Ok(serde_json::from_slice(frame)?)
    }

    /// Encode to the JSON text sent over the wire
    pub fn encode(&self) -> String {
        // Plain strings and bools only; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
