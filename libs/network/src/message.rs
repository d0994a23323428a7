//! Grid Envelope Model
//!
//! One [`Envelope`] carries one message between nodes. The envelope only
//! knows about addressing and correlation:
//! - which conversation it belongs to and who sent it to whom
//! - the request id it was stamped with when sent
//! - the request id it answers, when it is a reply
//!
//! The body is opaque to the transport. It is either a normal payload or a
//! wrapped failure raised while serving the request.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request ids start at 1; a `response_id` of 0 means "not a reply"
pub const NO_RESPONSE: u64 = 0;

/// Envelope for a single grid message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    /// Stamped by the conversation at send time
    pub request_id: u64,
    /// Request id of the envelope this one answers
    pub response_id: u64,
    pub body: Body,
}

impl Envelope {
    /// Create an unaddressed envelope; the conversation stamps ids on send
    pub fn new(body: Body) -> Self {
        Self {
            conversation_id: String::new(),
            sender_id: String::new(),
            recipient_id: String::new(),
            request_id: 0,
            response_id: NO_RESPONSE,
            body,
        }
    }

    /// Create an envelope carrying a command
    pub fn command(command: Command) -> Self {
        Self::new(Body::Command(command))
    }

    /// Build the reply to this envelope
    pub fn reply(&self, body: Body) -> Self {
        Self {
            conversation_id: self.conversation_id.clone(),
            sender_id: self.recipient_id.clone(),
            recipient_id: self.sender_id.clone(),
            request_id: 0,
            response_id: self.request_id,
            body,
        }
    }

    /// Build a failure reply to this envelope
    pub fn failure_reply(&self, failure: RemoteFailure) -> Self {
        self.reply(Body::Failure(failure))
    }

    /// Whether this envelope answers an earlier request
    pub fn is_reply(&self) -> bool {
        self.response_id != NO_RESPONSE
    }

    /// Whether the body is a wrapped failure
    pub fn is_failure(&self) -> bool {
        matches!(self.body, Body::Failure(_))
    }

    /// Serialize envelope for transport
    pub fn to_wire_format(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse envelope from wire format
    pub fn from_wire_format(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Envelope payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Opaque serialized payload
    Bytes(Vec<u8>),
    /// Named command for a remote executor
    Command(Command),
    /// Failure raised while serving a request
    Failure(RemoteFailure),
}

impl Body {
    /// Serialize any value into an opaque payload
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Body::Bytes(bincode::serialize(value)?))
    }

    /// Deserialize an opaque payload produced by [`Body::encode`]
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Body::Bytes(bytes) => Ok(bincode::deserialize(bytes)?),
            other => Err(crate::GridError::protocol(format!(
                "Expected a byte payload, found {}",
                other.kind()
            ))),
        }
    }

    /// Short name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Empty => "empty",
            Body::Bytes(_) => "bytes",
            Body::Command(_) => "command",
            Body::Failure(_) => "failure",
        }
    }

    /// Split a reply body into its payload or the failure it carries
    pub fn into_result(self) -> std::result::Result<Body, RemoteFailure> {
        match self {
            Body::Failure(failure) => Err(failure),
            body => Ok(body),
        }
    }
}

/// A named command with positional arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub arguments: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Append a serialized argument
    pub fn with_arg<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.arguments.push(bincode::serialize(value)?);
        Ok(self)
    }

    /// Deserialize the argument at `index`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let raw = self.arguments.get(index).ok_or_else(|| {
            crate::GridError::protocol(format!(
                "Command {} has no argument at index {}",
                self.name, index
            ))
        })?;
        Ok(bincode::deserialize(raw)?)
    }
}

/// Failure carried in a reply body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// Machine-readable failure kind
    pub kind: String,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error, keeping its full cause chain in the message
    pub fn from_error(kind: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::new(kind, format!("{:#}", error))
    }

    /// Failure delivered to waiters whose session went away
    pub fn connection_closed() -> Self {
        Self::new("connection_closed", "Session closed before a reply arrived")
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteFailure {}
