//! Core message types for the a3s-feed client
//!
//! Messages arrive as JSON objects carrying a `type` field of the form
//! `<category>:<command>`. Classification strips that field so handlers
//! only ever see the payload.

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved `type` value for keep-alive messages
pub const HEARTBEAT: &str = "heartbeat";

/// Separator between category and command in a message `type`
pub const TYPE_SEPARATOR: char = ':';

/// Top-level event channel a subscription attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Group,
    Party,
    Server,
}

impl Scope {
    /// All scopes, in routing-table order
    pub const ALL: [Scope; 4] = [Scope::User, Scope::Group, Scope::Party, Scope::Server];

    /// Wire name used in stream URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Group => "group",
            Scope::Party => "party",
            Scope::Server => "server",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Scope::User),
            "group" => Ok(Scope::Group),
            "party" => Ok(Scope::Party),
            "server" => Ok(Scope::Server),
            other => Err(FeedError::Config(format!("Unknown scope '{}'", other))),
        }
    }
}

/// Payload handed to handlers: the message object without its `type`
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A classified message read from a scope's stream
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Keep-alive; never dispatched
    Heartbeat,
    /// A routable event
    Event(EventMessage),
}

impl Inbound {
    /// Classify a decoded JSON document
    ///
    /// The document must be an object with a string `type` field.
    pub fn classify(value: serde_json::Value) -> Result<Self> {
        let mut object = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(FeedError::Malformed(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let event_type = match object.remove("type") {
            Some(serde_json::Value::String(t)) => t,
            Some(other) => {
                return Err(FeedError::Malformed(format!(
                    "'type' must be a string, got {}",
                    json_kind(&other)
                )))
            }
            None => return Err(FeedError::Malformed("missing 'type' field".to_string())),
        };

        if event_type == HEARTBEAT {
            return Ok(Inbound::Heartbeat);
        }

        Ok(Inbound::Event(EventMessage {
            event_type,
            payload: object,
        }))
    }
}

/// A routable event with its `type` already removed from the payload
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    /// Original `type` value (`<category>:<command>`)
    pub event_type: String,

    /// Remaining fields
    pub payload: Payload,
}

impl EventMessage {
    /// Build an event from a type and payload
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Split the type into (category, command)
    ///
    /// Returns `None` when the type has no separator.
    pub fn route(&self) -> Option<(&str, &str)> {
        self.event_type.split_once(TYPE_SEPARATOR)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
