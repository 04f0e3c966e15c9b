//! Socket message types.
//!
//! Defines the frames exchanged with the local backend over the persistent
//! socket: the handshake, heartbeats, correlated requests/responses, and
//! uncorrelated push messages.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// ControlFrame
// ============================================================================

/// Frames that carry no request ID and expect no response.
///
/// # Format
///
/// ```json
/// { "type": "auth", "userId": "user1" }
/// { "type": "ping" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Handshake sent as soon as the socket opens.
    Auth {
        /// Identity the channel is opened for.
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Keep-alive.
    Ping,
}

impl ControlFrame {
    /// Creates the auth handshake for `user_id`.
    #[inline]
    #[must_use]
    pub fn auth(user_id: impl Into<String>) -> Self {
        Self::Auth {
            user_id: user_id.into(),
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Request
// ============================================================================

/// A correlated request from client to backend.
///
/// # Format
///
/// The payload's fields are flattened next to the correlation fields:
///
/// ```json
/// { "requestId": "uuid", "command": "portfolio", "range": "1d" }
/// ```
///
/// A payload that is not an object (and not `null`) is carried under a
/// `payload` key. `requestId` and `command` always win over payload keys of
/// the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,
    /// Backend command name.
    pub command: String,
    /// Command arguments.
    pub payload: Value,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        Self::with_id(RequestId::generate(), command, payload)
    }

    /// Creates a new request with specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, command: impl Into<String>, payload: Value) -> Self {
        Self {
            id,
            command: command.into(),
            payload,
        }
    }

    /// Builds the wire object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = match &self.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        object.insert("requestId".to_string(), Value::String(self.id.to_string()));
        object.insert("command".to_string(), Value::String(self.command.clone()));
        Value::Object(object)
    }

    /// Serializes the request to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}

// ============================================================================
// Response
// ============================================================================

/// A correlated response from backend to client.
///
/// # Format
///
/// ```json
/// { "requestId": "uuid", "result": { ... } }
/// { "requestId": "uuid", "error": "insufficient funds" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the request's `requestId`.
    #[serde(rename = "requestId")]
    pub id: RequestId,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error description (if error).
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    /// Returns `true` if this response carries an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// A missing `result` resolves to `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] carrying the remote message.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            None => Ok(self.result.unwrap_or(Value::Null)),
            Some(Value::String(message)) => Err(Error::remote(message)),
            Some(other) => Err(Error::remote(other.to_string())),
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Classification of an inbound socket text frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Response to a correlated request.
    Response(Response),
    /// Push message for the message listeners.
    Push(Value),
}

impl Inbound {
    /// Parses an inbound text frame.
    ///
    /// Objects carrying a UUID `requestId` are responses; every other JSON
    /// value is a push message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame is not JSON.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let is_response = value
            .get("requestId")
            .and_then(Value::as_str)
            .and_then(RequestId::parse)
            .is_some();

        if is_response {
            let response: Response = serde_json::from_value(value)?;
            Ok(Self::Response(response))
        } else {
            Ok(Self::Push(value))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
