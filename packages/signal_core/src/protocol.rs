//! Signaling Protocol Types
//!
//! JSON messages exchanged with devices. Every message carries a `type`
//! discriminator; offer, answer and candidate payloads are relayed untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SignalError;

const KNOWN_KINDS: &[&str] = &["login", "transfer", "offer", "answer", "candidate", "leave"];

/// Messages sent FROM a device TO the coordinator
///
/// Relay messages address their target by `device`, or by `name` to reach that
/// identity's active device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Login {
        name: String,
        device: String,
    },
    Transfer {
        name: String,
        device: String,
    },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        offer: Value,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        answer: Value,
    },
    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        candidate: Value,
    },
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },
    /// Produced by [`decode`]: missing, non-string, or unknown `type`
    #[serde(skip)]
    Unrecognized { kind: Option<String> },
    /// Produced by [`decode`]: known `type` with an invalid payload
    #[serde(skip)]
    Malformed { kind: String, reason: String },
}

impl ClientMessage {
    /// Wire name of this message kind
    pub fn kind(&self) -> &str {
        match self {
            Self::Login { .. } => "login",
            Self::Transfer { .. } => "transfer",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Leave { .. } => "leave",
            Self::Unrecognized { kind } => kind.as_deref().unwrap_or(""),
            Self::Malformed { kind, .. } => kind,
        }
    }

    /// True for the placeholders [`decode`] substitutes for bad frames
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Self::Unrecognized { .. } | Self::Malformed { .. })
    }
}

/// Messages sent FROM the coordinator TO a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Login {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },
    Transfer {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },
    Offer {
        offer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        device: String,
    },
    Answer {
        answer: Value,
        device: String,
    },
    Candidate {
        candidate: Value,
    },
    Leave,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn login_accepted(name: &str, device: &str) -> Self {
        Self::Login {
            success: true,
            name: Some(name.to_string()),
            device: Some(device.to_string()),
        }
    }

    pub fn login_rejected() -> Self {
        Self::Login {
            success: false,
            name: None,
            device: None,
        }
    }

    pub fn transfer_accepted() -> Self {
        Self::Transfer {
            success: true,
            device: None,
        }
    }

    /// Sent to the device that just lost the active slot to `device`
    pub fn transfer_superseded(device: &str) -> Self {
        Self::Transfer {
            success: false,
            device: Some(device.to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Decode one inbound frame.
///
/// Never fails: frames that are not a JSON object with a known string `type`
/// become [`ClientMessage::Unrecognized`], and known kinds with bad payloads
/// become [`ClientMessage::Malformed`].
pub fn decode(frame: &[u8]) -> ClientMessage {
    let value: Value = match serde_json::from_slice(frame) {
        Ok(value) => value,
        Err(e) => {
            debug!("Invalid JSON frame ({} bytes): {}", frame.len(), e);
            return ClientMessage::Unrecognized { kind: None };
        }
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => return ClientMessage::Unrecognized { kind: None },
    };

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return ClientMessage::Unrecognized { kind: Some(kind) };
    }

    match serde_json::from_value(value) {
        Ok(message) => message,
        Err(e) => {
            debug!("Malformed {} message: {}", kind, e);
            ClientMessage::Malformed {
                kind,
                reason: e.to_string(),
            }
        }
    }
}

/// Encode one outbound message as a JSON text frame
pub fn encode(message: &ServerMessage) -> Result<String, SignalError> {
    Ok(serde_json::to_string(message)?)
}
