use crate::registry::ConnectionId;

/// Errors surfaced by the signaling core
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The device is already live under this identity
    #[error("device {device} is already logged in as {name}")]
    AlreadyLoggedIn { name: String, device: String },

    /// The connection already has a device bound to it
    #[error("connection {connection} is already bound to device {device}")]
    ConnectionAlreadyBound {
        connection: ConnectionId,
        device: String,
    },

    /// An outbound message could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SignalError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::AlreadyLoggedIn { .. } => "already_logged_in",
            Self::ConnectionAlreadyBound { .. } => "connection_already_bound",
            Self::Encode(_) => "encode_failed",
        }
    }
}
