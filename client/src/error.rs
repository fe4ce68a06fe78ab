use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the sync client.
///
/// Transport and protocol failures are handled inside the session task; callers
/// of the control surface only ever see `Disconnected` or `Closed`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("room connection lost; reconnect to resume")]
    Disconnected,

    #[error("sync client has shut down")]
    Closed,
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A malformed or unexpected inbound message. Logged and discarded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{0}` is missing its server timestamp")]
    MissingTimestamp(String),
}
