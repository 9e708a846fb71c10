use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the wire layer.
///
/// `TransportGone` and `Poisoned` are terminal for the channel that produced
/// them: every in-flight command is failed with the same error and the event
/// stream closes. Nothing in this crate retries.
#[derive(Clone, Debug, Error)]
pub enum WireError {
    #[error("transport gone: {0}")]
    TransportGone(String),
    #[error("channel poisoned by malformed frame: {0}")]
    Poisoned(String),
    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),
    #[error("cdp error {code}: {message}")]
    Cdp { code: i64, message: String },
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("debug endpoint error: {0}")]
    Endpoint(String),
    #[error("internal wire error: {0}")]
    Internal(String),
}

impl WireError {
    /// True when the underlying channel is unusable and must be reopened.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WireError::TransportGone(_) | WireError::Poisoned(_))
    }
}
