use cdp_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("interception mode conflict: {0}")]
    ModeConflict(String),
    #[error("no interception context for target {0}")]
    NoContext(String),
    #[error("request {0} is not pending")]
    RequestNotPending(String),
    #[error("request {0} was already resolved")]
    AlreadyResolved(String),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("internal: {0}")]
    Internal(String),
}
