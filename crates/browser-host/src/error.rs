use cdp_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no chromium executable found")]
    ChromiumNotFound,
    #[error("browser failed to start")]
    BrowserFailedToStart { log: Vec<String> },
    #[error("no browser connection")]
    NotConnected,
    #[error("debugging port is not a full chromium browser: {0}")]
    PortNotBrowser(String),
    #[error("no page target available")]
    NoPageAvailable,
    #[error("target {0} is not an open page")]
    TargetNotFound(String),
    #[error("profile error: {0}")]
    Profile(String),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Profile(err.to_string())
    }
}
