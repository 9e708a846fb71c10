//! Tool-level error shaping.
//!
//! Nothing escapes the dispatcher: every fault below it is converted into a
//! structured `{success:false, error, kind, tool, hint?}` value. The kinds
//! are semantic, not Rust types, so the agent on the other side can branch on
//! them.

use browser_host::HostError;
use cdp_wire::WireError;
use intercept_engine::EngineError;
use stealth::StealthError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArguments,
    ChromiumNotFound,
    BrowserFailedToStart,
    NotConnected,
    PortNotBrowser,
    TransportGone,
    NoPageAvailable,
    TargetNotFound,
    SelectorNotFound,
    InterceptionModeConflict,
    InterceptionTimeout,
    ToolTimeout,
    HandlerRaised,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArguments => "invalid-arguments",
            ErrorKind::ChromiumNotFound => "chromium-not-found",
            ErrorKind::BrowserFailedToStart => "browser-failed-to-start",
            ErrorKind::NotConnected => "not-connected",
            ErrorKind::PortNotBrowser => "port-not-browser",
            ErrorKind::TransportGone => "transport-gone",
            ErrorKind::NoPageAvailable => "no-page-available",
            ErrorKind::TargetNotFound => "target-not-found",
            ErrorKind::SelectorNotFound => "selector-not-found",
            ErrorKind::InterceptionModeConflict => "interception-mode-conflict",
            ErrorKind::InterceptionTimeout => "interception-timeout",
            ErrorKind::ToolTimeout => "tool-timeout",
            ErrorKind::HandlerRaised => "handler-raised",
        }
    }
}

#[derive(Debug)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    pub hint: Option<String>,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, message)
    }

    pub fn raised(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerRaised, message)
    }

    pub fn selector_not_found(selector: &str) -> Self {
        Self::new(
            ErrorKind::SelectorNotFound,
            format!("no element matched selector {selector:?}"),
        )
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<HostError> for ToolError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::ChromiumNotFound => {
                ToolError::new(ErrorKind::ChromiumNotFound, err.to_string())
                    .with_hint("Install Chrome or Chromium, or pass chrome_path.")
            }
            HostError::BrowserFailedToStart { ref log } => ToolError::new(
                ErrorKind::BrowserFailedToStart,
                format!("browser failed to start: {}", log.join(" | ")),
            ),
            HostError::NotConnected => ToolError::new(
                ErrorKind::NotConnected,
                "no browser is connected and auto-launch is disabled",
            )
            .with_hint("Call launch_with_profile to start a browser."),
            HostError::PortNotBrowser(detail) => {
                ToolError::new(ErrorKind::PortNotBrowser, detail).with_hint(
                    "The debugging port is held by a WebView or headless shell, not a full browser.",
                )
            }
            HostError::NoPageAvailable => ToolError::new(
                ErrorKind::NoPageAvailable,
                "the browser has no open page targets",
            )
            .with_hint("Open a tab with manage_tabs {action:\"new\"}."),
            HostError::TargetNotFound(id) => ToolError::new(
                ErrorKind::TargetNotFound,
                format!("target {id} is not an open page"),
            ),
            HostError::Profile(message) => ToolError::raised(format!("profile error: {message}")),
            HostError::Wire(wire) => wire.into(),
            HostError::Internal(message) => ToolError::raised(message),
        }
    }
}

impl From<WireError> for ToolError {
    fn from(err: WireError) -> Self {
        if err.is_terminal() {
            ToolError::new(ErrorKind::TransportGone, err.to_string())
                .with_hint("The browser connection dropped; the next tool call reconnects.")
        } else {
            ToolError::raised(err.to_string())
        }
    }
}

impl From<EngineError> for ToolError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ModeConflict(message) => {
                ToolError::new(ErrorKind::InterceptionModeConflict, message)
            }
            EngineError::NoContext(target) => ToolError::invalid_args(format!(
                "interception is not enabled on target {target}"
            )),
            EngineError::RequestNotPending(id) => {
                ToolError::invalid_args(format!("request {id} is not pending"))
            }
            EngineError::AlreadyResolved(id) => {
                ToolError::invalid_args(format!("request {id} was already resolved"))
            }
            EngineError::Wire(wire) => wire.into(),
            EngineError::Internal(message) => ToolError::raised(message),
        }
    }
}

impl From<StealthError> for ToolError {
    fn from(err: StealthError) -> Self {
        ToolError::raised(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_carries_the_launch_hint() {
        let err: ToolError = HostError::NotConnected.into();
        assert_eq!(err.kind, ErrorKind::NotConnected);
        assert!(err.hint.as_deref().unwrap().contains("launch_with_profile"));
    }

    #[test]
    fn terminal_wire_errors_map_to_transport_gone() {
        let err: ToolError = WireError::TransportGone("socket closed".into()).into();
        assert_eq!(err.kind, ErrorKind::TransportGone);
        let err: ToolError = WireError::Cdp {
            code: -32000,
            message: "no node".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::HandlerRaised);
    }

    #[test]
    fn mode_conflict_keeps_its_kind() {
        let err: ToolError = EngineError::ModeConflict("x".into()).into();
        assert_eq!(err.kind, ErrorKind::InterceptionModeConflict);
        assert_eq!(err.kind.as_str(), "interception-mode-conflict");
    }
}
