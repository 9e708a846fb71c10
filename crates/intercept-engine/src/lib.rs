//! Network interception for chromehand.
//!
//! A state machine over CDP's Fetch pause events with four overlapping modes
//! (observe, modify-request, modify-response, mock-endpoint), plus HAR
//! recording and WebSocket frame capture on the same per-target persistent
//! sessions. The engine is the single owner of those sessions' lifetimes;
//! whoever hands them in gets a release callback when the engine is done.

pub mod capture;
pub mod engine;
pub mod error;
pub mod har;
pub mod pause;
pub mod rules;

pub use capture::{FrameDirection, WsFrame};
pub use engine::{
    EngineStats, InterceptionEngine, TargetStats, DEFAULT_PAUSE_TIMEOUT_MS, PURPOSE_INTERCEPT,
    PURPOSE_WS_CAPTURE,
};
pub use error::EngineError;
pub use har::HarRecorder;
pub use pause::{Disposition, PausedRequest};
pub use rules::{
    decide, glob_match, Decision, HeaderPatch, InterceptRule, InterceptStage, MockEndpoint,
    Modification, PauseView, RuleAction,
};
