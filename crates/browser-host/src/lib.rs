//! Browser lifecycle for chromehand: find a Chromium, clone the user's
//! profile, launch against the clone, watch the process, and keep a registry
//! of targets plus a pool of CDP sessions for the layers above.
//!
//! The one rule every piece here honors: the user's live browser is never
//! touched. We debug a shadow copy of their profile, we attach to external
//! browsers without owning them, and nothing but the explicit close operation
//! may terminate a process.

pub mod error;
pub mod launch;
pub mod locate;
pub mod orchestrator;
pub mod profile;
pub mod session;
pub mod targets;

pub use error::HostError;
pub use launch::{ExitNotice, LaunchSpec, SupervisedProcess};
pub use locate::locate_chromium;
pub use orchestrator::{BrowserHost, HostStatus, LaunchOptions, LaunchReport};
pub use profile::{build_shadow_profile, default_user_data_dir, SINGLETON_LOCKS};
pub use session::SessionManager;
pub use targets::{TargetKind, TargetRecord, TargetRegistry};
