//! CDP wire plumbing for chromehand.
//!
//! Two building blocks live here: [`CdpChannel`], a WebSocket channel bound to
//! one debuggable target (or to the browser endpoint itself) with command
//! correlation and event fan-out, and [`DebugEndpoint`], the HTTP sibling of
//! the debugging port used for discovery, liveness probing and tab management.
//! Policy (retries, reconnects, teardown) lives in higher layers.

pub mod endpoint;
pub mod error;
pub mod transport;

pub use endpoint::{BrowserFlavor, DebugEndpoint, TargetDescription, VersionInfo};
pub use error::WireError;
pub use transport::{CdpChannel, TransportEvent};

/// Default deadline applied to a CDP command round trip.
pub const DEFAULT_COMMAND_DEADLINE_MS: u64 = 30_000;
