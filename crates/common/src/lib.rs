//! Testdeck Common Library
//!
//! Shared primitives for the Testdeck harness: the scheduled-retry wait loop
//! used by rule waits and element lookups, tracing setup, and the protocol
//! version shared with interception channel endpoints.

pub mod logging;
pub mod wait;

// Re-export commonly used types
pub use wait::{poll_until, PollOptions, WaitError, WaitResult};

/// Testdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interception channel protocol version.
///
/// Carried on every outbound channel command and compared against the version
/// a channel endpoint reports at startup. A mismatch is advisory: it means
/// the installed endpoint script predates this library and should be
/// reinstalled with `testdeck install`.
pub const PROTOCOL_VERSION: &str = "2";
