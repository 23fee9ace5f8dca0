//! Testdeck Bridge
//!
//! The page-side source of truth for request mocking. The bridge keeps the
//! authoritative list of active mock rules, pushes them to an interception
//! channel endpoint, and lets test bodies wait until the endpoint reports
//! that a rule matched a real outgoing request.
//!
//! The channel endpoint itself is a collaborator reached through the
//! [`InterceptionChannel`] trait: in production a service-worker-like
//! process installed with `testdeck install`, in tests (or worker-less
//! hosts) the in-process [`LocalInterceptor`].
//!
//! ```no_run
//! use testdeck_bridge::{MockBridge, LocalInterceptor, RuleSpec};
//! use std::sync::Arc;
//!
//! # async fn demo() -> testdeck_bridge::BridgeResult<()> {
//! let interceptor = Arc::new(LocalInterceptor::new());
//! let bridge = MockBridge::new(interceptor.clone());
//! bridge.init_mocking().await?;
//!
//! bridge
//!     .define_rule("joke", RuleSpec::get("https://api.example/random"))
//!     .await;
//! // ... app issues the request ...
//! let rule = bridge.await_rule_fired("joke").await?;
//! assert!(rule.executed);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod channel;
pub mod error;
pub mod intercept;
pub mod protocol;
pub mod rule;

pub use bridge::MockBridge;
pub use channel::{FileVersionStore, InterceptionChannel, MemoryVersionStore, VersionStore};
pub use error::{BridgeError, BridgeResult};
pub use intercept::{LocalInterceptor, MockedResponse};
pub use protocol::{ChannelCommand, ChannelNotice, RuleDefinition};
pub use rule::{CapturedBody, MockRule, RuleSpec};
