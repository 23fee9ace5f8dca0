//! Testdeck Harness
//!
//! In-process test registry and runner. A test module builds a tree of
//! suites and test cases through declarative registration calls; the runner
//! later walks that tree, resolves only/skip semantics, executes hooks in
//! nesting order, and reports per-test outcomes through an observer.
//!
//! ```no_run
//! use testdeck_harness::{TestRegistry, TestRunner};
//!
//! # async fn demo() {
//! let registry = TestRegistry::new();
//!
//! registry.suite("login", |r| {
//!     r.before_each(|| async { Ok(()) });
//!     r.test("rejects a bad password", |_ctx| async {
//!         // drive the app, assert on what it did
//!         Ok(())
//!     });
//! });
//!
//! let summary = TestRunner::new(registry).run_all().await;
//! assert_eq!(summary.failed, 0);
//! # }
//! ```

pub mod error;
pub mod registry;
pub mod runner;

pub use error::{HarnessError, HarnessResult};
pub use registry::{BodyResult, NodeId, NodeKind, NodeView, Status, TestContext, TestRegistry};
pub use runner::{NullObserver, RunObserver, RunSummary, TestOutcome, TestRunner};
