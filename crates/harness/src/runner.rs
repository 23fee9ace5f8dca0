//! Test execution
//!
//! The runner decides which registered tests run, executes them strictly
//! sequentially with correct hook nesting, and keeps one test's failure from
//! affecting the rest of the run. It owns every status/log mutation on the
//! tree; the only other output channel is the [`RunObserver`] callbacks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{HarnessError, HarnessResult};
use crate::registry::{BodyResult, NodeId, NodeKind, NodeView, Status, TestContext, TestRegistry};

/// Callbacks through which the runner reports progress.
///
/// This is the runner's only channel to a UI; the default methods make every
/// callback optional.
pub trait RunObserver: Send + Sync {
    fn on_start(&self, test: &NodeView) {
        let _ = test;
    }
    fn on_pass(&self, test: &NodeView) {
        let _ = test;
    }
    fn on_fail(&self, test: &NodeView, message: &str) {
        let _ = (test, message);
    }
    fn on_skip(&self, test: &NodeView) {
        let _ = test;
    }
}

/// Observer that ignores every callback
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Outcome of a single test execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub id: NodeId,
    pub name: String,
    pub status: Status,
    pub duration_ms: u64,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

/// Result of a whole `run_all` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<TestOutcome>,
}

/// Walks the registry and executes tests
pub struct TestRunner {
    registry: TestRegistry,
    observer: Arc<dyn RunObserver>,
}

impl TestRunner {
    pub fn new(registry: TestRegistry) -> Self {
        Self {
            registry,
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_observer(registry: TestRegistry, observer: Arc<dyn RunObserver>) -> Self {
        Self { registry, observer }
    }

    /// Run every test in the effective run set, in registration pre-order.
    ///
    /// Tests outside the set are reported as skipped without executing their
    /// body. Execution is strictly sequential: a test's after-hooks complete
    /// before the next test's before-hooks start, because DOM and mock-rule
    /// state is shared between tests. A body whose future never settles
    /// stalls the run; there is no per-test timeout.
    pub async fn run_all(&self) -> RunSummary {
        let start = Instant::now();
        let tests = self.registry.tests_in_order();
        let has_only = self.registry.has_only();

        info!("Running {} test(s)...", tests.len());

        let mut outcomes = Vec::with_capacity(tests.len());
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for id in tests {
            if self.in_run_set(id, has_only) {
                let outcome = self.execute_test(id).await;
                match outcome.status {
                    Status::Pass => {
                        passed += 1;
                        info!("✓ {} ({} ms)", outcome.name, outcome.duration_ms);
                    }
                    _ => {
                        failed += 1;
                        error!(
                            "✗ {} - {}",
                            outcome.name,
                            outcome.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
                outcomes.push(outcome);
            } else {
                skipped += 1;
                outcomes.push(self.mark_skipped(id));
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        RunSummary {
            total: outcomes.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            outcomes,
        }
    }

    /// Run one test by id, regardless of any `only`/`skip` tags elsewhere in
    /// the tree. Used by interactive re-run of a single test.
    pub async fn run_single(&self, id: NodeId) -> HarnessResult<TestOutcome> {
        let view = self
            .registry
            .node(id)
            .ok_or(HarnessError::NodeNotFound(id))?;
        if view.kind != NodeKind::Test {
            return Err(HarnessError::NotATest(id));
        }
        Ok(self.execute_test(id).await)
    }

    /// Whether `id` belongs to the effective run set.
    ///
    /// With an `only` anywhere in the tree, a test runs when the deepest
    /// `only` on its path is more specific than any `skip` on the same path;
    /// an explicit `only` therefore overrides an ancestor `skip`. Without
    /// any `only`, a test runs unless its path carries a `skip`.
    fn in_run_set(&self, id: NodeId, has_only: bool) -> bool {
        let (only_depth, skip_depth) = self.registry.flag_depths(id);
        if has_only {
            match (only_depth, skip_depth) {
                (Some(o), Some(s)) => o > s,
                (Some(_), None) => true,
                (None, _) => false,
            }
        } else {
            skip_depth.is_none()
        }
    }

    async fn execute_test(&self, id: NodeId) -> TestOutcome {
        let start = Instant::now();
        self.registry.clear_execution_state(id);

        if let Some(view) = self.registry.node(id) {
            debug!("Running test: {}", view.name);
            self.observer.on_start(&view);
        }

        let ancestors = self.registry.ancestors(id);
        let mut failure: Option<String> = None;

        // Before-hooks, outer suite first
        for suite in &ancestors {
            for hook in self.registry.before_hooks(*suite) {
                if let Err(msg) = guarded(hook()).await {
                    failure = Some(msg);
                    break;
                }
            }
            if failure.is_some() {
                break;
            }
        }

        // Body runs only when every before-hook succeeded
        if failure.is_none() {
            if let Some(body) = self.registry.body(id) {
                let ctx = TestContext::new(self.registry.clone(), id);
                if let Err(msg) = guarded(body(ctx)).await {
                    failure = Some(msg);
                }
            }
        }

        // After-hooks always run, inner suite first; the first failure wins
        for suite in ancestors.iter().rev() {
            for hook in self.registry.after_hooks(*suite) {
                if let Err(msg) = guarded(hook()).await {
                    failure.get_or_insert(msg);
                }
            }
        }

        let status = if failure.is_none() {
            Status::Pass
        } else {
            Status::Fail
        };
        self.registry.set_failure(id, failure.clone());
        self.registry.set_status(id, status);

        let view = self.registry.node(id).expect("node exists while running");
        match &failure {
            None => self.observer.on_pass(&view),
            Some(msg) => self.observer.on_fail(&view, msg),
        }

        TestOutcome {
            id,
            name: view.name,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            logs: view.logs,
            error: failure,
        }
    }

    fn mark_skipped(&self, id: NodeId) -> TestOutcome {
        self.registry.set_status(id, Status::Skip);
        let view = self.registry.node(id).expect("node exists while running");
        self.observer.on_skip(&view);

        TestOutcome {
            id,
            name: view.name,
            status: Status::Skip,
            duration_ms: 0,
            logs: Vec::new(),
            error: None,
        }
    }
}

/// Await a body or hook, converting both returned errors and panics into a
/// failure message so one test cannot take down the run.
async fn guarded(fut: BoxFuture<'_, BodyResult>) -> Result<(), String> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(&panic)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test panicked".to_string()
    }
}
