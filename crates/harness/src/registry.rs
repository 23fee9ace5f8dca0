//! Suite/test tree registry
//!
//! The registry owns the tree that registration calls build and the runner
//! walks. Registration is synchronous: `suite` pushes the new node onto a
//! current-suite stack and invokes the build closure so nested calls attach
//! under it. Node ids are indices into an arena and stay stable until
//! `reset`, which is the only way nodes are ever removed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stable identifier of a suite or test node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Suite,
    Test,
}

/// Execution status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Running,
    Pass,
    Fail,
    Skip,
}

/// Error type test bodies and hooks may return
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

pub type BodyResult = Result<(), BodyError>;

pub(crate) type TestBody = Arc<dyn Fn(TestContext) -> BoxFuture<'static, BodyResult> + Send + Sync>;

pub(crate) type Hook = Arc<dyn Fn() -> BoxFuture<'static, BodyResult> + Send + Sync>;

struct Node {
    name: String,
    kind: NodeKind,
    depth: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    only: bool,
    skip: bool,
    status: Status,
    logs: Vec<String>,
    failure: Option<String>,
    body: Option<TestBody>,
}

/// Read-only snapshot of a node, safe to hand to observers and UIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub only: bool,
    pub skip: bool,
    pub status: Status,
    pub logs: Vec<String>,
    pub failure: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    /// Suites currently being built, innermost last
    stack: Vec<NodeId>,
    before_hooks: HashMap<NodeId, Vec<Hook>>,
    after_hooks: HashMap<NodeId, Vec<Hook>>,
}

/// The suite/test tree.
///
/// Cheap to clone; clones share the same underlying store. All mutation goes
/// through the registration calls below and the crate-internal setters the
/// runner uses for status and logs.
#[derive(Clone, Default)]
pub struct TestRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a suite and synchronously run its build closure so nested
    /// `suite`/`test` calls attach under it.
    pub fn suite<F>(&self, name: &str, build: F) -> NodeId
    where
        F: FnOnce(&TestRegistry),
    {
        self.register_suite(name, false, false, build)
    }

    /// `suite` variant that narrows the run set to this subtree
    pub fn suite_only<F>(&self, name: &str, build: F) -> NodeId
    where
        F: FnOnce(&TestRegistry),
    {
        self.register_suite(name, true, false, build)
    }

    /// `suite` variant whose descendants are excluded from the run set
    /// (unless a more specific `only` overrides the exclusion)
    pub fn suite_skip<F>(&self, name: &str, build: F) -> NodeId
    where
        F: FnOnce(&TestRegistry),
    {
        self.register_suite(name, false, true, build)
    }

    /// Register a test case under the suite currently being built, or at the
    /// root when no suite is open.
    pub fn test<F, Fut>(&self, name: &str, body: F) -> NodeId
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.register_test(name, false, false, body)
    }

    pub fn test_only<F, Fut>(&self, name: &str, body: F) -> NodeId
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.register_test(name, true, false, body)
    }

    pub fn test_skip<F, Fut>(&self, name: &str, body: F) -> NodeId
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.register_test(name, false, true, body)
    }

    /// Register a hook that runs before every test in the suite currently
    /// being built and in its descendants.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `suite` build closure. That is a test
    /// authoring error and should fail the module load loudly.
    pub fn before_each<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        let mut inner = self.inner.write();
        let suite = *inner
            .stack
            .last()
            .expect("before_each() must be called inside a suite() build closure");
        inner
            .before_hooks
            .entry(suite)
            .or_default()
            .push(Arc::new(move || hook().boxed()));
    }

    /// Register a hook that runs after every test in the suite currently
    /// being built and in its descendants.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `suite` build closure.
    pub fn after_each<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        let mut inner = self.inner.write();
        let suite = *inner
            .stack
            .last()
            .expect("after_each() must be called inside a suite() build closure");
        inner
            .after_hooks
            .entry(suite)
            .or_default()
            .push(Arc::new(move || hook().boxed()));
    }

    /// Drop every node and hook chain. Used between reloads of test modules
    /// so re-registration does not duplicate the tree.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        *inner = RegistryInner::default();
        debug!("registry reset");
    }

    fn register_suite<F>(&self, name: &str, only: bool, skip: bool, build: F) -> NodeId
    where
        F: FnOnce(&TestRegistry),
    {
        let id = {
            let mut inner = self.inner.write();
            let id = inner.push_node(name, NodeKind::Suite, only, skip, None);
            inner.stack.push(id);
            id
        };

        // The lock is released while the build closure runs: nested
        // registrations re-enter the registry.
        build(self);

        let mut inner = self.inner.write();
        let popped = inner.stack.pop();
        debug_assert_eq!(popped, Some(id));
        id
    }

    fn register_test<F, Fut>(&self, name: &str, only: bool, skip: bool, body: F) -> NodeId
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        let body: TestBody = Arc::new(move |ctx| body(ctx).boxed());
        let mut inner = self.inner.write();
        inner.push_node(name, NodeKind::Test, only, skip, Some(body))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Root node ids in registration order
    pub fn roots(&self) -> Vec<NodeId> {
        self.inner.read().roots.clone()
    }

    /// Snapshot a node
    pub fn node(&self, id: NodeId) -> Option<NodeView> {
        let inner = self.inner.read();
        inner.nodes.get(id.0).map(|n| NodeView {
            id,
            name: n.name.clone(),
            kind: n.kind,
            depth: n.depth,
            parent: n.parent,
            children: n.children.clone(),
            only: n.only,
            skip: n.skip,
            status: n.status,
            logs: n.logs.clone(),
            failure: n.failure.clone(),
        })
    }

    /// All test node ids in pre-order (suite before children, children in
    /// registration order, nested suites depth-first)
    pub fn tests_in_order(&self) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        let roots = inner.roots.clone();
        for root in roots {
            inner.collect_tests(root, &mut out);
        }
        out
    }

    /// Whether any node in the tree carries an `only` tag
    pub fn has_only(&self) -> bool {
        self.inner.read().nodes.iter().any(|n| n.only)
    }

    /// Ancestor chain of a node, outermost first, excluding the node itself
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut chain = Vec::new();
        let mut cursor = inner.nodes.get(id.0).and_then(|n| n.parent);
        while let Some(pid) = cursor {
            chain.push(pid);
            cursor = inner.nodes[pid.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Deepest `only` and `skip` depths on the path from the root to `id`
    /// (inclusive). The runner compares the two to decide whether a more
    /// specific `only` overrides a less specific `skip`.
    pub(crate) fn flag_depths(&self, id: NodeId) -> (Option<usize>, Option<usize>) {
        let inner = self.inner.read();
        let mut only_depth = None;
        let mut skip_depth = None;
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let node = &inner.nodes[cur.0];
            if node.only {
                only_depth = only_depth.max(Some(node.depth));
            }
            if node.skip {
                skip_depth = skip_depth.max(Some(node.depth));
            }
            cursor = node.parent;
        }
        (only_depth, skip_depth)
    }

    pub(crate) fn body(&self, id: NodeId) -> Option<TestBody> {
        self.inner.read().nodes.get(id.0).and_then(|n| n.body.clone())
    }

    pub(crate) fn before_hooks(&self, suite: NodeId) -> Vec<Hook> {
        self.inner
            .read()
            .before_hooks
            .get(&suite)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn after_hooks(&self, suite: NodeId) -> Vec<Hook> {
        self.inner
            .read()
            .after_hooks
            .get(&suite)
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Runner-only mutation
    // ========================================================================

    pub(crate) fn set_status(&self, id: NodeId, status: Status) {
        if let Some(node) = self.inner.write().nodes.get_mut(id.0) {
            node.status = status;
        }
    }

    pub(crate) fn set_failure(&self, id: NodeId, message: Option<String>) {
        if let Some(node) = self.inner.write().nodes.get_mut(id.0) {
            node.failure = message;
        }
    }

    pub(crate) fn clear_execution_state(&self, id: NodeId) {
        if let Some(node) = self.inner.write().nodes.get_mut(id.0) {
            node.status = Status::Running;
            node.logs.clear();
            node.failure = None;
        }
    }

    fn append_log(&self, id: NodeId, line: String) {
        if let Some(node) = self.inner.write().nodes.get_mut(id.0) {
            node.logs.push(line);
        }
    }
}

impl RegistryInner {
    fn push_node(
        &mut self,
        name: &str,
        kind: NodeKind,
        only: bool,
        skip: bool,
        body: Option<TestBody>,
    ) -> NodeId {
        let parent = self.stack.last().copied();
        let depth = parent.map_or(0, |p| self.nodes[p.0].depth + 1);
        let id = NodeId(self.nodes.len());

        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            depth,
            parent,
            children: Vec::new(),
            only,
            skip,
            status: Status::Idle,
            logs: Vec::new(),
            failure: None,
            body,
        });

        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.roots.push(id),
        }

        id
    }

    fn collect_tests(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = &self.nodes[id.0];
        match node.kind {
            NodeKind::Test => out.push(id),
            NodeKind::Suite => {
                for child in &node.children {
                    self.collect_tests(*child, out);
                }
            }
        }
    }
}

/// Handle passed to a running test body.
///
/// Lets the body append to its node's ordered log, which UIs show alongside
/// the outcome.
#[derive(Clone)]
pub struct TestContext {
    registry: TestRegistry,
    node: NodeId,
}

impl TestContext {
    pub(crate) fn new(registry: TestRegistry, node: NodeId) -> Self {
        Self { registry, node }
    }

    /// Id of the test this context belongs to
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Append a line to the test's log
    pub fn log(&self, line: impl Into<String>) {
        self.registry.append_log(self.node, line.into());
    }
}
