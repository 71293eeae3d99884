//! Graph runtime, configuration and node registry.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::HashSet;
use slab::Slab;

use crate::array::{AggregateNode, ArrayNode};
use crate::node::{Node, Params};
use crate::pool::{ArrayParams, ChildFactory, Pool};
use crate::tracer::{NoopTracer, Tracer};
use crate::GraphError;

/// Default maximum nesting of recomputations within one propagation pass.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Identifier of a node or container registered in a [`Graph`].
///
/// Ids are reused after the node they named is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The raw slab index of this id.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a registered node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// A fixed value or a zero-argument producer.
    Value,
    /// Computed from parameter nodes.
    Derived,
    /// Collects several source nodes into one sequence.
    Aggregate,
    /// Sequence-valued node with per-index projections.
    Array,
    /// Selects one index out of an array node.
    Projection {
        /// The selected index.
        index: usize,
    },
    /// Pooling container of child entities.
    Pool,
}

/// Registry entry for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// What the node is.
    pub kind: NodeKind,
    /// Nodes whose changes this node reacts to, in registration order.
    pub dependencies: Vec<NodeId>,
}

pub(crate) struct GraphInner {
    registry: RefCell<Slab<NodeRecord>>,
    /// Active recomputations, outermost first.
    stack: RefCell<Vec<NodeId>>,
    max_depth: usize,
    detect_cycles: bool,
    tracer: Box<dyn Tracer>,
}

/// The graph runtime through which nodes and pooling containers are built.
///
/// This is cheap to clone - all data is behind `Rc`. Graphs are single-threaded:
/// every propagation pass completes synchronously inside the call that started it.
///
/// # Example
///
/// ```
/// use scene_flow::Graph;
///
/// let graph = Graph::new();
/// let width = graph.value(3.0_f32);
/// let height = graph.value(4.0_f32);
/// let area = graph.derived((width.clone(), height.clone()), |(w, h)| w * h);
///
/// width.recompute().unwrap();
/// assert_eq!(area.current_value(), Some(12.0));
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Rc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.node_count())
            .field("max_depth", &self.inner.max_depth)
            .field("detect_cycles", &self.inner.detect_cycles)
            .finish()
    }
}

impl Graph {
    /// Create a new graph with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the graph.
    ///
    /// # Example
    ///
    /// ```
    /// use scene_flow::{Graph, NoopTracer};
    ///
    /// let graph = Graph::builder()
    ///     .max_depth(64)
    ///     .detect_cycles(true)
    ///     .tracer(NoopTracer)
    ///     .build();
    /// assert_eq!(graph.max_depth(), 64);
    /// ```
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// The configured propagation depth limit.
    pub fn max_depth(&self) -> usize {
        self.inner.max_depth
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a value node holding a fixed value.
    pub fn value<T: Clone + 'static>(&self, value: T) -> Node<T> {
        Node::fixed(self, Some(value))
    }

    /// Create a value node with no value yet. It stays absent until [`Node::set`].
    pub fn empty<T: Clone + 'static>(&self) -> Node<T> {
        Node::fixed(self, None)
    }

    /// Create a value node wrapping a zero-argument producer.
    ///
    /// The producer is only called by [`Node::recompute`]; reading never calls it.
    pub fn producer<T, F>(&self, producer: F) -> Node<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        Node::computed(
            self,
            NodeKind::Value,
            Vec::new(),
            Box::new(move || Ok(Some(producer()))),
        )
    }

    /// Create a node computed from the current values of `params`.
    ///
    /// The node registers its recomputation with every parameter once. The
    /// producer only runs when every parameter is present; otherwise the node
    /// becomes absent.
    pub fn derived<P, T, F>(&self, params: P, f: F) -> Node<T>
    where
        P: Params,
        T: Clone + 'static,
        F: Fn(P::Values) -> T + 'static,
    {
        self.wire(NodeKind::Derived, params, move |values| Ok(Some(f(values))))
    }

    /// Like [`Graph::derived`], but the producer may fail.
    ///
    /// A producer error aborts the propagation pass and is returned from the
    /// `recompute` call that started it.
    pub fn try_derived<P, T, F>(&self, params: P, f: F) -> Node<T>
    where
        P: Params,
        T: Clone + 'static,
        F: Fn(P::Values) -> Result<T, GraphError> + 'static,
    {
        self.wire(NodeKind::Derived, params, move |values| f(values).map(Some))
    }

    /// Combine independent source nodes into one sequence-valued node.
    ///
    /// Element `i` is the current value of `sources[i]`, `None` when absent.
    pub fn aggregate<T: Clone + 'static>(&self, sources: Vec<Node<T>>) -> AggregateNode<T> {
        AggregateNode::new(self, sources)
    }

    /// Create an array node from a producer returning dense sequences.
    pub fn array<P, T, F>(&self, params: P, f: F) -> ArrayNode<T>
    where
        P: Params,
        T: Clone + 'static,
        F: Fn(P::Values) -> Vec<T> + 'static,
    {
        let node = self.wire(NodeKind::Array, params, move |values| {
            Ok(Some(f(values).into_iter().map(Some).collect()))
        });
        ArrayNode::wrap(node)
    }

    /// Create an array node from a producer whose sequences may contain holes.
    ///
    /// The first `None` element bounds the array's valid length.
    pub fn sparse_array<P, T, F>(&self, params: P, f: F) -> ArrayNode<T>
    where
        P: Params,
        T: Clone + 'static,
        F: Fn(P::Values) -> Vec<Option<T>> + 'static,
    {
        let node = self.wire(NodeKind::Array, params, move |values| Ok(Some(f(values))));
        ArrayNode::wrap(node)
    }

    /// Create a pooling container over array parameters.
    ///
    /// The container registers its recomputation with every parameter. Call
    /// [`Pool::recompute`] once to establish the initial children.
    pub fn pool<P, F>(&self, params: P, factory: F) -> Pool<P, F>
    where
        P: ArrayParams,
        F: ChildFactory<P>,
    {
        Pool::new(self, params, factory)
    }

    fn wire<P, T, F>(&self, kind: NodeKind, params: P, f: F) -> Node<T>
    where
        P: Params,
        T: Clone + 'static,
        F: Fn(P::Values) -> Result<Option<T>, GraphError> + 'static,
    {
        let subscribed = params.clone();
        let node = Node::computed(
            self,
            kind,
            params.node_ids(),
            Box::new(move || match params.values() {
                Some(values) => f(values),
                None => Ok(None),
            }),
        );
        subscribed.subscribe(&node.recompute_hook());
        node
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub(crate) fn register(&self, kind: NodeKind, dependencies: Vec<NodeId>) -> NodeId {
        let mut registry = self.inner.registry.borrow_mut();
        NodeId(registry.insert(NodeRecord { kind, dependencies }))
    }

    pub(crate) fn add_dependency(&self, node: NodeId, dependency: NodeId) {
        if let Some(record) = self.inner.registry.borrow_mut().get_mut(node.0) {
            record.dependencies.push(dependency);
        }
    }

    pub(crate) fn release(&self, id: NodeId) {
        // Dropping may happen while the registry is borrowed by a caller
        // iterating records; skip the bookkeeping rather than panic.
        let Ok(mut registry) = self.inner.registry.try_borrow_mut() else {
            return;
        };
        if registry.contains(id.0) {
            registry.remove(id.0);
            for (_, record) in registry.iter_mut() {
                record.dependencies.retain(|dependency| *dependency != id);
            }
        }
    }

    /// Get the registry record of a node.
    pub fn record(&self, id: NodeId) -> Option<NodeRecord> {
        self.inner.registry.borrow().get(id.0).cloned()
    }

    /// Number of live nodes and containers.
    pub fn node_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// All nodes reachable from `id` through recorded dependency edges.
    ///
    /// Opaque callbacks registered with [`Node::register_dependent`] are not
    /// recorded and do not appear here.
    pub fn downstream(&self, id: NodeId) -> Vec<NodeId> {
        let registry = self.inner.registry.borrow();
        let mut seen = HashSet::default();
        let mut queue = vec![id];
        let mut result = Vec::new();
        while let Some(current) = queue.pop() {
            for (key, record) in registry.iter() {
                let dependent = NodeId(key);
                if record.dependencies.contains(&current) && seen.insert(dependent) {
                    result.push(dependent);
                    queue.push(dependent);
                }
            }
        }
        result.sort();
        result
    }

    /// Detect a cycle through `id` in the recorded dependency edges.
    pub fn has_cycle(&self, id: NodeId) -> bool {
        self.find_cycle(id).is_some()
    }

    /// Check every recorded node for dependency cycles.
    ///
    /// Constructor wiring cannot form cycles; only [`Node::link`] can.
    pub fn validate(&self) -> Result<(), GraphError> {
        let ids: Vec<NodeId> = self
            .inner
            .registry
            .borrow()
            .iter()
            .map(|(key, _)| NodeId(key))
            .collect();
        for id in ids {
            if let Some(path) = self.find_cycle(id) {
                return Err(GraphError::Cycle { path });
            }
        }
        Ok(())
    }

    fn find_cycle(&self, id: NodeId) -> Option<Vec<NodeId>> {
        let registry = self.inner.registry.borrow();
        let mut path = Vec::new();
        let mut on_path = HashSet::default();
        let mut finished = HashSet::default();
        Self::find_cycle_from(&registry, id, id, &mut path, &mut on_path, &mut finished)
    }

    fn find_cycle_from(
        registry: &Slab<NodeRecord>,
        target: NodeId,
        current: NodeId,
        path: &mut Vec<NodeId>,
        on_path: &mut HashSet<NodeId>,
        finished: &mut HashSet<NodeId>,
    ) -> Option<Vec<NodeId>> {
        path.push(current);
        on_path.insert(current);
        if let Some(record) = registry.get(current.0) {
            for dependency in &record.dependencies {
                if *dependency == target {
                    let mut cycle = path.clone();
                    cycle.push(target);
                    return Some(cycle);
                }
                if on_path.contains(dependency) || finished.contains(dependency) {
                    continue;
                }
                if let Some(cycle) =
                    Self::find_cycle_from(registry, target, *dependency, path, on_path, finished)
                {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        on_path.remove(&current);
        finished.insert(current);
        None
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    pub(crate) fn tracer(&self) -> &dyn Tracer {
        &*self.inner.tracer
    }

    /// Push `id` onto the propagation stack for the lifetime of the returned frame.
    pub(crate) fn enter(&self, id: NodeId, kind: NodeKind) -> Result<Frame<'_>, GraphError> {
        {
            let mut stack = self.inner.stack.borrow_mut();
            if self.inner.detect_cycles && stack.contains(&id) {
                let mut path = stack.clone();
                path.push(id);
                drop(stack);
                self.inner.tracer.on_cycle_detected(&path);
                return Err(GraphError::Cycle { path });
            }
            if stack.len() >= self.inner.max_depth {
                return Err(GraphError::DepthExceeded {
                    limit: self.inner.max_depth,
                    node: id,
                });
            }
            stack.push(id);
        }
        self.inner.tracer.on_recompute(id, kind);
        Ok(Frame { graph: &self.inner })
    }

    /// Current nesting of recomputations. Zero outside a propagation pass.
    pub fn depth(&self) -> usize {
        self.inner.stack.borrow().len()
    }
}

/// An active recomputation; pops the propagation stack when dropped.
pub(crate) struct Frame<'a> {
    graph: &'a GraphInner,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.graph.stack.borrow_mut().pop();
    }
}

/// Builder for creating a [`Graph`] with custom settings.
///
/// # Example
///
/// ```
/// use scene_flow::Graph;
///
/// // Disable re-entry detection and rely on the depth limit alone.
/// let graph = Graph::builder().detect_cycles(false).max_depth(32).build();
/// assert_eq!(graph.max_depth(), 32);
/// ```
pub struct GraphBuilder {
    max_depth: usize,
    detect_cycles: bool,
    tracer: Box<dyn Tracer>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            detect_cycles: true,
            tracer: Box::new(NoopTracer),
        }
    }

    /// Set the maximum nesting of recomputations in one propagation pass.
    ///
    /// Deeper passes fail with [`GraphError::DepthExceeded`]. Pass `usize::MAX`
    /// to remove the limit, in which case a cycle with detection disabled
    /// exhausts the stack.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Enable or disable re-entry detection.
    ///
    /// When enabled, recomputing a node that is already recomputing higher up
    /// the same pass fails with [`GraphError::Cycle`]. When disabled, a pool
    /// re-entered from its own factory or child callbacks fails with
    /// [`GraphError::Reentered`], and other cycles run into the depth limit.
    pub fn detect_cycles(mut self, detect_cycles: bool) -> Self {
        self.detect_cycles = detect_cycles;
        self
    }

    /// Set the tracer that observes propagation.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Build the graph with the configured settings.
    pub fn build(self) -> Graph {
        Graph {
            inner: Rc::new(GraphInner {
                registry: RefCell::new(Slab::new()),
                stack: RefCell::new(Vec::new()),
                max_depth: self.max_depth,
                detect_cycles: self.detect_cycles,
                tracer: self.tracer,
            }),
        }
    }
}
