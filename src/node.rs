//! Value and derived nodes.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::graph::{Graph, NodeId, NodeKind};
use crate::GraphError;

/// A callback fired when a node it is registered with propagates.
pub type Dependent = Rc<dyn Fn() -> Result<(), GraphError>>;

type Compute<T> = Box<dyn Fn() -> Result<Option<T>, GraphError>>;
type Gate<T> = Rc<dyn Fn(&T) -> bool>;

struct NodeInner<T> {
    id: NodeId,
    kind: NodeKind,
    graph: Graph,
    /// `None` for fixed-value nodes.
    compute: Option<Compute<T>>,
    value: RefCell<Option<T>>,
    gate: RefCell<Option<Gate<T>>>,
    dependents: RefCell<Vec<Dependent>>,
}

impl<T> Drop for NodeInner<T> {
    fn drop(&mut self) {
        self.graph.release(self.id);
    }
}

/// A reactive value: either fixed or produced by a function, plus the
/// callbacks to run when it changes.
///
/// Node is a handle; clones share the same value and dependents. A node keeps
/// its parameters alive, while the dependents registered by other nodes only
/// hold those nodes weakly.
///
/// # Propagation gate
///
/// A node is *present* when it holds a value and its gate, if any, accepts that
/// value. [`Node::recompute`] only notifies dependents of present nodes. Without
/// a gate, every value is present, including `0`, `""` and empty vectors.
pub struct Node<T> {
    inner: Rc<NodeInner<T>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("value", &*self.inner.value.borrow())
            .field("dependents", &self.inner.dependents.borrow().len())
            .finish()
    }
}

impl<T: Clone + 'static> Node<T> {
    pub(crate) fn fixed(graph: &Graph, value: Option<T>) -> Self {
        Self::build(graph, NodeKind::Value, Vec::new(), None, value)
    }

    pub(crate) fn computed(
        graph: &Graph,
        kind: NodeKind,
        dependencies: Vec<NodeId>,
        compute: Compute<T>,
    ) -> Self {
        Self::build(graph, kind, dependencies, Some(compute), None)
    }

    fn build(
        graph: &Graph,
        kind: NodeKind,
        dependencies: Vec<NodeId>,
        compute: Option<Compute<T>>,
        value: Option<T>,
    ) -> Self {
        let id = graph.register(kind, dependencies);
        Self {
            inner: Rc::new(NodeInner {
                id,
                kind,
                graph: graph.clone(),
                compute,
                value: RefCell::new(value),
                gate: RefCell::new(None),
                dependents: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The id of this node in its graph.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// What kind of node this is.
    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    /// The graph this node belongs to.
    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    /// The current value, without recomputing.
    ///
    /// Fixed nodes return their value; computed nodes return the result of the
    /// most recent [`Node::recompute`], or `None` before the first one.
    pub fn current_value(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.inner.value.borrow().as_ref())
    }

    /// Whether the current value passes the propagation gate.
    pub fn is_present(&self) -> bool {
        let value = self.inner.value.borrow();
        match (value.as_ref(), self.inner.gate.borrow().as_ref()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(value), Some(gate)) => gate(value),
        }
    }

    /// Install a gate: only values accepted by `predicate` propagate.
    ///
    /// ```
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    /// use scene_flow::Graph;
    ///
    /// let graph = Graph::new();
    /// let count = graph.value(0_u32);
    /// count.gate(|n| *n > 0);
    ///
    /// let fired = Rc::new(Cell::new(0));
    /// let seen = fired.clone();
    /// count.register_dependent(move || {
    ///     seen.set(seen.get() + 1);
    ///     Ok(())
    /// });
    ///
    /// count.recompute().unwrap();
    /// assert_eq!(fired.get(), 0);
    /// count.set(2);
    /// count.recompute().unwrap();
    /// assert_eq!(fired.get(), 1);
    /// ```
    pub fn gate(&self, predicate: impl Fn(&T) -> bool + 'static) -> &Self {
        *self.inner.gate.borrow_mut() = Some(Rc::new(predicate));
        self
    }

    /// Replace the value.
    ///
    /// On a fixed node this is the new fixed value. On a computed node it
    /// overrides the cached value until the next recomputation. Nothing
    /// propagates until [`Node::recompute`] is called.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = Some(value);
    }

    /// Make the node absent. Nothing propagates until [`Node::recompute`].
    pub fn clear(&self) {
        *self.inner.value.borrow_mut() = None;
    }

    /// Append a callback to run whenever this node propagates.
    ///
    /// Callbacks run synchronously in registration order. Registration is not
    /// deduplicated, and callbacks are never removed.
    pub fn register_dependent(
        &self,
        dependent: impl Fn() -> Result<(), GraphError> + 'static,
    ) -> &Self {
        self.subscribe(Rc::new(dependent));
        self
    }

    /// Register `dependent`'s recomputation with this node and record the edge.
    ///
    /// Unlike constructor wiring, links can close a cycle; see [`Graph::validate`].
    pub fn link<U: Clone + 'static>(&self, dependent: &Node<U>) -> &Self {
        self.inner.graph.add_dependency(dependent.id(), self.id());
        self.subscribe(dependent.recompute_hook());
        self
    }

    /// Number of registered dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.borrow().len()
    }

    /// Recompute the value and, if it is present, notify every dependent.
    ///
    /// Computed nodes call their producer and cache the result; fixed nodes keep
    /// their value. Dependents registered during this pass first fire on the
    /// next one. A node reachable along several paths recomputes once per path.
    ///
    /// # Errors
    ///
    /// - [`GraphError::Cycle`] if this node is already recomputing in the same pass
    /// - [`GraphError::DepthExceeded`] if the pass nests past the configured limit
    /// - [`GraphError::UserError`] from a failing producer or dependent; the
    ///   remaining dependents of the failing pass do not run
    pub fn recompute(&self) -> Result<(), GraphError> {
        let inner = &self.inner;
        let _frame = inner.graph.enter(inner.id, inner.kind)?;

        if let Some(compute) = &inner.compute {
            let value = compute()?;
            *inner.value.borrow_mut() = value;
        }

        let tracer = inner.graph.tracer();
        if !self.is_present() {
            tracer.on_gated(inner.id);
            return Ok(());
        }

        let dependents = inner.dependents.borrow().clone();
        tracer.on_notify(inner.id, dependents.len());
        for dependent in &dependents {
            dependent()?;
        }
        Ok(())
    }

    pub(crate) fn subscribe(&self, dependent: Dependent) {
        self.inner.dependents.borrow_mut().push(dependent);
    }

    /// A dependent that recomputes this node while it is alive.
    pub(crate) fn recompute_hook(&self) -> Dependent {
        let weak = self.downgrade();
        Rc::new(move || match weak.upgrade() {
            Some(node) => node.recompute(),
            None => Ok(()),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakNode<T> {
        WeakNode {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

pub(crate) struct WeakNode<T> {
    inner: Weak<NodeInner<T>>,
}

impl<T> WeakNode<T> {
    pub(crate) fn upgrade(&self) -> Option<Node<T>> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

/// A single parameter of a derived node.
pub trait Param: Clone + 'static {
    /// The value handed to producers.
    type Value;

    /// Id of the underlying node.
    fn node_id(&self) -> NodeId;

    /// Current value, `None` when absent.
    fn value(&self) -> Option<Self::Value>;

    /// Register a dependent with the underlying node.
    fn subscribe(&self, dependent: Dependent);
}

impl<T: Clone + 'static> Param for Node<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn value(&self) -> Option<T> {
        self.current_value()
    }

    fn subscribe(&self, dependent: Dependent) {
        Node::subscribe(self, dependent)
    }
}

/// The ordered parameter list of a derived node.
///
/// Implemented for tuples of up to four [`Param`]s and for `Vec<Node<T>>`.
pub trait Params: Clone + 'static {
    /// The parameters' values, in order.
    type Values;

    /// Ids of the parameter nodes, in order.
    fn node_ids(&self) -> Vec<NodeId>;

    /// All current values, or `None` if any parameter is absent.
    fn values(&self) -> Option<Self::Values>;

    /// Register `dependent` with every parameter once.
    fn subscribe(&self, dependent: &Dependent);
}

macro_rules! impl_params_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Param),+> Params for ($($name,)+) {
            type Values = ($($name::Value,)+);

            fn node_ids(&self) -> Vec<NodeId> {
                vec![$(self.$idx.node_id()),+]
            }

            fn values(&self) -> Option<Self::Values> {
                Some(($(self.$idx.value()?,)+))
            }

            fn subscribe(&self, dependent: &Dependent) {
                $(self.$idx.subscribe(dependent.clone());)+
            }
        }
    };
}

impl_params_tuple!(A 0);
impl_params_tuple!(A 0, B 1);
impl_params_tuple!(A 0, B 1, C 2);
impl_params_tuple!(A 0, B 1, C 2, D 3);

impl<T: Clone + 'static> Params for Vec<Node<T>> {
    type Values = Vec<T>;

    fn node_ids(&self) -> Vec<NodeId> {
        self.iter().map(Node::id).collect()
    }

    fn values(&self) -> Option<Vec<T>> {
        self.iter().map(Node::current_value).collect()
    }

    fn subscribe(&self, dependent: &Dependent) {
        for node in self {
            node.subscribe(dependent.clone());
        }
    }
}
