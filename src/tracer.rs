//! Tracer trait for observing propagation passes.
//!
//! This module defines the [`Tracer`] trait and related types for observing
//! how a change travels through the graph. The default [`NoopTracer`] costs
//! nothing when tracing is not needed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use scene_flow::{EventCollector, Graph, GraphEvent};
//!
//! let collector = Arc::new(EventCollector::new());
//! let graph = Graph::builder().tracer(collector.clone()).build();
//!
//! let x = graph.value(2);
//! x.recompute().unwrap();
//!
//! assert!(matches!(collector.events()[0], GraphEvent::Recompute { .. }));
//! ```

use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::{NodeId, NodeKind};

/// Tracer trait for observing propagation.
///
/// All methods have default empty implementations, so you only need to override
/// the events you're interested in.
pub trait Tracer: 'static {
    /// Called when a node or container starts recomputing.
    #[inline]
    fn on_recompute(&self, _node: NodeId, _kind: NodeKind) {}

    /// Called when a recomputed node is absent, so its dependents do not fire.
    #[inline]
    fn on_gated(&self, _node: NodeId) {}

    /// Called before a present node notifies its dependents.
    #[inline]
    fn on_notify(&self, _node: NodeId, _dependents: usize) {}

    /// Called when an array node grows a per-index projection.
    #[inline]
    fn on_projection_created(&self, _array: NodeId, _index: usize, _projection: NodeId) {}

    /// Called when a pool's arity differs from the previous recomputation.
    #[inline]
    fn on_arity_changed(&self, _pool: NodeId, _previous: usize, _arity: usize) {}

    /// Called when a pool instantiates a new child.
    #[inline]
    fn on_child_instantiated(&self, _pool: NodeId, _index: usize) {}

    /// Called when an existing pooled child is shown or hidden.
    #[inline]
    fn on_visibility_changed(&self, _pool: NodeId, _index: usize, _visible: bool) {}

    /// Called when a recomputation re-enters a node already on the stack.
    #[inline]
    fn on_cycle_detected(&self, _path: &[NodeId]) {}
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer for [`Graph`](crate::Graph).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

impl<T: Tracer + ?Sized> Tracer for Arc<T> {
    fn on_recompute(&self, node: NodeId, kind: NodeKind) {
        (**self).on_recompute(node, kind)
    }

    fn on_gated(&self, node: NodeId) {
        (**self).on_gated(node)
    }

    fn on_notify(&self, node: NodeId, dependents: usize) {
        (**self).on_notify(node, dependents)
    }

    fn on_projection_created(&self, array: NodeId, index: usize, projection: NodeId) {
        (**self).on_projection_created(array, index, projection)
    }

    fn on_arity_changed(&self, pool: NodeId, previous: usize, arity: usize) {
        (**self).on_arity_changed(pool, previous, arity)
    }

    fn on_child_instantiated(&self, pool: NodeId, index: usize) {
        (**self).on_child_instantiated(pool, index)
    }

    fn on_visibility_changed(&self, pool: NodeId, index: usize, visible: bool) {
        (**self).on_visibility_changed(pool, index, visible)
    }

    fn on_cycle_detected(&self, path: &[NodeId]) {
        (**self).on_cycle_detected(path)
    }
}

impl<T: Tracer + ?Sized> Tracer for Rc<T> {
    fn on_recompute(&self, node: NodeId, kind: NodeKind) {
        (**self).on_recompute(node, kind)
    }

    fn on_gated(&self, node: NodeId) {
        (**self).on_gated(node)
    }

    fn on_notify(&self, node: NodeId, dependents: usize) {
        (**self).on_notify(node, dependents)
    }

    fn on_projection_created(&self, array: NodeId, index: usize, projection: NodeId) {
        (**self).on_projection_created(array, index, projection)
    }

    fn on_arity_changed(&self, pool: NodeId, previous: usize, arity: usize) {
        (**self).on_arity_changed(pool, previous, arity)
    }

    fn on_child_instantiated(&self, pool: NodeId, index: usize) {
        (**self).on_child_instantiated(pool, index)
    }

    fn on_visibility_changed(&self, pool: NodeId, index: usize, visible: bool) {
        (**self).on_visibility_changed(pool, index, visible)
    }

    fn on_cycle_detected(&self, path: &[NodeId]) {
        (**self).on_cycle_detected(path)
    }
}

/// A recorded propagation event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GraphEvent {
    /// A node or container started recomputing.
    Recompute {
        /// The recomputed node.
        node: NodeId,
        /// What kind of node it is.
        kind: NodeKind,
    },
    /// A node was absent after recomputing; no dependents fired.
    Gated {
        /// The absent node.
        node: NodeId,
    },
    /// A node notified its dependents.
    Notify {
        /// The notifying node.
        node: NodeId,
        /// Number of dependents called.
        dependents: usize,
    },
    /// An array node grew a projection.
    ProjectionCreated {
        /// The array node.
        array: NodeId,
        /// Index the projection selects.
        index: usize,
        /// The new projection node.
        projection: NodeId,
    },
    /// A pool's arity changed.
    ArityChanged {
        /// The pool.
        pool: NodeId,
        /// Arity before the recomputation.
        previous: usize,
        /// Arity after the recomputation.
        arity: usize,
    },
    /// A pool created a child.
    ChildInstantiated {
        /// The pool.
        pool: NodeId,
        /// Index of the child.
        index: usize,
    },
    /// A pooled child was shown or hidden.
    VisibilityChanged {
        /// The pool.
        pool: NodeId,
        /// Index of the child.
        index: usize,
        /// New visibility.
        visible: bool,
    },
    /// A cycle was detected.
    CycleDetected {
        /// Active recomputations, ending with the re-entered node.
        path: Vec<NodeId>,
    },
}

/// Event collector for testing - accumulates events for assertions.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<GraphEvent>>,
}

impl EventCollector {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, event: GraphEvent) {
        self.events.lock().push(event);
    }
}

impl Tracer for EventCollector {
    fn on_recompute(&self, node: NodeId, kind: NodeKind) {
        self.push(GraphEvent::Recompute { node, kind });
    }

    fn on_gated(&self, node: NodeId) {
        self.push(GraphEvent::Gated { node });
    }

    fn on_notify(&self, node: NodeId, dependents: usize) {
        self.push(GraphEvent::Notify { node, dependents });
    }

    fn on_projection_created(&self, array: NodeId, index: usize, projection: NodeId) {
        self.push(GraphEvent::ProjectionCreated {
            array,
            index,
            projection,
        });
    }

    fn on_arity_changed(&self, pool: NodeId, previous: usize, arity: usize) {
        self.push(GraphEvent::ArityChanged {
            pool,
            previous,
            arity,
        });
    }

    fn on_child_instantiated(&self, pool: NodeId, index: usize) {
        self.push(GraphEvent::ChildInstantiated { pool, index });
    }

    fn on_visibility_changed(&self, pool: NodeId, index: usize, visible: bool) {
        self.push(GraphEvent::VisibilityChanged {
            pool,
            index,
            visible,
        });
    }

    fn on_cycle_detected(&self, path: &[NodeId]) {
        self.push(GraphEvent::CycleDetected {
            path: path.to_vec(),
        });
    }
}

/// Tracer that forwards events to the `tracing` crate.
#[cfg(feature = "tracing")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

#[cfg(feature = "tracing")]
impl Tracer for TracingTracer {
    fn on_recompute(&self, node: NodeId, kind: NodeKind) {
        tracing::trace!(%node, ?kind, "recompute");
    }

    fn on_gated(&self, node: NodeId) {
        tracing::trace!(%node, "value absent, propagation gated");
    }

    fn on_notify(&self, node: NodeId, dependents: usize) {
        tracing::trace!(%node, dependents, "notify dependents");
    }

    fn on_projection_created(&self, array: NodeId, index: usize, projection: NodeId) {
        tracing::debug!(%array, index, %projection, "projection created");
    }

    fn on_arity_changed(&self, pool: NodeId, previous: usize, arity: usize) {
        tracing::debug!(%pool, previous, arity, "arity changed");
    }

    fn on_child_instantiated(&self, pool: NodeId, index: usize) {
        tracing::debug!(%pool, index, "child instantiated");
    }

    fn on_visibility_changed(&self, pool: NodeId, index: usize, visible: bool) {
        tracing::trace!(%pool, index, visible, "child visibility changed");
    }

    fn on_cycle_detected(&self, path: &[NodeId]) {
        tracing::warn!(?path, "dependency cycle detected");
    }
}
