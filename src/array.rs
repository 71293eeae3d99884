//! Array projection and aggregate nodes.

use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{Graph, NodeId, NodeKind};
use crate::node::{Dependent, Node, Param};
use crate::GraphError;

/// A sequence-valued node that grows one projection node per index.
///
/// Its value is a `Vec<Option<T>>`; a `None` element is a hole. Projection
/// `i` is a node holding element `i` of the current sequence. Projections are
/// appended the first time a recomputation sees a sequence longer than the
/// projection list, holes included, and are never removed.
///
/// Growth is the array node's first dependent, so it always runs before any
/// other dependent of the same pass. Each new projection is recomputed once
/// on creation; from the next pass on it updates like any other dependent.
///
/// # Example
///
/// ```
/// use scene_flow::Graph;
///
/// let graph = Graph::new();
/// let count = graph.value(2_usize);
/// let squares = graph.array((count.clone(),), |(n,)| (0..n).map(|i| i * i).collect());
///
/// count.recompute().unwrap();
/// assert_eq!(squares.projection_count(), 2);
///
/// count.set(3);
/// count.recompute().unwrap();
/// assert_eq!(squares.projection(2).unwrap().current_value(), Some(4));
/// ```
pub struct ArrayNode<T> {
    node: Node<Vec<Option<T>>>,
    projections: Rc<RefCell<Vec<Node<T>>>>,
}

impl<T> Clone for ArrayNode<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            projections: self.projections.clone(),
        }
    }
}

impl<T: Clone + 'static> ArrayNode<T> {
    pub(crate) fn wrap(node: Node<Vec<Option<T>>>) -> Self {
        let array = Self {
            node,
            projections: Rc::new(RefCell::new(Vec::new())),
        };
        let node = array.node.downgrade();
        let projections = Rc::downgrade(&array.projections);
        array.node.subscribe(Rc::new(move || {
            match (node.upgrade(), projections.upgrade()) {
                (Some(node), Some(projections)) => Self { node, projections }.grow(),
                _ => Ok(()),
            }
        }));
        array
    }

    /// The underlying sequence-valued node.
    pub fn node(&self) -> &Node<Vec<Option<T>>> {
        &self.node
    }

    /// The id of the underlying node.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The current sequence, without recomputing.
    pub fn current_value(&self) -> Option<Vec<Option<T>>> {
        self.node.current_value()
    }

    /// Recompute the sequence, grow projections, then notify dependents.
    pub fn recompute(&self) -> Result<(), GraphError> {
        self.node.recompute()
    }

    /// Append a callback to run after each propagation of this array.
    pub fn register_dependent(
        &self,
        dependent: impl Fn() -> Result<(), GraphError> + 'static,
    ) -> &Self {
        self.node.register_dependent(dependent);
        self
    }

    /// Length of the current sequence up to its first hole.
    ///
    /// Zero while the array has no value.
    pub fn valid_len(&self) -> usize {
        self.node.with_value(|sequence| {
            sequence.map_or(0, |sequence| {
                sequence
                    .iter()
                    .position(Option::is_none)
                    .unwrap_or(sequence.len())
            })
        })
    }

    /// The projection node for `index`, if it has been created.
    pub fn projection(&self, index: usize) -> Option<Node<T>> {
        self.projections.borrow().get(index).cloned()
    }

    /// All projection nodes created so far.
    pub fn projections(&self) -> Vec<Node<T>> {
        self.projections.borrow().clone()
    }

    /// Number of projection nodes created so far. Never decreases.
    pub fn projection_count(&self) -> usize {
        self.projections.borrow().len()
    }

    /// Create projections up to the current sequence length.
    pub(crate) fn grow(&self) -> Result<(), GraphError> {
        let len = self.node.with_value(|sequence| sequence.map_or(0, Vec::len));
        loop {
            let index = self.projections.borrow().len();
            if index >= len {
                return Ok(());
            }
            let projection = self.project(index);
            self.projections.borrow_mut().push(projection.clone());
            self.node
                .graph()
                .tracer()
                .on_projection_created(self.id(), index, projection.id());
            projection.recompute()?;
        }
    }

    fn project(&self, index: usize) -> Node<T> {
        let array = self.node.downgrade();
        let projection = Node::computed(
            self.node.graph(),
            NodeKind::Projection { index },
            vec![self.id()],
            Box::new(move || {
                Ok(array.upgrade().and_then(|array| {
                    array.with_value(|sequence| {
                        sequence.and_then(|sequence| sequence.get(index).cloned().flatten())
                    })
                }))
            }),
        );
        self.node.subscribe(projection.recompute_hook());
        projection
    }
}

impl<T: Clone + 'static> Param for ArrayNode<T> {
    type Value = Vec<Option<T>>;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn value(&self) -> Option<Self::Value> {
        self.current_value()
    }

    fn subscribe(&self, dependent: Dependent) {
        self.node.subscribe(dependent)
    }
}

/// Collects several independent source nodes into one sequence.
///
/// Element `i` of the value is the current value of source `i`, `None` while
/// that source is absent. An aggregate is always present itself.
pub struct AggregateNode<T> {
    node: Node<Vec<Option<T>>>,
    sources: Rc<[Node<T>]>,
}

impl<T> Clone for AggregateNode<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            sources: self.sources.clone(),
        }
    }
}

impl<T: Clone + 'static> AggregateNode<T> {
    pub(crate) fn new(graph: &Graph, sources: Vec<Node<T>>) -> Self {
        let sources: Rc<[Node<T>]> = sources.into();
        let collected = sources.clone();
        let node = Node::computed(
            graph,
            NodeKind::Aggregate,
            sources.iter().map(Node::id).collect(),
            Box::new(move || Ok(Some(collected.iter().map(Node::current_value).collect()))),
        );
        let hook = node.recompute_hook();
        for source in sources.iter() {
            source.subscribe(hook.clone());
        }
        Self { node, sources }
    }

    /// The underlying sequence-valued node.
    pub fn node(&self) -> &Node<Vec<Option<T>>> {
        &self.node
    }

    /// The id of the underlying node.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The source nodes, in construction order.
    pub fn sources(&self) -> &[Node<T>] {
        &self.sources
    }

    /// The source node at `index`.
    pub fn source(&self, index: usize) -> Option<&Node<T>> {
        self.sources.get(index)
    }

    /// The current sequence, without recomputing.
    pub fn current_value(&self) -> Option<Vec<Option<T>>> {
        self.node.current_value()
    }

    /// Re-collect the sources' values and notify dependents.
    pub fn recompute(&self) -> Result<(), GraphError> {
        self.node.recompute()
    }
}

impl<T: Clone + 'static> Param for AggregateNode<T> {
    type Value = Vec<Option<T>>;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn value(&self) -> Option<Self::Value> {
        self.current_value()
    }

    fn subscribe(&self, dependent: Dependent) {
        self.node.subscribe(dependent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventCollector, GraphEvent};
    use std::sync::Arc;

    #[test]
    fn test_projections_grow_with_sequence() {
        let graph = Graph::new();
        let items = graph.value(vec!['a', 'b']);
        let array = graph.array((items.clone(),), |(items,)| items);

        items.recompute().unwrap();
        assert_eq!(array.projection_count(), 2);

        items.set(vec!['a', 'b', 'c']);
        items.recompute().unwrap();
        assert_eq!(array.projection_count(), 3);
        assert_eq!(array.projection(2).unwrap().current_value(), Some('c'));
    }

    #[test]
    fn test_projections_never_shrink() {
        let graph = Graph::new();
        let len = graph.value(4_usize);
        let array = graph.array((len.clone(),), |(n,)| vec![1.5_f32; n]);

        len.recompute().unwrap();
        let third = array.projection(3).unwrap();

        len.set(1);
        len.recompute().unwrap();
        assert_eq!(array.projection_count(), 4);
        assert_eq!(third.current_value(), None);
        assert_eq!(array.projection(3).unwrap().id(), third.id());
    }

    #[test]
    fn test_projection_updates_on_next_pass() {
        let graph = Graph::new();
        let offset = graph.value(10);
        let array = graph.array((offset.clone(),), |(offset,)| vec![offset, offset + 1]);

        offset.recompute().unwrap();
        let second = array.projection(1).unwrap();
        assert_eq!(second.current_value(), Some(11));

        offset.set(20);
        offset.recompute().unwrap();
        assert_eq!(second.current_value(), Some(21));
    }

    #[test]
    fn test_holes_bound_valid_len() {
        let graph = Graph::new();
        let a = graph.value(1);
        let b = graph.empty::<i32>();
        let c = graph.value(3);
        let points = graph.aggregate(vec![a.clone(), b.clone(), c.clone()]);
        let array = graph.sparse_array((points.clone(),), |(points,)| points);

        a.recompute().unwrap();
        assert_eq!(points.current_value(), Some(vec![Some(1), None, Some(3)]));
        assert_eq!(array.valid_len(), 1);
        assert_eq!(array.projection_count(), 3);
        assert_eq!(array.projection(1).unwrap().current_value(), None);

        b.set(2);
        b.recompute().unwrap();
        assert_eq!(array.valid_len(), 3);
    }

    #[test]
    fn test_growth_precedes_other_dependents() {
        let graph = Graph::new();
        let len = graph.value(1_usize);
        let array = graph.array((len.clone(),), |(n,)| (0..n).collect());
        let observed = Rc::new(RefCell::new(Vec::new()));
        let probe = array.clone();
        let seen = observed.clone();
        array.register_dependent(move || {
            seen.borrow_mut().push(probe.projection_count());
            Ok(())
        });

        len.recompute().unwrap();
        len.set(5);
        len.recompute().unwrap();
        assert_eq!(*observed.borrow(), vec![1, 5]);
    }

    #[test]
    fn test_projection_events() {
        let collector = Arc::new(EventCollector::new());
        let graph = Graph::builder().tracer(collector.clone()).build();
        let len = graph.value(2_usize);
        let array = graph.array((len.clone(),), |(n,)| vec![0_u8; n]);

        len.recompute().unwrap();
        let created: Vec<usize> = collector
            .events()
            .into_iter()
            .filter_map(|event| match event {
                GraphEvent::ProjectionCreated { array: id, index, .. } if id == array.id() => {
                    Some(index)
                }
                _ => None,
            })
            .collect();
        assert_eq!(created, vec![0, 1]);
    }

    #[test]
    fn test_aggregate_sources() {
        let graph = Graph::new();
        let sources = vec![graph.value([0.0_f32; 3]), graph.value([1.0, 0.0, 0.0])];
        let aggregate = graph.aggregate(sources);

        aggregate.source(1).unwrap().set([2.0, 0.0, 0.0]);
        aggregate.source(1).unwrap().recompute().unwrap();
        assert_eq!(
            aggregate.current_value(),
            Some(vec![Some([0.0; 3]), Some([2.0, 0.0, 0.0])])
        );
        assert_eq!(aggregate.sources().len(), 2);
    }
}
