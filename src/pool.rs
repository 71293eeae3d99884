//! Pooling container for child entities driven by array nodes.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::array::ArrayNode;
use crate::graph::{Graph, NodeId, NodeKind};
use crate::node::{Dependent, Node};
use crate::scene::{Draggable, Position};
use crate::GraphError;

/// A child entity owned by a [`Pool`].
///
/// Children are never destroyed by their pool; falling outside the arity only
/// hides them.
pub trait PooledChild {
    /// Show or hide the child.
    fn set_visible(&mut self, visible: bool);

    /// Whether the child is currently shown.
    fn is_visible(&self) -> bool;

    /// The child's drag capability, if it can be dragged.
    fn drag_target(&self) -> Option<Rc<dyn Draggable>> {
        None
    }
}

/// Strategy that builds the child for one index of a [`Pool`].
///
/// # Example
///
/// ```
/// use scene_flow::{ArrayNode, ChildFactory, GraphError, Node, PooledChild};
///
/// struct Label {
///     text: Node<String>,
///     visible: bool,
/// }
///
/// impl PooledChild for Label {
///     fn set_visible(&mut self, visible: bool) {
///         self.visible = visible;
///     }
///
///     fn is_visible(&self) -> bool {
///         self.visible
///     }
/// }
///
/// struct Labels;
///
/// impl ChildFactory<ArrayNode<String>> for Labels {
///     type Child = Label;
///
///     fn create_child(&mut self, _index: usize, text: Node<String>) -> Result<Label, GraphError> {
///         Ok(Label { text, visible: false })
///     }
/// }
/// ```
pub trait ChildFactory<P: ArrayParams>: 'static {
    /// The child entity type.
    type Child: PooledChild + 'static;

    /// Build the child for `index`, wired to the projections for that index.
    ///
    /// An error aborts the pool's recomputation; no child is added for `index`.
    fn create_child(
        &mut self,
        index: usize,
        projections: P::Projections,
    ) -> Result<Self::Child, GraphError>;
}

/// The array parameters of a [`Pool`].
///
/// Implemented for a single [`ArrayNode`], tuples of up to three array nodes,
/// and `Vec<ArrayNode<T>>`.
pub trait ArrayParams: Clone + 'static {
    /// One projection node per parameter, for a single index.
    type Projections;

    /// Ids of the array nodes, in order.
    fn node_ids(&self) -> Vec<NodeId>;

    /// Valid length of each array: up to its first hole, and never beyond the
    /// projections it has grown.
    fn valid_lens(&self) -> Vec<usize>;

    /// Grow every array's projections up to its current length.
    fn grow(&self) -> Result<(), GraphError>;

    /// The projections for `index`, if every array has grown one.
    fn projections_at(&self, index: usize) -> Option<Self::Projections>;

    /// Register `dependent` with every array once.
    fn subscribe(&self, dependent: &Dependent);

    /// The shortest valid length, or zero with no parameters.
    fn arity(&self) -> usize {
        self.valid_lens().into_iter().min().unwrap_or(0)
    }
}

fn pool_len<T: Clone + 'static>(array: &ArrayNode<T>) -> usize {
    array.valid_len().min(array.projection_count())
}

impl<T: Clone + 'static> ArrayParams for ArrayNode<T> {
    type Projections = Node<T>;

    fn node_ids(&self) -> Vec<NodeId> {
        vec![self.id()]
    }

    fn valid_lens(&self) -> Vec<usize> {
        vec![pool_len(self)]
    }

    fn grow(&self) -> Result<(), GraphError> {
        ArrayNode::grow(self)
    }

    fn projections_at(&self, index: usize) -> Option<Node<T>> {
        self.projection(index)
    }

    fn subscribe(&self, dependent: &Dependent) {
        self.node().subscribe(dependent.clone());
    }
}

macro_rules! impl_array_params_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Clone + 'static),+> ArrayParams for ($(ArrayNode<$name>,)+) {
            type Projections = ($(Node<$name>,)+);

            fn node_ids(&self) -> Vec<NodeId> {
                vec![$(self.$idx.id()),+]
            }

            fn valid_lens(&self) -> Vec<usize> {
                vec![$(pool_len(&self.$idx)),+]
            }

            fn grow(&self) -> Result<(), GraphError> {
                $(self.$idx.grow()?;)+
                Ok(())
            }

            fn projections_at(&self, index: usize) -> Option<Self::Projections> {
                Some(($(self.$idx.projection(index)?,)+))
            }

            fn subscribe(&self, dependent: &Dependent) {
                $(self.$idx.node().subscribe(dependent.clone());)+
            }
        }
    };
}

impl_array_params_tuple!(A 0);
impl_array_params_tuple!(A 0, B 1);
impl_array_params_tuple!(A 0, B 1, C 2);

impl<T: Clone + 'static> ArrayParams for Vec<ArrayNode<T>> {
    type Projections = Vec<Node<T>>;

    fn node_ids(&self) -> Vec<NodeId> {
        self.iter().map(ArrayNode::id).collect()
    }

    fn valid_lens(&self) -> Vec<usize> {
        self.iter().map(pool_len).collect()
    }

    fn grow(&self) -> Result<(), GraphError> {
        self.iter().try_for_each(ArrayNode::grow)
    }

    fn projections_at(&self, index: usize) -> Option<Vec<Node<T>>> {
        self.iter().map(|array| array.projection(index)).collect()
    }

    fn subscribe(&self, dependent: &Dependent) {
        for array in self {
            array.node().subscribe(dependent.clone());
        }
    }
}

struct PoolInner<P: ArrayParams, F: ChildFactory<P>> {
    id: NodeId,
    graph: Graph,
    params: P,
    factory: RefCell<F>,
    children: RefCell<Vec<F::Child>>,
    arity: Cell<usize>,
}

impl<P: ArrayParams, F: ChildFactory<P>> Drop for PoolInner<P, F> {
    fn drop(&mut self) {
        self.graph.release(self.id);
    }
}

/// A composite entity whose children track the length of array data.
///
/// The pool's *arity* is the shortest valid length among its array parameters.
/// Children below the arity are visible; the rest are hidden. A child is built
/// through the [`ChildFactory`] the first time its index falls below the arity
/// and is kept, with a stable identity, for the pool's lifetime.
///
/// The pool recomputes whenever one of its arrays propagates. Child callbacks
/// run while the pool holds its child list, so they must not call back into
/// the pool.
pub struct Pool<P: ArrayParams, F: ChildFactory<P>> {
    inner: Rc<PoolInner<P, F>>,
}

impl<P: ArrayParams, F: ChildFactory<P>> Clone for Pool<P, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: ArrayParams, F: ChildFactory<P>> fmt::Debug for Pool<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("arity", &self.arity())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<P: ArrayParams, F: ChildFactory<P>> Pool<P, F> {
    pub(crate) fn new(graph: &Graph, params: P, factory: F) -> Self {
        let id = graph.register(NodeKind::Pool, params.node_ids());
        let pool = Self {
            inner: Rc::new(PoolInner {
                id,
                graph: graph.clone(),
                params,
                factory: RefCell::new(factory),
                children: RefCell::new(Vec::new()),
                arity: Cell::new(0),
            }),
        };
        let weak = Rc::downgrade(&pool.inner);
        let hook: Dependent = Rc::new(move || match weak.upgrade() {
            Some(inner) => Pool { inner }.recompute(),
            None => Ok(()),
        });
        pool.inner.params.subscribe(&hook);
        pool
    }

    /// The id of this pool in its graph.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The array parameters.
    pub fn params(&self) -> &P {
        &self.inner.params
    }

    /// Arity as of the last recomputation.
    pub fn arity(&self) -> usize {
        self.inner.arity.get()
    }

    /// Number of children ever created. Never decreases.
    pub fn capacity(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Whether the child at `index` is visible, `None` if it was never created.
    pub fn is_visible(&self, index: usize) -> Option<bool> {
        self.inner
            .children
            .borrow()
            .get(index)
            .map(PooledChild::is_visible)
    }

    /// Indices of the visible children.
    pub fn visible_indices(&self) -> Vec<usize> {
        self.inner
            .children
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_visible())
            .map(|(index, _)| index)
            .collect()
    }

    /// Borrow the child at `index`.
    pub fn with_child<R>(&self, index: usize, f: impl FnOnce(&F::Child) -> R) -> Option<R> {
        self.inner.children.borrow().get(index).map(f)
    }

    /// Mutably borrow the child at `index`.
    pub fn with_child_mut<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut F::Child) -> R,
    ) -> Option<R> {
        self.inner.children.borrow_mut().get_mut(index).map(f)
    }

    /// Drag targets of the visible children, by index.
    pub fn drag_targets(&self) -> Vec<(usize, Rc<dyn Draggable>)> {
        self.inner
            .children
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_visible())
            .filter_map(|(index, child)| child.drag_target().map(|target| (index, target)))
            .collect()
    }

    /// Drag the child at `index` to `position`.
    ///
    /// Returns `Ok(false)` without doing anything when the child does not
    /// exist, is hidden or cannot be dragged.
    pub fn drag(&self, index: usize, position: Position) -> Result<bool, GraphError> {
        let target = {
            let children = self.inner.children.borrow();
            children
                .get(index)
                .filter(|child| child.is_visible())
                .and_then(PooledChild::drag_target)
        };
        match target {
            Some(target) => target.drag_to(position).map(|()| true),
            None => Ok(false),
        }
    }

    /// Recompute the arity and synchronize the children with it.
    ///
    /// Existing children below the arity are shown, missing ones are created
    /// through the factory, and children at or above the arity are hidden.
    /// Recomputing twice without an intervening change yields the same arity
    /// and visibility.
    ///
    /// # Errors
    ///
    /// - [`GraphError::Cycle`] if the pool is already recomputing in this pass
    /// - [`GraphError::DepthExceeded`] past the configured depth limit
    /// - [`GraphError::Reentered`] if a child callback or the factory triggers
    ///   this recomputation while cycle detection is disabled
    /// - any error returned by the factory or by growing projections
    pub fn recompute(&self) -> Result<(), GraphError> {
        let inner = &self.inner;
        let _frame = inner.graph.enter(inner.id, NodeKind::Pool)?;
        let tracer = inner.graph.tracer();

        inner.params.grow()?;
        let arity = inner.params.arity();
        let previous = inner.arity.get();
        if previous != arity {
            tracer.on_arity_changed(inner.id, previous, arity);
        }

        let capacity = self.children()?.len();
        for index in 0..arity.min(capacity) {
            self.show(index, true)?;
        }
        for index in capacity..arity {
            // Every index below the arity has a projection in every array.
            let Some(projections) = inner.params.projections_at(index) else {
                break;
            };
            let mut child = {
                let mut factory = inner
                    .factory
                    .try_borrow_mut()
                    .map_err(|_| self.reentered())?;
                factory.create_child(index, projections)?
            };
            child.set_visible(true);
            self.children_mut()?.push(child);
            tracer.on_child_instantiated(inner.id, index);
        }
        for index in arity..capacity {
            self.show(index, false)?;
        }

        inner.arity.set(arity);
        Ok(())
    }

    fn show(&self, index: usize, visible: bool) -> Result<(), GraphError> {
        let mut children = self.children_mut()?;
        let Some(child) = children.get_mut(index) else {
            return Ok(());
        };
        let changed = child.is_visible() != visible;
        child.set_visible(visible);
        drop(children);
        if changed {
            self.inner
                .graph
                .tracer()
                .on_visibility_changed(self.inner.id, index, visible);
        }
        Ok(())
    }

    fn children(&self) -> Result<Ref<'_, Vec<F::Child>>, GraphError> {
        self.inner
            .children
            .try_borrow()
            .map_err(|_| self.reentered())
    }

    fn children_mut(&self) -> Result<RefMut<'_, Vec<F::Child>>, GraphError> {
        self.inner
            .children
            .try_borrow_mut()
            .map_err(|_| self.reentered())
    }

    fn reentered(&self) -> GraphError {
        GraphError::Reentered {
            node: self.inner.id,
        }
    }
}
