//! Boundary types shared with scene construction and input controllers.

use std::rc::Rc;

use crate::node::Node;
use crate::GraphError;

/// A 3D position.
pub type Position = [f32; 3];

/// Something an input controller can drag.
pub trait Draggable {
    /// Move to `position` and propagate the change.
    fn drag_to(&self, position: Position) -> Result<(), GraphError>;
}

/// Binds a position node to a visual, optionally letting drags write back.
///
/// A drag stores the dragged position in the node and runs a propagation pass
/// from it, so every visual depending on the position follows. Non-draggable
/// bindings ignore drags.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use scene_flow::{Draggable, Graph, PositionBinding};
///
/// let graph = Graph::new();
/// let tip = graph.value([0.0, 0.0, 0.0]);
/// let binding = PositionBinding::draggable(tip.clone());
///
/// let mesh_x = Rc::new(Cell::new(0.0));
/// let x = mesh_x.clone();
/// binding.bind(move |[px, _, _]| {
///     x.set(px);
///     Ok(())
/// });
///
/// binding.drag_to([1.5, 0.0, 0.0]).unwrap();
/// assert_eq!(mesh_x.get(), 1.5);
/// assert_eq!(tip.current_value(), Some([1.5, 0.0, 0.0]));
/// ```
#[derive(Clone)]
pub struct PositionBinding {
    node: Node<Position>,
    draggable: bool,
}

impl PositionBinding {
    /// A binding that follows `node` but ignores drags.
    pub fn fixed(node: Node<Position>) -> Self {
        Self {
            node,
            draggable: false,
        }
    }

    /// A binding whose drags write into `node`.
    pub fn draggable(node: Node<Position>) -> Self {
        Self {
            node,
            draggable: true,
        }
    }

    /// The bound position node.
    pub fn node(&self) -> &Node<Position> {
        &self.node
    }

    /// Whether drags write back.
    pub fn is_draggable(&self) -> bool {
        self.draggable
    }

    /// The current position.
    pub fn position(&self) -> Option<Position> {
        self.node.current_value()
    }

    /// Run `apply` with the position each time the node propagates.
    pub fn bind(&self, apply: impl Fn(Position) -> Result<(), GraphError> + 'static) -> &Self {
        let node = self.node.downgrade();
        self.node.register_dependent(move || {
            match node.upgrade().and_then(|node| node.current_value()) {
                Some(position) => apply(position),
                None => Ok(()),
            }
        });
        self
    }

    /// This binding as a shared drag target, if it accepts drags.
    pub fn drag_target(&self) -> Option<Rc<dyn Draggable>> {
        self.draggable
            .then(|| Rc::new(self.clone()) as Rc<dyn Draggable>)
    }
}

impl Draggable for PositionBinding {
    fn drag_to(&self, position: Position) -> Result<(), GraphError> {
        if !self.draggable {
            return Ok(());
        }
        self.node.set(position);
        self.node.recompute()
    }
}
