//! Error types for graph propagation.

use std::fmt;
use std::sync::Arc;

use crate::graph::NodeId;

/// Errors surfaced by a propagation pass.
///
/// User errors can be propagated from producers, dependents and child factories
/// using the `?` operator, which converts any `Into<anyhow::Error>` type into
/// `GraphError::UserError`.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// A recomputation re-entered a node that was already being recomputed.
    ///
    /// The `path` lists the active recomputations, outermost first, ending with
    /// the node that was re-entered.
    Cycle {
        /// Node ids forming the cycle.
        path: Vec<NodeId>,
    },

    /// A propagation pass nested deeper than the configured limit.
    DepthExceeded {
        /// The configured maximum depth.
        limit: usize,
        /// The node whose recomputation would have exceeded the limit.
        node: NodeId,
    },

    /// A pool was recomputed from inside one of its own child callbacks.
    ///
    /// Only reachable with cycle detection disabled; otherwise the re-entry is
    /// reported as [`GraphError::Cycle`].
    Reentered {
        /// The pool whose factory or child was still running.
        node: NodeId,
    },

    /// User-defined error raised by a producer, dependent or child factory.
    UserError(Arc<anyhow::Error>),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Cycle { path } => {
                let path: Vec<String> = path.iter().map(|id| id.to_string()).collect();
                write!(f, "dependency cycle detected: {}", path.join(" -> "))
            }
            GraphError::DepthExceeded { limit, node } => {
                write!(
                    f,
                    "propagation depth limit of {} exceeded at {}",
                    limit, node
                )
            }
            GraphError::Reentered { node } => {
                write!(f, "{} re-entered while its child callbacks were running", node)
            }
            GraphError::UserError(e) => write!(f, "user error: {}", e),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for GraphError {
    fn from(err: T) -> Self {
        GraphError::UserError(Arc::new(err.into()))
    }
}

impl GraphError {
    /// Returns a reference to the inner user error if this is a `UserError` variant.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            GraphError::UserError(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the user error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this error reports a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, GraphError::Cycle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "broken mesh")
        }
    }

    impl std::error::Error for Broken {}

    #[test]
    fn test_user_error_conversion() {
        let err: GraphError = Broken.into();
        assert!(matches!(err, GraphError::UserError(_)));
        assert!(err.downcast_ref::<Broken>().is_some());
        assert_eq!(err.to_string(), "user error: broken mesh");
    }

    #[test]
    fn test_cycle_display() {
        let err = GraphError::Cycle {
            path: vec![NodeId(0), NodeId(2), NodeId(0)],
        };
        assert!(err.is_cycle());
        assert_eq!(
            err.to_string(),
            "dependency cycle detected: #0 -> #2 -> #0"
        );
    }

    #[test]
    fn test_reentered_display() {
        let err = GraphError::Reentered { node: NodeId(7) };
        assert!(!err.is_cycle());
        assert_eq!(
            err.to_string(),
            "#7 re-entered while its child callbacks were running"
        );
    }
}
