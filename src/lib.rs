#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod array;
mod error;
mod graph;
mod node;
mod pool;
mod scene;
pub mod tracer;

pub use array::{AggregateNode, ArrayNode};
pub use error::GraphError;
pub use graph::{Graph, GraphBuilder, NodeId, NodeKind, NodeRecord, DEFAULT_MAX_DEPTH};
pub use node::{Dependent, Node, Param, Params};
pub use pool::{ArrayParams, ChildFactory, Pool, PooledChild};
pub use scene::{Draggable, Position, PositionBinding};
pub use tracer::{EventCollector, GraphEvent, NoopTracer, Tracer};

#[cfg(feature = "tracing")]
pub use tracer::TracingTracer;
