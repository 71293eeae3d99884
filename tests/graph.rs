//! Propagation behavior of value, derived, aggregate and array nodes.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use scene_flow::{EventCollector, Graph, GraphError, GraphEvent, NodeKind};

// ============================================================================
// Value and derived nodes
// ============================================================================

#[test]
fn test_derived_completes_before_recompute_returns() {
    let graph = Graph::new();
    let p1 = graph.value(2.0_f64);
    let p2 = graph.value(3.0_f64);
    let d = graph.derived((p1.clone(), p2.clone()), |(a, b)| a.powf(b));

    p1.set(4.0);
    p1.recompute().unwrap();
    assert_eq!(d.current_value(), Some(64.0));
}

#[test]
fn test_chain_propagates_transitively() {
    let graph = Graph::new();
    let celsius = graph.value(100.0_f32);
    let fahrenheit = graph.derived((celsius.clone(),), |(c,)| c * 9.0 / 5.0 + 32.0);
    let label = graph.derived((fahrenheit.clone(),), |(f,)| format!("{f:.0}F"));

    celsius.recompute().unwrap();
    assert_eq!(label.current_value(), Some("212F".to_string()));

    celsius.set(0.0);
    celsius.recompute().unwrap();
    assert_eq!(label.current_value(), Some("32F".to_string()));
}

#[test]
fn test_diamond_recomputes_once_per_path() {
    let graph = Graph::new();
    let a = graph.value(1);
    let b = graph.derived((a.clone(),), |(a,)| a + 1);
    let c = graph.derived((a.clone(),), |(a,)| a * 10);
    let calls = Rc::new(Cell::new(0));
    let counted = calls.clone();
    let d = graph.derived((b.clone(), c.clone()), move |(b, c)| {
        counted.set(counted.get() + 1);
        b + c
    });

    // `c` is still absent while the first pass goes through `b`.
    a.recompute().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(d.current_value(), Some(12));

    a.set(2);
    a.recompute().unwrap();
    assert_eq!(calls.get(), 3);
    assert_eq!(d.current_value(), Some(23));
}

#[test]
fn test_diamond_recompute_events() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let a = graph.value(1);
    let b = graph.derived((a.clone(),), |(a,)| a + 1);
    let c = graph.derived((a.clone(),), |(a,)| a * 10);
    let d = graph.derived((b.clone(), c.clone()), |(b, c)| b + c);

    a.recompute().unwrap();
    collector.clear();
    a.recompute().unwrap();

    let recomputes = |id| {
        collector
            .events()
            .iter()
            .filter(|event| matches!(event, GraphEvent::Recompute { node, .. } if *node == id))
            .count()
    };
    assert_eq!(recomputes(a.id()), 1);
    assert_eq!(recomputes(b.id()), 1);
    assert_eq!(recomputes(c.id()), 1);
    assert_eq!(recomputes(d.id()), 2);
}

#[test]
fn test_producer_error_aborts_pass() {
    let graph = Graph::new();
    let input = graph.value(-1_i32);
    let checked = graph.try_derived((input.clone(),), |(n,)| {
        if n < 0 {
            return Err(anyhow::anyhow!("negative radius {n}").into());
        }
        Ok(n as u32)
    });
    let fired = Rc::new(Cell::new(false));
    let seen = fired.clone();
    input.register_dependent(move || {
        seen.set(true);
        Ok(())
    });

    let err = input.recompute().unwrap_err();
    assert!(matches!(err, GraphError::UserError(_)));
    assert!(err.to_string().contains("negative radius -1"));
    assert!(!fired.get());
    assert_eq!(checked.current_value(), None);
    assert_eq!(graph.depth(), 0);

    input.set(4);
    input.recompute().unwrap();
    assert_eq!(checked.current_value(), Some(4));
}

#[test]
fn test_dependent_error_propagates_with_question_mark() {
    let graph = Graph::new();
    let node = graph.value("mesh.obj".to_string());
    node.register_dependent(|| {
        std::fs::metadata("/definitely/not/a/real/path/mesh.obj")?;
        Ok(())
    });

    let err = node.recompute().unwrap_err();
    assert!(err.downcast_ref::<std::io::Error>().is_some());
}

// ============================================================================
// Cycles and depth
// ============================================================================

#[test]
fn test_linked_cycle_reported_at_runtime() {
    let graph = Graph::new();
    let a = graph.value(1);
    let b = graph.derived((a.clone(),), |(a,)| a + 1);
    b.link(&a);

    match a.recompute() {
        Err(GraphError::Cycle { path }) => assert_eq!(path, vec![a.id(), b.id(), a.id()]),
        other => panic!("expected cycle, got {other:?}"),
    }
    assert_eq!(graph.depth(), 0);
}

#[test]
fn test_callback_cycle_reported() {
    let graph = Graph::new();
    let a = graph.value(1);
    let again = a.clone();
    a.register_dependent(move || again.recompute());

    let err = a.recompute().unwrap_err();
    assert!(err.is_cycle());
}

#[test]
fn test_depth_limit_without_cycle_detection() {
    let graph = Graph::builder().detect_cycles(false).max_depth(16).build();
    let a = graph.value(1);
    let b = graph.derived((a.clone(),), |(a,)| a + 1);
    b.link(&a);

    let err = a.recompute().unwrap_err();
    assert!(matches!(err, GraphError::DepthExceeded { limit: 16, .. }));
}

#[test]
fn test_depth_limit_on_long_chain() {
    let graph = Graph::builder().max_depth(5).build();
    let head = graph.value(0);
    let mut tail = head.clone();
    let mut chain = Vec::new();
    for _ in 0..10 {
        tail = graph.derived((tail.clone(),), |(n,)| n + 1);
        chain.push(tail.clone());
    }

    match head.recompute() {
        Err(GraphError::DepthExceeded { limit, node }) => {
            assert_eq!(limit, 5);
            assert_eq!(node, chain[4].id());
        }
        other => panic!("expected depth error, got {other:?}"),
    }
}

// ============================================================================
// Tracing
// ============================================================================

#[test]
fn test_event_sequence() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let a = graph.value(1);
    let b = graph.derived((a.clone(),), |(a,)| a * 2);

    a.recompute().unwrap();
    assert_eq!(
        collector.take(),
        vec![
            GraphEvent::Recompute {
                node: a.id(),
                kind: NodeKind::Value,
            },
            GraphEvent::Notify {
                node: a.id(),
                dependents: 1,
            },
            GraphEvent::Recompute {
                node: b.id(),
                kind: NodeKind::Derived,
            },
            GraphEvent::Notify {
                node: b.id(),
                dependents: 0,
            },
        ]
    );
}

#[test]
fn test_gated_event() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let empty = graph.empty::<u8>();

    empty.recompute().unwrap();
    assert_eq!(
        collector.events().last(),
        Some(&GraphEvent::Gated { node: empty.id() })
    );
}

#[test]
fn test_cycle_event() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let a = graph.value(1);
    let b = graph.derived((a.clone(),), |(a,)| a + 1);
    b.link(&a);

    let _ = a.recompute();
    assert!(collector.events().contains(&GraphEvent::CycleDetected {
        path: vec![a.id(), b.id(), a.id()],
    }));
}

// ============================================================================
// Arrays
// ============================================================================

#[test]
fn test_projection_count_tracks_longest_sequence() {
    let graph = Graph::new();
    let len = graph.value(1_usize);
    let array = graph.array((len.clone(),), |(n,)| vec![0_i64; n]);

    let mut longest = 0;
    for n in [1, 4, 2, 6, 3] {
        len.set(n);
        len.recompute().unwrap();
        longest = longest.max(n);
        assert!(array.projection_count() >= longest);
    }
    assert_eq!(array.projection_count(), 6);
}

#[test]
fn test_projection_matches_element() {
    let graph = Graph::new();
    let source = graph.value(vec!["a", "b"]);
    let array = graph.array((source.clone(),), |(items,)| items);

    source.recompute().unwrap();
    assert_eq!(array.projection_count(), 2);

    source.set(vec!["a", "b", "c"]);
    source.recompute().unwrap();
    assert_eq!(array.projection_count(), 3);
    assert_eq!(array.projection(2).unwrap().current_value(), Some("c"));

    for (index, projection) in array.projections().iter().enumerate() {
        let element = array.current_value().unwrap()[index];
        assert_eq!(projection.current_value(), element);
    }
}

#[test]
fn test_aggregate_feeds_array() {
    let graph = Graph::new();
    let xs: Vec<_> = [1.0_f32, 2.0, 3.0].map(|x| graph.value(x)).into();
    let points = graph.aggregate(xs.clone());
    let doubled = graph.sparse_array((points.clone(),), |(points,)| {
        points.into_iter().map(|x| x.map(|x| x * 2.0)).collect()
    });

    points.recompute().unwrap();
    assert_eq!(doubled.valid_len(), 3);

    xs[1].set(10.0);
    xs[1].recompute().unwrap();
    assert_eq!(doubled.projection(1).unwrap().current_value(), Some(20.0));
}
