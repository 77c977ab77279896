//! Step routing graph validation.
//!
//! A workflow's steps are not a dependency DAG in the classic sense; the
//! engine follows explicit `next`/`on_true`/`on_false`/`wait.on_timeout`
//! pointers one step at a time. What still must hold is that those pointers
//! never form a cycle (an execution would otherwise loop forever). This
//! module flattens every step — including `parallel`/`foreach` children,
//! which share the same id namespace — into one `petgraph` graph of routing
//! edges and runs a topological sort purely to detect cycles.

use std::collections::HashMap;

use loomwork_types::workflow::{Step, StepBody};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

/// Validate that the routing edges between all steps in a definition
/// (top-level and nested under `parallel`/`foreach`) are acyclic.
///
/// Returns the id of a step participating in a cycle as the error payload.
pub fn validate_acyclic(steps: &[Step]) -> Result<(), String> {
    let mut flat = Vec::new();
    flatten(steps, &mut flat);

    let id_to_idx: HashMap<&str, usize> = flat
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = flat.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for step in &flat {
        let from_idx = id_to_idx[step.id.as_str()];
        for target in routing_targets(step) {
            if let Some(&to_idx) = id_to_idx.get(target) {
                graph.add_edge(node_indices[from_idx], node_indices[to_idx], ());
            }
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| graph[cycle.node_id()].to_string())
}

fn flatten<'a>(steps: &'a [Step], out: &mut Vec<&'a Step>) {
    for step in steps {
        out.push(step);
        match &step.body {
            StepBody::Parallel { steps, .. } | StepBody::Foreach { steps, .. } => {
                flatten(steps, out);
            }
            _ => {}
        }
    }
}

fn routing_targets(step: &Step) -> Vec<&str> {
    let mut targets = Vec::new();
    if let Some(next) = &step.next {
        targets.push(next.as_str());
    }
    match &step.body {
        StepBody::Condition {
            on_true, on_false, ..
        } => {
            if let Some(id) = on_true {
                targets.push(id.as_str());
            }
            if let Some(id) = on_false {
                targets.push(id.as_str());
            }
        }
        StepBody::Wait { on_timeout, .. } => {
            if let Some(id) = on_timeout {
                targets.push(id.as_str());
            }
        }
        _ => {}
    }
    targets
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loomwork_types::workflow::{ActionSpec, ParallelStrategy};
    use std::collections::HashMap;

    fn action(id: &str, next: Option<&str>) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            body: StepBody::Action {
                action: ActionSpec::Execute,
            },
            next: next.map(String::from),
            timeout_secs: None,
            retry: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn linear_chain_is_acyclic() {
        let steps = vec![action("a", Some("b")), action("b", Some("c")), action("c", None)];
        assert!(validate_acyclic(&steps).is_ok());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let steps = vec![action("a", Some("a"))];
        assert!(validate_acyclic(&steps).is_err());
    }

    #[test]
    fn two_step_cycle_is_detected() {
        let steps = vec![action("a", Some("b")), action("b", Some("a"))];
        let err = validate_acyclic(&steps).unwrap_err();
        assert!(err == "a" || err == "b");
    }

    #[test]
    fn condition_branches_do_not_create_false_cycle() {
        let steps = vec![
            Step {
                id: "check".to_string(),
                name: None,
                body: StepBody::Condition {
                    expression: loomwork_types::workflow::Condition::Leaf {
                        field: "x".to_string(),
                        operator: loomwork_types::workflow::ConditionOperator::Eq,
                        value: serde_json::json!(1),
                    },
                    on_true: Some("a".to_string()),
                    on_false: Some("b".to_string()),
                },
                next: None,
                timeout_secs: None,
                retry: None,
                metadata: HashMap::new(),
            },
            action("a", None),
            action("b", None),
        ];
        assert!(validate_acyclic(&steps).is_ok());
    }

    #[test]
    fn nested_parallel_children_are_flattened() {
        let steps = vec![Step {
            id: "fanout".to_string(),
            name: None,
            body: StepBody::Parallel {
                steps: vec![action("child-a", Some("fanout"))],
                strategy: ParallelStrategy::AllMustPass,
            },
            next: None,
            timeout_secs: None,
            retry: None,
            metadata: HashMap::new(),
        }];
        assert!(validate_acyclic(&steps).is_err());
    }

    #[test]
    fn empty_steps_is_acyclic() {
        assert!(validate_acyclic(&[]).is_ok());
    }
}
