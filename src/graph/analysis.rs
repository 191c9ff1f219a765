use std::collections::HashMap;

use common::RcSet;
use super::thunk::ThunkRef;

/// Static orderings derived from the DAG reachable from one root.
pub struct DagInfo {
    /// Reverse adjacency: for each node, the thunks listing it among their
    /// inputs. The root maps to the empty set. Immutable after analysis.
    pub dependents: HashMap<ThunkRef, RcSet<ThunkRef>>,
    /// Size of each node's forward-reachable set of dependents.
    pub noffspring: HashMap<ThunkRef, usize>,
    /// Dispatch priority; a larger subtree below a node gives it a larger
    /// value. Ties between equal subtrees break on thunk id.
    pub order: HashMap<ThunkRef, i64>,
}

/// Walk the graph from `root` and compute reverse edges, offspring counts
/// and dispatch priorities.
pub fn analyze_dag(root: &ThunkRef) -> DagInfo {
    let mut dependents: HashMap<ThunkRef, RcSet<ThunkRef>> = HashMap::new();
    let mut stack = vec![root.clone()];
    dependents.insert(root.clone(), Default::default());

    while let Some(node) = stack.pop() {
        for input in node.thunk_inputs() {
            let seen = dependents.contains_key(&input);
            dependents
                .entry(input.clone())
                .or_insert_with(Default::default)
                .insert(node.clone());
            if !seen {
                stack.push(input);
            }
        }
    }

    let mut noffspring = HashMap::new();
    let mut order = HashMap::new();
    for node in dependents.keys() {
        let n = count_offspring(node, &dependents);
        noffspring.insert(node.clone(), n);
        order.insert(node.clone(), n as i64);
    }

    DagInfo {
        dependents: dependents,
        noffspring: noffspring,
        order: order,
    }
}

fn count_offspring(node: &ThunkRef, dependents: &HashMap<ThunkRef, RcSet<ThunkRef>>) -> usize {
    let mut seen: RcSet<ThunkRef> = Default::default();
    let mut stack: Vec<ThunkRef> = dependents[node].iter().cloned().collect();
    while let Some(n) = stack.pop() {
        if seen.insert(n.clone()) {
            for d in dependents[&n].iter() {
                stack.push(d.clone());
            }
        }
    }
    seen.len()
}
