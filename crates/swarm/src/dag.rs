//! Pure DAG derivations over a swarm's agent dependency graph (spec.md
//! §4.5 "DAG utilities"): cycle detection (used at creation-time
//! validation) and level/critical-path (used for presentation).

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct DagNode {
    pub name: String,
    pub depends_on: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Returns the cycle (as a name sequence, first element repeated as the
/// last) if the graph is not acyclic (spec.md §4.5 validation step 3:
/// "reject with the detected cycle").
pub fn detect_cycle(nodes: &[DagNode]) -> Option<Vec<String>> {
    let edges: HashMap<String, Vec<String>> = nodes
        .iter()
        .map(|n| (n.name.clone(), n.depends_on.clone()))
        .collect();
    let mut marks: HashMap<String, Mark> = nodes
        .iter()
        .map(|n| (n.name.clone(), Mark::Unvisited))
        .collect();
    let mut stack: Vec<String> = Vec::new();

    fn visit(
        name: &str,
        edges: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(name).copied() {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            _ => {}
        }
        marks.insert(name.to_string(), Mark::InProgress);
        stack.push(name.to_string());
        if let Some(deps) = edges.get(name) {
            for dep in deps {
                if let Some(cycle) = visit(dep, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        None
    }

    for n in nodes {
        if let Some(cycle) = visit(&n.name, &edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Longest-path-from-a-root level per node. Assumes an acyclic graph —
/// callers run `detect_cycle` first.
pub fn levels(nodes: &[DagNode]) -> HashMap<String, u32> {
    let edges: HashMap<String, Vec<String>> = nodes
        .iter()
        .map(|n| (n.name.clone(), n.depends_on.clone()))
        .collect();
    let mut memo: HashMap<String, u32> = HashMap::new();

    fn level(
        name: &str,
        edges: &HashMap<String, Vec<String>>,
        memo: &mut HashMap<String, u32>,
    ) -> u32 {
        if let Some(l) = memo.get(name) {
            return *l;
        }
        let deps = edges.get(name).cloned().unwrap_or_default();
        let l = deps
            .iter()
            .map(|d| level(d, edges, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(name.to_string(), l);
        l
    }

    for n in nodes {
        level(&n.name, &edges, &mut memo);
    }
    memo
}

/// The longest fully-ordered dependency chain, root-to-leaf (spec.md
/// §4.5 "the critical path (longest fully-ordered chain)").
pub fn critical_path(nodes: &[DagNode]) -> Vec<String> {
    let lv = levels(nodes);
    let edges: HashMap<String, Vec<String>> = nodes
        .iter()
        .map(|n| (n.name.clone(), n.depends_on.clone()))
        .collect();
    let Some(end) = lv
        .iter()
        .max_by_key(|(_, l)| **l)
        .map(|(name, _)| name.clone())
    else {
        return Vec::new();
    };
    let mut chain = vec![end.clone()];
    let mut current = end;
    loop {
        let current_level = lv.get(&current).copied().unwrap_or(0);
        let deps = edges.get(&current).cloned().unwrap_or_default();
        let Some(next) = deps
            .iter()
            .find(|d| lv.get(*d).copied().unwrap_or(0) + 1 == current_level)
        else {
            break;
        };
        chain.push(next.clone());
        current = next.clone();
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, deps: &[&str]) -> DagNode {
        DagNode {
            name: name.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let nodes = vec![node("a", &[]), node("b", &["a"]), node("c", &["a", "b"])];
        assert!(detect_cycle(&nodes).is_none());
    }

    #[test]
    fn direct_cycle_is_detected() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"])];
        let cycle = detect_cycle(&nodes).expect("expected a cycle");
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let nodes = vec![node("a", &["a"])];
        assert!(detect_cycle(&nodes).is_some());
    }

    #[test]
    fn levels_follow_longest_path() {
        let nodes = vec![node("a", &[]), node("b", &["a"]), node("c", &["a", "b"])];
        let lv = levels(&nodes);
        assert_eq!(lv["a"], 0);
        assert_eq!(lv["b"], 1);
        assert_eq!(lv["c"], 2);
    }

    #[test]
    fn critical_path_follows_the_deepest_chain() {
        let nodes = vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["b"]),
            node("shortcut", &["a"]),
        ];
        let path = critical_path(&nodes);
        assert_eq!(path, vec!["a", "b", "c"]);
    }
}
