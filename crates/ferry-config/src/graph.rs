//! Dependency graph checks across task directories.

use std::collections::{BTreeMap, HashMap};

/// Detect a cycle in a directory dependency graph using DFS.
///
/// Returns the edge that closes the cycle as `"a -> b"`. Edges to directories
/// missing from the graph are ignored.
pub fn detect_cycle(graph: &BTreeMap<String, Vec<String>>) -> Result<(), String> {
    let mut visited = HashMap::new();

    for dir in graph.keys() {
        if !visited.contains_key(dir.as_str()) {
            if let Some(cycle) = dfs_detect_cycle(dir, graph, &mut visited) {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    graph: &'a BTreeMap<String, Vec<String>>,
    visited: &mut HashMap<&'a str, bool>,
) -> Option<String> {
    // true while `node` is on the current DFS stack
    visited.insert(node, true);

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            match visited.get(dep.as_str()) {
                None => {
                    if let Some(cycle) = dfs_detect_cycle(dep, graph, visited) {
                        return Some(cycle);
                    }
                }
                Some(true) => return Some(format!("{node} -> {dep}")),
                Some(false) => {}
            }
        }
    }

    visited.insert(node, false);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_acyclic_and_diamond() {
        let g = graph(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        assert!(detect_cycle(&g).is_ok());
    }

    #[test]
    fn test_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let cycle = detect_cycle(&g).unwrap_err();
        assert_eq!(cycle, "b -> a");
    }

    #[test]
    fn test_self_dependency() {
        let g = graph(&[("a", &["a"])]);
        assert_eq!(detect_cycle(&g).unwrap_err(), "a -> a");
    }
}
