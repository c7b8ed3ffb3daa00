//! Dependency graph derived from a job's units: topological order and level
//! partition.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::unit::Unit;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle detected, involving units: {0:?}")]
    Cycle(Vec<String>),

    #[error("unit {unit} depends on unknown unit {missing}")]
    MissingDependency { unit: String, missing: String },
}

/// Units grouped by level: level `k` depends only on units in levels `< k`.
pub type Level = Vec<String>;

/// The dependency DAG derived from a job's units.
///
/// Nodes are unit IDs; edges run dependency → dependent.
#[derive(Debug, Clone)]
pub struct Graph {
    /// dependency -> set of units that depend on it
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// unit -> its declared dependencies
    dependencies: BTreeMap<String, BTreeSet<String>>,
    topological_order: Vec<String>,
    levels: Vec<Level>,
}

impl Graph {
    /// Build the graph from a unit list, validating that every dependency
    /// reference resolves and that the graph is acyclic.
    pub fn build(units: &[Unit]) -> Result<Self, GraphError> {
        let known: BTreeSet<&str> = units.iter().map(|u| u.id.as_str()).collect();

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for unit in units {
            dependencies.entry(unit.id.clone()).or_default();
            dependents.entry(unit.id.clone()).or_default();
        }

        for unit in units {
            for dep in &unit.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(GraphError::MissingDependency {
                        unit: unit.id.clone(),
                        missing: dep.clone(),
                    });
                }
                dependencies.get_mut(&unit.id).unwrap().insert(dep.clone());
                dependents.get_mut(dep).unwrap().insert(unit.id.clone());
            }
        }

        let (topological_order, levels) = Self::analyze(&dependencies, units)?;

        Ok(Self {
            dependents,
            dependencies,
            topological_order,
            levels,
        })
    }

    /// Kahn's algorithm, producing both a total topological order and a
    /// level partition (level k = longest dependency chain length k) in
    /// the same pass. Units within a level are sorted by ID for
    /// determinism.
    fn analyze(
        dependencies: &BTreeMap<String, BTreeSet<String>>,
        units: &[Unit],
    ) -> Result<(Vec<String>, Vec<Level>), GraphError> {
        let mut remaining: BTreeMap<String, BTreeSet<String>> = dependencies.clone();
        let mut order = Vec::with_capacity(units.len());
        let mut levels: Vec<Level> = Vec::new();

        loop {
            let mut frontier: Vec<String> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            frontier.sort();

            if frontier.is_empty() {
                break;
            }

            for id in &frontier {
                remaining.remove(id);
            }
            for deps in remaining.values_mut() {
                for id in &frontier {
                    deps.remove(id);
                }
            }

            order.extend(frontier.iter().cloned());
            levels.push(frontier);
        }

        if !remaining.is_empty() {
            let cyclic: Vec<String> = remaining.keys().cloned().collect();
            return Err(GraphError::Cycle(cyclic));
        }

        Ok((order, levels))
    }

    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn dependencies_of(&self, unit_id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(unit_id)
            .into_iter()
            .flat_map(|s| s.iter().map(|s| s.as_str()))
    }

    pub fn dependents_of(&self, unit_id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(unit_id)
            .into_iter()
            .flat_map(|s| s.iter().map(|s| s.as_str()))
    }

    /// Every unit transitively depending on `unit_id` (BFS over `dependents`).
    pub fn transitive_dependents(&self, unit_id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = self
            .dependents_of(unit_id)
            .map(|s| s.to_string())
            .collect();

        while let Some(id) = queue.pop_front() {
            if seen.insert(id.clone()) {
                for next in self.dependents_of(&id) {
                    queue.push_back(next.to_string());
                }
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn unit(id: &str, deps: &[&str]) -> Unit {
        Unit::new(
            id,
            vec![Task::new(0, "t", "", "exit 0", vec![])],
            deps.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn linear_chain_levels() {
        let units = vec![unit("a", &[]), unit("b", &["a"]), unit("c", &["b"])];
        let graph = Graph::build(&units).unwrap();
        assert_eq!(graph.topological_order(), &["a", "b", "c"]);
        assert_eq!(graph.levels().len(), 3);
    }

    #[test]
    fn diamond_levels() {
        let units = vec![
            unit("a", &[]),
            unit("b", &["a"]),
            unit("c", &["a"]),
            unit("d", &["b", "c"]),
        ];
        let graph = Graph::build(&units).unwrap();
        assert_eq!(graph.levels()[0], vec!["a".to_string()]);
        assert_eq!(graph.levels()[1], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(graph.levels()[2], vec!["d".to_string()]);
    }

    #[test]
    fn cycle_detected() {
        let units = vec![unit("a", &["b"]), unit("b", &["a"])];
        let err = Graph::build(&units).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn missing_dependency_detected() {
        let units = vec![unit("a", &["ghost"])];
        let err = Graph::build(&units).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                unit: "a".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn transitive_dependents_of_diamond_root() {
        let units = vec![
            unit("a", &[]),
            unit("b", &["a"]),
            unit("c", &["a"]),
            unit("d", &["b", "c"]),
        ];
        let graph = Graph::build(&units).unwrap();
        let dependents = graph.transitive_dependents("a");
        assert_eq!(
            dependents,
            ["b", "c", "d"].into_iter().map(String::from).collect()
        );
    }
}
