//! Dependency graph over resources.
//!
//! Edges run from a dependency to its dependent. Nodes are indices into a
//! sorted id table, so ready-set iteration follows `(kind, name)` order and
//! the computed order never depends on declaration order.

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::error::{ConfigError, PipeformError, Result};
use crate::model::{ResourceId, ResourceSpec};
use crate::state::StateSnapshot;

/// Directed dependency graph of resources.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<ResourceId>,
    index: BTreeMap<ResourceId, usize>,
    graph: DiGraphMap<usize, ()>,
}

impl DependencyGraph {
    /// Builds a graph from `(resource, dependencies)` pairs. Dependencies on
    /// resources outside the node set are ignored.
    pub fn new<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (ResourceId, BTreeSet<ResourceId>)>,
    {
        let edges: BTreeMap<ResourceId, BTreeSet<ResourceId>> = nodes.into_iter().collect();
        let ids: Vec<ResourceId> = edges.keys().cloned().collect();
        let index: BTreeMap<ResourceId, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();

        let mut graph = DiGraphMap::new();
        for i in 0..ids.len() {
            graph.add_node(i);
        }
        for (id, deps) in &edges {
            let to = index[id];
            for dep in deps {
                if let Some(&from) = index.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        debug!(
            "Built dependency graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Self { ids, index, graph }
    }

    /// Builds the graph of desired resources from references and `depends_on`.
    #[must_use]
    pub fn from_specs(specs: &[ResourceSpec]) -> Self {
        Self::new(specs.iter().map(|s| (s.id(), s.dependencies())))
    }

    /// Builds the graph of recorded resources from their recorded dependencies.
    #[must_use]
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self::new(snapshot.resources.iter().map(|(id, r)| {
            (id.clone(), r.depends_on.iter().cloned().collect())
        }))
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if `id` is a node.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Fails if the graph has a cycle, naming one concrete cycle path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CircularDependency`] for the cycle whose
    /// smallest member sorts first.
    pub fn check_cycles(&self) -> Result<()> {
        let mut cyclic: Vec<Vec<usize>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .collect();
        if cyclic.is_empty() {
            return Ok(());
        }

        for scc in &mut cyclic {
            scc.sort_unstable();
        }
        cyclic.sort();
        let path = self.cycle_path(&cyclic[0]);
        let members: Vec<String> = path.iter().map(|&i| self.ids[i].to_string()).collect();
        let mut cycle = members.clone();
        cycle.push(members[0].clone());

        Err(PipeformError::Config(ConfigError::CircularDependency {
            cycle: cycle.join(" -> "),
            members,
        }))
    }

    /// Finds a path from the smallest member back to itself, following
    /// "depends on" edges and staying inside the component.
    fn cycle_path(&self, scc: &[usize]) -> Vec<usize> {
        let start = scc[0];
        let members: BTreeSet<usize> = scc.iter().copied().collect();
        let mut parent: BTreeMap<usize, usize> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let mut deps: Vec<usize> = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter(|n| members.contains(n))
                .collect();
            deps.sort_unstable();

            for dep in deps {
                if dep == start {
                    let mut path = vec![node];
                    let mut current = node;
                    while let Some(&p) = parent.get(&current) {
                        path.push(p);
                        current = p;
                    }
                    path.reverse();
                    return path;
                }
                if !parent.contains_key(&dep) {
                    parent.insert(dep, node);
                    queue.push_back(dep);
                }
            }
        }

        vec![start]
    }

    /// Returns every resource after all of its dependencies, ties broken by
    /// `(kind, name)`.
    ///
    /// # Errors
    ///
    /// Returns a cycle error if the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>> {
        self.check_cycles()?;

        let mut in_degree: Vec<usize> = (0..self.ids.len())
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.ids.len());
        while let Some(node) = ready.pop_first() {
            order.push(self.ids[node].clone());
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        Ok(order)
    }

    /// Returns every resource before all of its dependencies.
    ///
    /// # Errors
    ///
    /// Returns a cycle error if the graph is not acyclic.
    pub fn reverse_order(&self) -> Result<Vec<ResourceId>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Direct dependencies of `id`.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &ResourceId, direction: Direction) -> BTreeSet<ResourceId> {
        self.index
            .get(id)
            .map(|&i| {
                self.graph
                    .neighbors_directed(i, direction)
                    .map(|n| self.ids[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, ResourceKind};

    fn id(kind: ResourceKind, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn specs() -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new(ResourceKind::EtlJob, "create_csv")
                .with_attr("role_arn", AttrValue::reference("role.glue_runner.arn").unwrap())
                .with_attr(
                    "script_location",
                    AttrValue::reference("script_artifact.create_csv.location").unwrap(),
                ),
            ResourceSpec::new(ResourceKind::ScriptArtifact, "create_csv")
                .with_attr("bucket", AttrValue::reference("bucket.scripts.name").unwrap()),
            ResourceSpec::new(ResourceKind::Role, "glue_runner"),
            ResourceSpec::new(ResourceKind::Bucket, "scripts"),
            ResourceSpec::new(ResourceKind::Bucket, "results"),
        ]
    }

    #[test]
    fn test_order_respects_references() {
        let order = DependencyGraph::from_specs(&specs()).topological_order().unwrap();
        let pos = |i: &ResourceId| order.iter().position(|o| o == i).unwrap();

        let job = id(ResourceKind::EtlJob, "create_csv");
        assert!(pos(&id(ResourceKind::Role, "glue_runner")) < pos(&job));
        assert!(pos(&id(ResourceKind::ScriptArtifact, "create_csv")) < pos(&job));
        assert!(
            pos(&id(ResourceKind::Bucket, "scripts"))
                < pos(&id(ResourceKind::ScriptArtifact, "create_csv"))
        );
    }

    #[test]
    fn test_order_independent_of_input_order() {
        let forward = DependencyGraph::from_specs(&specs()).topological_order().unwrap();
        let mut reversed_specs = specs();
        reversed_specs.reverse();
        let reversed = DependencyGraph::from_specs(&reversed_specs)
            .topological_order()
            .unwrap();
        assert_eq!(forward, reversed);
        assert_eq!(forward[0], id(ResourceKind::Bucket, "results"));
    }

    #[test]
    fn test_reverse_order_puts_dependents_first() {
        let order = DependencyGraph::from_specs(&specs()).reverse_order().unwrap();
        assert_eq!(order[0], id(ResourceKind::EtlJob, "create_csv"));
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let specs = vec![
            ResourceSpec::new(ResourceKind::Role, "a").with_dependency(id(ResourceKind::Role, "b")),
            ResourceSpec::new(ResourceKind::Role, "b").with_dependency(id(ResourceKind::Role, "a")),
            ResourceSpec::new(ResourceKind::Bucket, "free"),
        ];
        let err = DependencyGraph::from_specs(&specs)
            .topological_order()
            .unwrap_err();
        match err {
            PipeformError::Config(ConfigError::CircularDependency { cycle, members }) => {
                assert_eq!(cycle, "role.a -> role.b -> role.a");
                assert_eq!(members.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let specs = vec![
            ResourceSpec::new(ResourceKind::Role, "me").with_dependency(id(ResourceKind::Role, "me")),
        ];
        assert!(DependencyGraph::from_specs(&specs).check_cycles().is_err());
    }

    #[test]
    fn test_neighbors() {
        let graph = DependencyGraph::from_specs(&specs());
        let job = id(ResourceKind::EtlJob, "create_csv");
        assert_eq!(graph.dependencies_of(&job).len(), 2);
        assert!(
            graph
                .dependents_of(&id(ResourceKind::Role, "glue_runner"))
                .contains(&job)
        );
    }
}
